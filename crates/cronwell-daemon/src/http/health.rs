use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health: liveness probe with node identity and clock state.
pub async fn health_handler(State(facade): State<AppState>) -> Json<Value> {
    let reply = facade.health_check_reply();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "server": reply.server,
        "port": reply.port,
        "instance_id": reply.instance_id,
        "scheduler_running": reply.scheduler_running,
        "running_jobs": facade.local_running_jobs().len(),
    }))
}
