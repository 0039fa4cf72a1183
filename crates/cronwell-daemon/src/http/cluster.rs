//! Peer-facing side of the cluster RPC. Every handler answers from this
//! node's own state only; fan-out happens on the calling node.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cronwell_core::types::JobKey;
use cronwell_protocol::messages::{
    Ack, ErrorBody, ExistsReply, FireInstanceRequest, HealthCheckReply, IsRunningReply,
    JobFileRequest, JobFolderRequest, JobKeyRequest, PersistenceRunningJobsReply,
    RunningDataReply, RunningJobReply, RunningJobsReply, StopRunningJobReply,
};
use tracing::{debug, info, warn};

use crate::app::AppState;

/// A malformed request body, answered as `400` with an [`ErrorBody`].
pub struct BadRequest(ErrorBody);

impl From<JsonRejection> for BadRequest {
    fn from(rejection: JsonRejection) -> Self {
        warn!(err = %rejection.body_text(), "rejected cluster rpc body");
        Self(ErrorBody::new("bad_request", rejection.body_text()))
    }
}

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(self.0)).into_response()
    }
}

type Reply<T> = Result<Json<T>, BadRequest>;

pub async fn health_check(State(facade): State<AppState>) -> Json<HealthCheckReply> {
    Json(facade.health_check_reply())
}

pub async fn stop_scheduler(State(facade): State<AppState>) -> Json<Ack> {
    info!("peer requested standby");
    facade.standby();
    Json(Ack::ok())
}

pub async fn start_scheduler(State(facade): State<AppState>) -> Json<Ack> {
    info!("peer requested clock start");
    facade.start_clock();
    Json(Ack::ok())
}

pub async fn is_job_running(
    State(facade): State<AppState>,
    body: Result<Json<JobKeyRequest>, JsonRejection>,
) -> Reply<IsRunningReply> {
    let Json(req) = body?;
    let job = JobKey::from(req);
    let running = facade.local_is_job_running(&job);
    debug!(job = %job, running, "is job running");
    Ok(Json(IsRunningReply { running }))
}

pub async fn running_job(
    State(facade): State<AppState>,
    body: Result<Json<FireInstanceRequest>, JsonRejection>,
) -> Reply<RunningJobReply> {
    let Json(req) = body?;
    Ok(Json(RunningJobReply {
        job: facade.local_running_job(&req.fire_instance_id),
    }))
}

pub async fn running_jobs(State(facade): State<AppState>) -> Json<RunningJobsReply> {
    Json(RunningJobsReply {
        jobs: facade.local_running_jobs(),
    })
}

pub async fn running_data(
    State(facade): State<AppState>,
    body: Result<Json<FireInstanceRequest>, JsonRejection>,
) -> Reply<RunningDataReply> {
    let Json(req) = body?;
    Ok(Json(RunningDataReply {
        data: facade.local_running_data(&req.fire_instance_id),
    }))
}

pub async fn persistence_running_jobs(
    State(facade): State<AppState>,
) -> Json<PersistenceRunningJobsReply> {
    Json(PersistenceRunningJobsReply {
        jobs: facade.local_persistence_info(),
    })
}

pub async fn stop_running_job(
    State(facade): State<AppState>,
    body: Result<Json<FireInstanceRequest>, JsonRejection>,
) -> Reply<StopRunningJobReply> {
    let Json(req) = body?;
    let stopped = facade.local_stop_running_job(&req.fire_instance_id);
    if stopped {
        info!(fire_instance_id = %req.fire_instance_id, "running job stopped by peer");
    }
    Ok(Json(StopRunningJobReply { stopped }))
}

pub async fn job_folder_exists(
    State(facade): State<AppState>,
    body: Result<Json<JobFolderRequest>, JsonRejection>,
) -> Reply<ExistsReply> {
    let Json(req) = body?;
    Ok(Json(ExistsReply {
        exists: facade.job_folder_exists(&req.folder),
    }))
}

pub async fn job_file_exists(
    State(facade): State<AppState>,
    body: Result<Json<JobFileRequest>, JsonRejection>,
) -> Reply<ExistsReply> {
    let Json(req) = body?;
    Ok(Json(ExistsReply {
        exists: facade.job_file_exists(&req.folder, &req.filename),
    }))
}
