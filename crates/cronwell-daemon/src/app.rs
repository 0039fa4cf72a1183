use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use cronwell_cluster::HttpPeerClient;
use cronwell_core::config::CronwellConfig;
use cronwell_execution::{InProcessJobHost, JobRunner, ProcessJobHost, RestJobHost};
use cronwell_monitor::HookRegistry;
use cronwell_protocol::routes;
use cronwell_scheduler::{SchedulerFacade, SchedulerServices, SqliteTriggerClock};
use cronwell_store::{db, HistoryManager, MonitorManager, NodeRegistry};
use tracing::info;

use crate::http::{cluster, health};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state of every route.
pub type AppState = Arc<SchedulerFacade>;

/// Open the database and wire the scheduler. Each store owns its own
/// connection to the same file.
pub fn build_facade(config: CronwellConfig) -> anyhow::Result<SchedulerFacade> {
    let path = config.database.path.clone();
    info!(path = %path, "opening SQLite database");

    let clock = Arc::new(SqliteTriggerClock::new(db::open(&path)?)?);
    let history = Arc::new(HistoryManager::new(db::open(&path)?));
    let monitors = Arc::new(MonitorManager::new(db::open(&path)?));
    let registry = Arc::new(NodeRegistry::new(db::open(&path)?)?);
    info!("database migrations complete");

    let peers = Arc::new(HttpPeerClient::new(config.cluster.rpc_timeout())?);
    let hooks = Arc::new(HookRegistry::from_config(
        &config.monitor.webhooks,
        WEBHOOK_TIMEOUT,
    )?);
    info!(hooks = ?hooks.names(), "monitor hooks registered");

    let runner = Arc::new(JobRunner::new(
        ProcessJobHost::new(),
        RestJobHost::new()?,
        InProcessJobHost::new(),
    ));

    Ok(SchedulerFacade::new(
        config,
        SchedulerServices {
            clock,
            history,
            monitors,
            cluster: registry,
            peers,
            hooks,
            runner,
        },
    ))
}

/// Cluster RPC routes plus the liveness probe.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(routes::HEALTH, get(health::health_handler))
        .route(routes::HEALTH_CHECK, post(cluster::health_check))
        .route(routes::STOP_SCHEDULER, post(cluster::stop_scheduler))
        .route(routes::START_SCHEDULER, post(cluster::start_scheduler))
        .route(routes::IS_JOB_RUNNING, post(cluster::is_job_running))
        .route(routes::RUNNING_JOB, post(cluster::running_job))
        .route(routes::RUNNING_JOBS, post(cluster::running_jobs))
        .route(routes::RUNNING_DATA, post(cluster::running_data))
        .route(
            routes::PERSISTENCE_RUNNING_JOBS,
            post(cluster::persistence_running_jobs),
        )
        .route(routes::STOP_RUNNING_JOB, post(cluster::stop_running_job))
        .route(routes::JOB_FOLDER_EXISTS, post(cluster::job_folder_exists))
        .route(routes::JOB_FILE_EXISTS, post(cluster::job_file_exists))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronwell_cluster::PeerClient;
    use cronwell_core::cluster::{ClusterNode, NodeKey};
    use cronwell_core::types::{generate_id, JobKey};
    use cronwell_protocol::messages::ErrorBody;

    struct Served {
        facade: AppState,
        peer: ClusterNode,
        client: HttpPeerClient,
        root: std::path::PathBuf,
    }

    async fn serve() -> Served {
        let root = std::env::temp_dir().join(format!("cronwell-daemon-{}", generate_id()));
        std::fs::create_dir_all(root.join("jobs").join("etl")).unwrap();

        let mut config = CronwellConfig::default();
        config.service.server = Some("127.0.0.1".into());
        config.service.instance_id = Some("inst-test".into());
        config.service.jobs_folder = root.join("jobs").to_string_lossy().into_owned();
        config.database.path = root.join("cronwell.db").to_string_lossy().into_owned();
        let facade = Arc::new(build_facade(config).unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = build_router(facade.clone());
        tokio::spawn(async move { axum::serve(listener, router).await });

        Served {
            facade,
            peer: ClusterNode::new(&NodeKey::new("127.0.0.1", 2306), "inst-test", port),
            client: HttpPeerClient::new(Duration::from_secs(5)).unwrap(),
            root,
        }
    }

    #[tokio::test]
    async fn peers_can_toggle_the_clock() {
        let s = serve().await;
        let reply = s.client.health_check(&s.peer).await.unwrap();
        assert_eq!(reply.instance_id, "inst-test");
        assert_eq!(reply.server, "127.0.0.1");
        assert!(!reply.scheduler_running);

        s.client.start_scheduler(&s.peer).await.unwrap();
        assert!(s.facade.is_running());
        assert!(s.client.health_check(&s.peer).await.unwrap().scheduler_running);

        s.client.stop_scheduler(&s.peer).await.unwrap();
        assert!(!s.facade.is_running());
        let _ = std::fs::remove_dir_all(&s.root);
    }

    #[tokio::test]
    async fn running_job_queries_answer_from_local_state() {
        let s = serve().await;
        let job = JobKey::new("Etl", "Load");
        assert!(!s.client.is_job_running(&s.peer, &job).await.unwrap());
        assert!(s.client.get_running_jobs(&s.peer).await.unwrap().is_empty());
        assert!(s.client.get_running_job(&s.peer, "nope").await.unwrap().is_none());
        assert!(s.client.get_running_data(&s.peer, "nope").await.unwrap().is_none());
        assert!(s
            .client
            .get_persistence_running_jobs_info(&s.peer)
            .await
            .unwrap()
            .is_empty());
        assert!(!s.client.stop_running_job(&s.peer, "nope").await.unwrap());
        let _ = std::fs::remove_dir_all(&s.root);
    }

    #[tokio::test]
    async fn job_asset_lookups_are_served() {
        let s = serve().await;
        std::fs::write(s.root.join("jobs").join("etl").join("run.sh"), "echo hi").unwrap();

        assert!(s.client.is_job_folder_exist(&s.peer, "etl").await.unwrap());
        assert!(!s.client.is_job_folder_exist(&s.peer, "../jobs").await.unwrap());
        assert!(s.client.is_job_file_exist(&s.peer, "etl", "run.sh").await.unwrap());
        assert!(!s.client.is_job_file_exist(&s.peer, "etl", "nope.sh").await.unwrap());
        let _ = std::fs::remove_dir_all(&s.root);
    }

    #[tokio::test]
    async fn malformed_bodies_get_an_error_body() {
        let s = serve().await;
        let url = format!("{}{}", s.peer.rpc_address(), routes::IS_JOB_RUNNING);
        let resp = reqwest::Client::new()
            .post(&url)
            .json(&serde_json::json!({ "group": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        let body: ErrorBody = resp.json().await.unwrap();
        assert_eq!(body.code, "bad_request");

        let health = reqwest::get(format!("{}{}", s.peer.rpc_address(), routes::HEALTH))
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["running_jobs"], 0);
        let _ = std::fs::remove_dir_all(&s.root);
    }
}
