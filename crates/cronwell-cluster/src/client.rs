use std::time::Duration;

use async_trait::async_trait;
use cronwell_core::cluster::ClusterNode;
use cronwell_core::types::JobKey;
use cronwell_protocol::messages::{
    Ack, ExistsReply, FireInstanceRequest, HealthCheckReply, IsRunningReply, JobFileRequest,
    JobFolderRequest, JobKeyRequest, PersistenceRunningJobInfo, PersistenceRunningJobsReply,
    RunningData, RunningDataReply, RunningJobDetails, RunningJobReply, RunningJobsReply,
    StopRunningJobReply,
};
use cronwell_protocol::routes;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};

/// Cross-node RPC: one request/reply pair per operation.
#[async_trait]
pub trait PeerClient: Send + Sync {
    async fn health_check(&self, node: &ClusterNode) -> Result<HealthCheckReply>;
    async fn stop_scheduler(&self, node: &ClusterNode) -> Result<()>;
    async fn start_scheduler(&self, node: &ClusterNode) -> Result<()>;
    async fn is_job_running(&self, node: &ClusterNode, job: &JobKey) -> Result<bool>;
    async fn get_running_job(
        &self,
        node: &ClusterNode,
        fire_instance_id: &str,
    ) -> Result<Option<RunningJobDetails>>;
    async fn get_running_jobs(&self, node: &ClusterNode) -> Result<Vec<RunningJobDetails>>;
    async fn get_running_data(
        &self,
        node: &ClusterNode,
        fire_instance_id: &str,
    ) -> Result<Option<RunningData>>;
    async fn get_persistence_running_jobs_info(
        &self,
        node: &ClusterNode,
    ) -> Result<Vec<PersistenceRunningJobInfo>>;
    async fn stop_running_job(&self, node: &ClusterNode, fire_instance_id: &str) -> Result<bool>;
    async fn is_job_folder_exist(&self, node: &ClusterNode, folder: &str) -> Result<bool>;
    async fn is_job_file_exist(
        &self,
        node: &ClusterNode,
        folder: &str,
        filename: &str,
    ) -> Result<bool>;
}

/// JSON-over-HTTP peer client. Every call carries the RPC timeout.
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClusterError::rpc("<client>", e))?;
        Ok(Self { client })
    }

    async fn call<Req, Res>(&self, node: &ClusterNode, path: &str, body: &Req) -> Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned,
    {
        let url = format!("{}{}", node.rpc_address(), path);
        debug!(node = %node, path, "cluster rpc");

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClusterError::rpc(node, e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            warn!(node = %node, path, status, body = %message, "cluster rpc error");
            return Err(ClusterError::Api {
                node: node.to_string(),
                status,
                message,
            });
        }

        resp.json::<Res>()
            .await
            .map_err(|e| ClusterError::rpc(node, format!("bad reply: {e}")))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn health_check(&self, node: &ClusterNode) -> Result<HealthCheckReply> {
        self.call(node, routes::HEALTH_CHECK, &()).await
    }

    async fn stop_scheduler(&self, node: &ClusterNode) -> Result<()> {
        let _: Ack = self.call(node, routes::STOP_SCHEDULER, &()).await?;
        Ok(())
    }

    async fn start_scheduler(&self, node: &ClusterNode) -> Result<()> {
        let _: Ack = self.call(node, routes::START_SCHEDULER, &()).await?;
        Ok(())
    }

    async fn is_job_running(&self, node: &ClusterNode, job: &JobKey) -> Result<bool> {
        let reply: IsRunningReply = self
            .call(node, routes::IS_JOB_RUNNING, &JobKeyRequest::from(job))
            .await?;
        Ok(reply.running)
    }

    async fn get_running_job(
        &self,
        node: &ClusterNode,
        fire_instance_id: &str,
    ) -> Result<Option<RunningJobDetails>> {
        let req = FireInstanceRequest {
            fire_instance_id: fire_instance_id.to_string(),
        };
        let reply: RunningJobReply = self.call(node, routes::RUNNING_JOB, &req).await?;
        Ok(reply.job)
    }

    async fn get_running_jobs(&self, node: &ClusterNode) -> Result<Vec<RunningJobDetails>> {
        let reply: RunningJobsReply = self.call(node, routes::RUNNING_JOBS, &()).await?;
        Ok(reply.jobs)
    }

    async fn get_running_data(
        &self,
        node: &ClusterNode,
        fire_instance_id: &str,
    ) -> Result<Option<RunningData>> {
        let req = FireInstanceRequest {
            fire_instance_id: fire_instance_id.to_string(),
        };
        let reply: RunningDataReply = self.call(node, routes::RUNNING_DATA, &req).await?;
        Ok(reply.data)
    }

    async fn get_persistence_running_jobs_info(
        &self,
        node: &ClusterNode,
    ) -> Result<Vec<PersistenceRunningJobInfo>> {
        let reply: PersistenceRunningJobsReply = self
            .call(node, routes::PERSISTENCE_RUNNING_JOBS, &())
            .await?;
        Ok(reply.jobs)
    }

    async fn stop_running_job(&self, node: &ClusterNode, fire_instance_id: &str) -> Result<bool> {
        let req = FireInstanceRequest {
            fire_instance_id: fire_instance_id.to_string(),
        };
        let reply: StopRunningJobReply = self.call(node, routes::STOP_RUNNING_JOB, &req).await?;
        Ok(reply.stopped)
    }

    async fn is_job_folder_exist(&self, node: &ClusterNode, folder: &str) -> Result<bool> {
        let req = JobFolderRequest {
            folder: folder.to_string(),
        };
        let reply: ExistsReply = self.call(node, routes::JOB_FOLDER_EXISTS, &req).await?;
        Ok(reply.exists)
    }

    async fn is_job_file_exist(
        &self,
        node: &ClusterNode,
        folder: &str,
        filename: &str,
    ) -> Result<bool> {
        let req = JobFileRequest {
            folder: folder.to_string(),
            filename: filename.to_string(),
        };
        let reply: ExistsReply = self.call(node, routes::JOB_FILE_EXISTS, &req).await?;
        Ok(reply.exists)
    }
}
