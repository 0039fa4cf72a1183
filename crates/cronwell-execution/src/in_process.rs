use std::sync::Arc;

use async_trait::async_trait;
use cronwell_core::job::JobKind;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ExecutionError, Result};
use crate::host::{JobContext, JobHost};
use crate::tracker::LifecycleSink;

/// Job code compiled into the daemon, looked up by handler name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

#[derive(Default)]
pub struct InProcessJobHost {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl InProcessJobHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered under `name`.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let name = name.into();
        info!(handler = %name, "registered in-process job handler");
        self.handlers.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl JobHost for InProcessJobHost {
    async fn run(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let JobKind::InProcess { handler } = &ctx.kind else {
            return Err(ExecutionError::JobFailed("not an in-process job".into()));
        };
        // Clone out of the map so no shard lock is held across the await.
        let found = self.handlers.get(handler).map(|h| h.value().clone());
        let Some(found) = found else {
            return Err(ExecutionError::UnknownHandler(handler.clone()));
        };
        found.execute(ctx, sink, cancel).await
    }
}
