use async_trait::async_trait;
use cronwell_core::job::JobKind;
use cronwell_core::types::{DataMap, JobKey, TriggerKey};
use cronwell_protocol::lifecycle::ExceptionInfo;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ExecutionError, Result};
use crate::in_process::InProcessJobHost;
use crate::limits::{format_span, ExecutionLimits, ExecutionOutcome};
use crate::process::ProcessJobHost;
use crate::rest::RestJobHost;
use crate::tracker::LifecycleSink;

/// What a host needs to run one fire.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub fire_instance_id: String,
    pub job_key: JobKey,
    pub trigger_key: TriggerKey,
    /// Merged job and trigger data without reserved keys.
    pub data: DataMap,
    pub kind: JobKind,
}

/// Runs one kind of job. `cancel` fires on stop requests and when the
/// timeout expires; hosts should end the run promptly once it does.
#[async_trait]
pub trait JobHost: Send + Sync {
    async fn run(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Dispatches a fire to the host for its job kind and enforces the
/// execution limits.
pub struct JobRunner {
    process: ProcessJobHost,
    rest: RestJobHost,
    in_process: InProcessJobHost,
}

impl JobRunner {
    pub fn new(process: ProcessJobHost, rest: RestJobHost, in_process: InProcessJobHost) -> Self {
        Self {
            process,
            rest,
            in_process,
        }
    }

    pub fn in_process(&self) -> &InProcessJobHost {
        &self.in_process
    }

    fn host_for(&self, kind: &JobKind) -> &dyn JobHost {
        match kind {
            JobKind::Process { .. } => &self.process,
            JobKind::Rest { .. } => &self.rest,
            JobKind::InProcess { .. } => &self.in_process,
        }
    }

    /// Run the job to an outcome. Job errors never escape: they are stored
    /// on the sink as the run's exception.
    ///
    /// At `limits.timeout` the job is asked to stop; if it is still running
    /// after `limits.grace` it is dropped (processes are killed).
    #[instrument(skip_all, fields(job = %ctx.job_key, fire_instance_id = %ctx.fire_instance_id))]
    pub async fn execute(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        limits: ExecutionLimits,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let job_token = cancel.child_token();
        let run = self.host_for(&ctx.kind).run(ctx, sink, job_token.clone());
        tokio::pin!(run);

        let outcome = tokio::select! {
            result = &mut run => settle(result, sink, cancel),
            _ = cancel.cancelled() => {
                sink.append_log("[warning] service got a request to cancel the job");
                if tokio::time::timeout(limits.grace, &mut run).await.is_err() {
                    warn!("job ignored cancel request, dropping it");
                }
                ExecutionOutcome::Stopped
            }
            _ = tokio::time::sleep(limits.timeout) => {
                warn!(timeout = %format_span(limits.timeout), "job timed out");
                sink.append_log(format!(
                    "[timeout] timeout occurred, sent cancel request to job (timeout value: {})",
                    format_span(limits.timeout)
                ));
                job_token.cancel();
                if tokio::time::timeout(limits.grace, &mut run).await.is_err() {
                    sink.append_log("[timeout] job did not stop within the grace period and was terminated");
                }
                let ms = limits.timeout.as_millis() as u64;
                sink.set_ambient_exception(ExceptionInfo::new(
                    ExecutionError::Timeout { ms }.to_string(),
                ));
                ExecutionOutcome::TimedOut
            }
        };

        job_token.cancel();
        info!(?outcome, "job run finished");
        outcome
    }
}

fn settle(result: Result<()>, sink: &LifecycleSink, cancel: &CancellationToken) -> ExecutionOutcome {
    if cancel.is_cancelled() {
        return ExecutionOutcome::Stopped;
    }
    match result {
        Ok(()) if sink.has_unhandled_exception() => ExecutionOutcome::Fail,
        Ok(()) => ExecutionOutcome::Success,
        Err(e) => {
            sink.set_ambient_exception(ExceptionInfo::new(e.to_string()));
            ExecutionOutcome::Fail
        }
    }
}
