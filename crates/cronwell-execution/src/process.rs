use std::process::Stdio;

use async_trait::async_trait;
use cronwell_core::job::JobKind;
use cronwell_protocol::lifecycle::{parse_line, OutputLine};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecutionError, Result};
use crate::host::{JobContext, JobHost};
use crate::tracker::LifecycleSink;

/// Environment handed to every process job.
pub const ENV_FIRE_INSTANCE_ID: &str = "CRONWELL_FIRE_INSTANCE_ID";
pub const ENV_JOB_GROUP: &str = "CRONWELL_JOB_GROUP";
pub const ENV_JOB_NAME: &str = "CRONWELL_JOB_NAME";
/// Job data as a JSON object.
pub const ENV_JOB_DATA: &str = "CRONWELL_JOB_DATA";

/// Runs a job as a child process. Stdout lines carrying the lifecycle
/// prefix are decoded into events, every other line is logged.
#[derive(Debug, Default)]
pub struct ProcessJobHost;

impl ProcessJobHost {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHost for ProcessJobHost {
    async fn run(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let JobKind::Process {
            command,
            args,
            working_dir,
        } = &ctx.kind
        else {
            return Err(ExecutionError::JobFailed("not a process job".into()));
        };

        let data = serde_json::to_string(&ctx.data)
            .map_err(|e| ExecutionError::JobFailed(format!("job data: {e}")))?;

        let mut cmd = Command::new(command);
        cmd.args(args)
            .env(ENV_FIRE_INSTANCE_ID, &ctx.fire_instance_id)
            .env(ENV_JOB_GROUP, &ctx.job_key.group)
            .env(ENV_JOB_NAME, &ctx.job_key.name)
            .env(ENV_JOB_DATA, data)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        debug!(command = %command, ?args, "spawning process job");
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::Spawn(format!("{command}: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let wait = async {
            tokio::select! {
                status = child.wait() => status.map(Some),
                _ = cancel.cancelled() => {
                    warn!(pid = ?child.id(), "killing process job");
                    match child.start_kill() {
                        Ok(()) => child.wait().await.map(|_| None),
                        Err(e) => Err(e),
                    }
                }
            }
        };

        let (_, _, status) = tokio::join!(
            pump(stdout, sink, true),
            pump(stderr, sink, false),
            wait
        );

        match status? {
            None => Err(ExecutionError::JobFailed("process was killed".into())),
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(ExecutionError::ExitCode {
                code: status.code().unwrap_or(-1),
            }),
        }
    }
}

/// Forward one output stream into the sink until EOF.
async fn pump<R>(reader: Option<R>, sink: &LifecycleSink, decode_events: bool)
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else { return };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = clean_line(&buf);
                if !decode_events {
                    sink.append_log(line);
                    continue;
                }
                match parse_line(&line) {
                    OutputLine::Event(event) => sink.apply(event),
                    OutputLine::Log(text) => sink.append_log(text),
                    OutputLine::Malformed { line, error } => {
                        warn!(fire_instance_id = %sink.fire_instance_id(), %error, "malformed lifecycle line");
                        sink.append_log(line);
                    }
                }
            }
            Err(e) => {
                warn!(fire_instance_id = %sink.fire_instance_id(), err = %e, "process output read failed");
                break;
            }
        }
    }
}

fn clean_line(raw: &[u8]) -> String {
    let clean = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&clean)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_line_strips_colour_and_newline() {
        assert_eq!(clean_line(b"\x1b[31mred\x1b[0m\r\n"), "red");
        assert_eq!(clean_line(b"plain"), "plain");
    }
}
