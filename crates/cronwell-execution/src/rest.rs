use std::time::Instant;

use async_trait::async_trait;
use cronwell_core::job::{JobKind, RestMethod};
use cronwell_core::types::clip;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ExecutionError, Result};
use crate::host::{JobContext, JobHost};
use crate::tracker::LifecycleSink;

const MAX_ERROR_BODY: usize = 1000;

/// Runs a job as a single HTTP request. Any non-2xx status fails the run.
pub struct RestJobHost {
    client: reqwest::Client,
}

impl RestJobHost {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ExecutionError::Request(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn method_of(method: RestMethod) -> Method {
    match method {
        RestMethod::Get => Method::GET,
        RestMethod::Post => Method::POST,
        RestMethod::Put => Method::PUT,
        RestMethod::Patch => Method::PATCH,
        RestMethod::Delete => Method::DELETE,
    }
}

#[async_trait]
impl JobHost for RestJobHost {
    async fn run(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> Result<()> {
        let JobKind::Rest {
            method,
            url,
            body,
            headers,
            bearer_token,
            log_response,
        } = &ctx.kind
        else {
            return Err(ExecutionError::JobFailed("not a rest job".into()));
        };

        let method = method_of(*method);
        let mut req = self.client.request(method.clone(), url);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer_token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            let has_content_type = headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
            if !has_content_type {
                req = req.header(CONTENT_TYPE, "application/json");
            }
            req = req.body(body.clone());
        }

        sink.append_log(format!("[rest] {method} {url}"));
        debug!(%method, url = %url, "sending rest job request");
        let started = Instant::now();

        let resp = tokio::select! {
            resp = req.send() => resp.map_err(|e| ExecutionError::Request(e.to_string()))?,
            _ = cancel.cancelled() => {
                return Err(ExecutionError::JobFailed("request cancelled".into()));
            }
        };

        let status = resp.status();
        let elapsed = started.elapsed().as_millis();
        sink.append_log(format!("[rest] status {} in {elapsed}ms", status.as_u16()));

        let text = resp.text().await.unwrap_or_default();
        if *log_response && !text.is_empty() {
            sink.append_log(text.clone());
        }

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %clip(&text, MAX_ERROR_BODY), "rest job returned error status");
            return Err(ExecutionError::Http {
                status: status.as_u16(),
                message: clip(&text, MAX_ERROR_BODY),
            });
        }
        Ok(())
    }
}
