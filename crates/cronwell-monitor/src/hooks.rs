use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use cronwell_core::config::WebhookHookConfig;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::error::{MonitorError, Result};
use crate::events::MonitorMessage;

type HmacSha256 = Hmac<Sha256>;

pub const LOG_HOOK: &str = "log";
pub const SIGNATURE_HEADER: &str = "X-Cronwell-Signature-256";
pub const EVENT_HEADER: &str = "X-Cronwell-Event";

/// A named alert sink a monitor action can point at.
#[async_trait]
pub trait MonitorHook: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, message: &MonitorMessage) -> Result<()>;
}

/// Writes the alert to the service log.
pub struct LogHook;

#[async_trait]
impl MonitorHook for LogHook {
    fn name(&self) -> &str {
        LOG_HOOK
    }

    async fn handle(&self, message: &MonitorMessage) -> Result<()> {
        let job = message
            .details
            .job_key
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_default();
        info!(
            event = %message.event,
            monitor = %message.monitor_title,
            group_id = message.group_id,
            job = %job,
            fire_instance_id = message.details.fire_instance_id.as_deref().unwrap_or(""),
            "monitor alert"
        );
        Ok(())
    }
}

/// POSTs the alert as JSON. With a secret, the body is signed with
/// HMAC-SHA256 in `X-Cronwell-Signature-256: sha256=<hex>`.
pub struct WebhookHook {
    name: String,
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookHook {
    pub fn new(cfg: &WebhookHookConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MonitorError::hook(&cfg.name, e))?;
        Ok(Self {
            name: cfg.name.clone(),
            url: cfg.url.clone(),
            secret: cfg.secret.clone(),
            client,
        })
    }
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MonitorError::hook("webhook", e))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl MonitorHook for WebhookHook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &MonitorMessage) -> Result<()> {
        let body = serde_json::to_vec(message).map_err(|e| MonitorError::hook(&self.name, e))?;
        let mut req = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, message.event.as_str());
        if let Some(secret) = &self.secret {
            req = req.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, &body)?));
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| MonitorError::hook(&self.name, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(hook = %self.name, status = status.as_u16(), body = %text, "webhook hook rejected alert");
            return Err(MonitorError::hook(&self.name, format!("status {status}")));
        }
        debug!(hook = %self.name, "webhook delivered");
        Ok(())
    }
}

/// Hooks by name. The log hook is always present.
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, Arc<dyn MonitorHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        let registry = Self {
            hooks: RwLock::new(HashMap::new()),
        };
        registry.register(Arc::new(LogHook));
        registry
    }

    /// Log hook plus one webhook hook per configured entry.
    pub fn from_config(webhooks: &[WebhookHookConfig], timeout: Duration) -> Result<Self> {
        let registry = Self::new();
        for cfg in webhooks {
            registry.register(Arc::new(WebhookHook::new(cfg, timeout)?));
        }
        Ok(registry)
    }

    /// Replaces a hook registered under the same name.
    pub fn register(&self, hook: Arc<dyn MonitorHook>) {
        let name = hook.name().to_string();
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), hook);
        debug!(hook = %name, "monitor hook registered");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MonitorHook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
