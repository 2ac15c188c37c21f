use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;

use crate::config::AgentConfig;
use crate::kernel::event::Event;

/// Request/response delivery of a whole batch. A batch is delivered or not
/// as a unit; any `Err` hands the full batch back to the queue.
#[async_trait]
pub trait BulkTransport: Send + Sync {
    async fn send(&self, batch: &[Event]) -> Result<()>;
}

/// Fire-and-forget delivery that survives process teardown (the host's
/// beacon primitive). Returns whether the host accepted the payload.
pub trait UnloadBeacon: Send + Sync {
    fn send_beacon(&self, batch: &[Event]) -> bool;
}

#[derive(Clone)]
pub struct HttpBulkTransport {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpBulkTransport {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(config.http_timeout())
                .build()
                .unwrap_or_default(),
            endpoint: config.http_endpoint.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl BulkTransport for HttpBulkTransport {
    async fn send(&self, batch: &[Event]) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .json(batch)
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        if !response.status().is_success() {
            return Err(anyhow!("Collector rejected batch of {}: {}", batch.len(), response.status()));
        }
        Ok(())
    }
}
