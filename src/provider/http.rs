//! HTTP-backed Capability Provider
//!
//! Adapts a remote analysis/generation service exposed over HTTP onto the
//! CapabilityProvider contract. Status classes map onto the provider error
//! taxonomy: 429 and 5xx are transient, other 4xx are permanent, and
//! request timeouts surface as Timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::provider::client::{CapabilityProvider, ProviderContext, ProviderError};

/// Configuration for an HTTP provider endpoint
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Endpoint the stage payload is POSTed to
    pub endpoint: String,
    /// Per-call deadline
    pub timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Capability Provider that POSTs the stage input to a remote service
pub struct HttpProvider {
    client: Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    /// Create a new HTTP provider for the given endpoint.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Permanent(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl CapabilityProvider for HttpProvider {
    async fn execute(&self, input: Value, ctx: &ProviderContext) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-job-id", &ctx.job_id)
            .header("x-attempt", ctx.attempt.to_string())
            .json(&input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.config.timeout.as_millis() as u64)
                } else {
                    ProviderError::Transient(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Transient(format!(
                "{} from {}",
                status, self.config.endpoint
            )));
        }
        if status.is_client_error() {
            return Err(ProviderError::Permanent(format!(
                "{} from {}",
                status, self.config.endpoint
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid response body: {}", e)))
    }
}
