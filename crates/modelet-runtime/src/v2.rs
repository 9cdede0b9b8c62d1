//! HTTP client for the V2 inference protocol repository extension
//!
//! Loads and unloads go through `POST /v2/repository/models/{name}/load|unload`
//! and liveness through `GET /v2/health/live`.

use async_trait::async_trait;
use modelet_core::{ModeletError, ModeletResult, RuntimeError};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::traits::ModelServer;

/// Error body returned by V2 servers on a bad request
#[derive(Debug, Deserialize)]
struct V2ServerError {
    error: String,
}

/// V2 protocol client over HTTP
pub struct V2Client {
    /// Base URL of the inference server
    base_url: String,
    /// HTTP client with the configured request timeout
    client: reqwest::Client,
}

impl V2Client {
    /// Create a new V2 client
    pub fn new(host: &str, port: u16, timeout_secs: u64) -> ModeletResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ModeletError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            client,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn call(&self, model: &str, path: &str) -> Result<(), RuntimeError> {
        let url = self.url(path);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| RuntimeError::Communication(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RuntimeError::Communication(e.to_string()))?;

        debug!(url = %url, status = status.as_u16(), body = %body, "V2 server response");

        if status.is_success() {
            return Ok(());
        }

        match status {
            reqwest::StatusCode::BAD_REQUEST => {
                let reason = serde_json::from_str::<V2ServerError>(&body)
                    .map(|e| e.error)
                    .unwrap_or(body);
                Err(RuntimeError::BadRequest(reason))
            }
            reqwest::StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(model.to_string())),
            _ => Err(RuntimeError::Server {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl ModelServer for V2Client {
    async fn load(&self, model: &str) -> Result<(), RuntimeError> {
        self.call(model, &format!("v2/repository/models/{}/load", model))
            .await
    }

    async fn unload(&self, model: &str) -> Result<(), RuntimeError> {
        self.call(model, &format!("v2/repository/models/{}/unload", model))
            .await
    }

    async fn live(&self) -> Result<(), RuntimeError> {
        let url = self.url("v2/health/live");
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Server liveness check failed");
                Err(RuntimeError::NotLive)
            }
            Err(e) => Err(RuntimeError::Communication(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "v2-http"
    }
}
