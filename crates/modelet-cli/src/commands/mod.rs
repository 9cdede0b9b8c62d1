//! CLI commands implementation

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// API client for communicating with the daemon
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Tracked model from API
#[derive(Debug, Deserialize)]
pub struct ModelResponse {
    pub name: String,
    pub versions: Vec<u32>,
    pub memory_bytes: u64,
    pub state: String,
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Memory report from API
#[derive(Debug, Deserialize)]
pub struct MemoryResponse {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub available_with_overcommit_bytes: u64,
}

/// Outcome of a load or unload command
#[derive(Debug, Deserialize)]
pub struct EventResponse {
    pub model_name: String,
    pub model_version: u32,
    pub event: String,
    pub message: Option<String>,
    pub available_memory_bytes: u64,
}

/// Status response
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub server: String,
    pub server_live: bool,
    pub models: usize,
    pub resident_models: usize,
    pub available_memory_bytes: u64,
}

#[derive(Serialize)]
struct VersionRequest {
    name: String,
    version: u32,
    memory_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact_uri: Option<String>,
}

#[derive(Serialize)]
struct OperationRequest {
    operation: &'static str,
    model_version: VersionRequest,
    tick: u64,
}

/// Default tick for hand-issued commands
fn now_tick() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Render a byte count for humans
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// List tracked models
pub async fn models(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/models"))
        .send()
        .await?;

    if response.status().is_success() {
        let models: Vec<ModelResponse> = response.json().await?;

        if models.is_empty() {
            println!("No models tracked");
        } else {
            println!(
                "{:<30} {:<15} {:<12} {:<10} {:<25}",
                "NAME", "VERSIONS", "MEMORY", "STATE", "LAST ACCESSED"
            );
            println!("{}", "-".repeat(95));
            for model in models {
                let versions: Vec<String> = model.versions.iter().map(|v| v.to_string()).collect();
                let last_accessed = model
                    .last_accessed
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<30} {:<15} {:<12} {:<10} {:<25}",
                    model.name,
                    versions.join(","),
                    format_bytes(model.memory_bytes),
                    model.state,
                    last_accessed
                );
            }
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to list models: {}", error);
    }

    Ok(())
}

/// Show replica memory
pub async fn memory(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/memory"))
        .send()
        .await?;

    if response.status().is_success() {
        let memory: MemoryResponse = response.json().await?;
        println!("Total:     {}", format_bytes(memory.total_bytes));
        println!("Available: {}", format_bytes(memory.available_bytes));
        println!(
            "Available with over-commit: {}",
            format_bytes(memory.available_with_overcommit_bytes)
        );
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get memory: {}", error);
    }

    Ok(())
}

async fn send_operation(client: &ApiClient, request: &OperationRequest) -> Result<()> {
    let response = client
        .client
        .post(client.url("/api/v1/operations"))
        .json(request)
        .send()
        .await?;

    if response.status().is_success() {
        let event: EventResponse = response.json().await?;
        println!(
            "{}:{} {} (available memory: {})",
            event.model_name,
            event.model_version,
            event.event,
            format_bytes(event.available_memory_bytes)
        );
        if let Some(message) = event.message {
            eprintln!("  {}", message);
        }
    } else {
        let error = response.text().await?;
        eprintln!("Failed to {} model: {}", request.operation, error);
    }

    Ok(())
}

/// Load a model version
pub async fn load(
    client: &ApiClient,
    name: String,
    version: u32,
    memory_bytes: u64,
    artifact: Option<String>,
    tick: Option<u64>,
) -> Result<()> {
    let request = OperationRequest {
        operation: "load",
        model_version: VersionRequest {
            name,
            version,
            memory_bytes,
            artifact_uri: artifact,
        },
        tick: tick.unwrap_or_else(now_tick),
    };
    send_operation(client, &request).await
}

/// Unload a model version
pub async fn unload(client: &ApiClient, name: String, version: u32, tick: Option<u64>) -> Result<()> {
    let request = OperationRequest {
        operation: "unload",
        model_version: VersionRequest {
            name,
            version,
            memory_bytes: 0,
            artifact_uri: None,
        },
        tick: tick.unwrap_or_else(now_tick),
    };
    send_operation(client, &request).await
}

/// Make a model resident
pub async fn ensure(client: &ApiClient, name: String) -> Result<()> {
    let response = client
        .client
        .post(client.url(&format!("/api/v1/models/{}/ensure", name)))
        .send()
        .await?;

    if response.status().is_success() {
        println!("Model '{}' is loaded", name);
    } else {
        let error = response.text().await?;
        eprintln!("Failed to load model '{}': {}", name, error);
    }

    Ok(())
}

/// Show system status
pub async fn status(client: &ApiClient) -> Result<()> {
    let response = client
        .client
        .get(client.url("/api/v1/status"))
        .send()
        .await?;

    if response.status().is_success() {
        let status: StatusResponse = response.json().await?;

        println!("modelet v{}", status.version);
        println!();
        println!(
            "Server: {} ({})",
            status.server,
            if status.server_live { "live" } else { "not live" }
        );
        println!("Models: {} tracked, {} resident", status.models, status.resident_models);
        println!("Available memory: {}", format_bytes(status.available_memory_bytes));
    } else {
        let error = response.text().await?;
        eprintln!("Failed to get status: {}", error);
    }

    Ok(())
}
