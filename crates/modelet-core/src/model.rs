//! Model version, control operation and replica state definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Footprint assumed for a model that declares no memory requirement
pub const DEFAULT_MODEL_MEMORY_BYTES: u64 = 1024 * 1024;

/// A single version of a model assigned to this replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Model name as known to the inference server
    pub name: String,
    /// Version number assigned by the scheduler
    pub version: u32,
    /// Declared memory per instance in bytes
    #[serde(default)]
    pub memory_bytes: u64,
    /// Where the artifact is fetched from
    #[serde(default)]
    pub artifact_uri: Option<String>,
    /// Server-specific settings needed to reissue a load
    #[serde(default)]
    pub server: ServerSettings,
}

impl ModelVersion {
    /// Create a version with default server settings
    pub fn new(name: impl Into<String>, version: u32, memory_bytes: u64) -> Self {
        Self {
            name: name.into(),
            version,
            memory_bytes,
            artifact_uri: None,
            server: ServerSettings::default(),
        }
    }

    /// Memory this version occupies once loaded, across all server instances
    pub fn memory_footprint(&self) -> u64 {
        let per_instance = if self.memory_bytes == 0 {
            DEFAULT_MODEL_MEMORY_BYTES
        } else {
            self.memory_bytes
        };
        per_instance.saturating_mul(u64::from(self.server.instance_count()))
    }

    /// Key used to order control commands for this version
    pub fn versioned_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// Inference server flavour and its instance settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerSettings {
    /// MLServer with parallel inference workers
    Mlserver { instance_count: u32 },
    /// Triton with CPU model instances
    Triton { cpu_instance_count: u32 },
    /// Any other V2 compatible server
    #[default]
    Generic,
}

impl ServerSettings {
    /// Number of copies of the model the server keeps in memory
    pub fn instance_count(&self) -> u32 {
        let count = match self {
            ServerSettings::Mlserver { instance_count } => *instance_count,
            ServerSettings::Triton { cpu_instance_count } => *cpu_instance_count,
            ServerSettings::Generic => 1,
        };
        count.max(1)
    }
}

/// Control-plane command delivered by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOperation {
    /// Load or unload
    pub operation: OperationKind,
    /// The version the command applies to
    pub model_version: ModelVersion,
    /// Monotonically increasing sequence number from the scheduler
    pub tick: u64,
}

/// Kind of control-plane command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Load,
    Unload,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Load => write!(f, "load"),
            OperationKind::Unload => write!(f, "unload"),
        }
    }
}

/// Outcome reported back to the scheduler for a control command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEvent {
    pub model_name: String,
    pub model_version: u32,
    pub event: ModelEventKind,
    /// Error text for failed events
    pub message: Option<String>,
    /// Replica memory after the command, so the scheduler can re-plan
    pub available_memory_bytes: u64,
}

/// Model event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelEventKind {
    Loaded,
    LoadFailed,
    Unloaded,
    UnloadFailed,
}

impl std::fmt::Display for ModelEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelEventKind::Loaded => write!(f, "Loaded"),
            ModelEventKind::LoadFailed => write!(f, "LoadFailed"),
            ModelEventKind::Unloaded => write!(f, "Unloaded"),
            ModelEventKind::UnloadFailed => write!(f, "UnloadFailed"),
        }
    }
}

/// Whether a tracked model is in server memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidencyState {
    Resident,
    Evicted,
}

impl std::fmt::Display for ResidencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResidencyState::Resident => write!(f, "Resident"),
            ResidencyState::Evicted => write!(f, "Evicted"),
        }
    }
}

/// Introspection record for one tracked model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReplicaState {
    pub name: String,
    pub versions: Vec<u32>,
    /// Sum of footprints across tracked versions
    pub memory_bytes: u64,
    pub state: ResidencyState,
    /// Last time the model was touched, if it is resident
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Where a staged artifact landed on local disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub name: String,
    pub version: u32,
    pub path: PathBuf,
}
