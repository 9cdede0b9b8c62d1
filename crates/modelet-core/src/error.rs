//! Error types for modelet

use thiserror::Error;

/// Main error type for modelet
#[derive(Error, Debug)]
pub enum ModeletError {
    /// Operation referenced a model or version the registry does not know about
    #[error("Model not tracked: {0}")]
    NotTracked(String),

    /// Version bookkeeping mismatch
    #[error("Version conflict: {0}")]
    VersionConflict(String),

    /// Cache miss during an operation expecting presence
    #[error("Not found in cache: {0}")]
    NotFound(String),

    /// Cache insert for a name that already has an entry
    #[error("Already in cache: {0}")]
    AlreadyExists(String),

    /// Eviction attempted with nothing resident
    #[error("Cache is empty")]
    EmptyCache,

    /// No amount of eviction can satisfy the request
    #[error("Insufficient memory for {model}: required {required} bytes, available {available} bytes")]
    InsufficientMemory {
        model: String,
        required: u64,
        available: u64,
    },

    /// The inference runtime rejected a load
    #[error("Runtime failed to load {model}: {source}")]
    RuntimeLoadFailed {
        model: String,
        #[source]
        source: RuntimeError,
    },

    /// The inference runtime rejected an unload
    #[error("Runtime failed to unload {model}: {source}")]
    RuntimeUnloadFailed {
        model: String,
        #[source]
        source: RuntimeError,
    },

    /// A control command arrived with a stale tick
    #[error("Out of order command for {key}: tick {tick} is older than {last_applied}")]
    OutOfOrder {
        key: String,
        tick: u64,
        last_applied: u64,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ModeletError {
    /// Whether retrying the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ModeletError::RuntimeLoadFailed { source, .. }
            | ModeletError::RuntimeUnloadFailed { source, .. } => source.is_retryable(),
            ModeletError::InsufficientMemory { .. } | ModeletError::NotFound(_) => true,
            _ => false,
        }
    }
}

/// Errors reported by the inference server control plane
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The server refused the request as malformed
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server does not know the model
    #[error("model not found on server: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("server error (status {status}): {body}")]
    Server { status: u16, body: String },

    /// The request never reached the server
    #[error("communication error: {0}")]
    Communication(String),

    /// The server answered but is not live
    #[error("server not live")]
    NotLive,
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, RuntimeError::BadRequest(_))
    }

    /// Bad requests will fail the same way again
    pub fn is_retryable(&self) -> bool {
        !self.is_bad_request()
    }
}

/// Result type for modelet operations
pub type ModeletResult<T> = Result<T, ModeletError>;

impl From<serde_json::Error> for ModeletError {
    fn from(err: serde_json::Error) -> Self {
        ModeletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ModeletError {
    fn from(err: toml::de::Error) -> Self {
        ModeletError::Config(err.to_string())
    }
}
