//! Runtime trait definitions

use async_trait::async_trait;
use modelet_core::RuntimeError;

/// Load/unload control plane of an inference server
///
/// The server loads whatever versions of a model are staged on local disk,
/// so calls are keyed by model name only.
#[async_trait]
pub trait ModelServer: Send + Sync {
    /// Load (or reload) a model into server memory
    async fn load(&self, model: &str) -> Result<(), RuntimeError>;

    /// Unload a model from server memory
    async fn unload(&self, model: &str) -> Result<(), RuntimeError>;

    /// Check the server is up
    async fn live(&self) -> Result<(), RuntimeError>;

    /// Get the server client name
    fn name(&self) -> &'static str;
}
