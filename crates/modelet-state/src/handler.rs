//! Scheduler command handling
//!
//! Applies load and unload commands in tick order, staging artifacts through
//! the model repository around the state manager calls, and reports the
//! outcome as a `ModelEvent`.

use modelet_core::{
    ModelEvent, ModelEventKind, ModelOperation, ModelVersion, ModeletResult, OperationKind,
};
use modelet_store::ModelRepository;
use std::sync::Arc;
use tracing::{info, warn};

use crate::sequencer::CommandSequencer;
use crate::state_manager::LocalStateManager;

pub struct CommandHandler {
    state: Arc<LocalStateManager>,
    repository: Arc<dyn ModelRepository>,
    sequencer: CommandSequencer,
}

impl CommandHandler {
    pub fn new(state: Arc<LocalStateManager>, repository: Arc<dyn ModelRepository>) -> Self {
        Self {
            state,
            repository,
            sequencer: CommandSequencer::new(),
        }
    }

    /// Apply one command
    ///
    /// Returns `None` for commands dropped as out of order; the scheduler has
    /// already moved past them.
    pub async fn handle(&self, operation: &ModelOperation) -> Option<ModelEvent> {
        let version = &operation.model_version;

        if let Err(e) = self
            .sequencer
            .admit(&version.versioned_name(), operation.tick)
        {
            warn!(model = %version, error = %e, "Dropping out of order command");
            return None;
        }

        info!(
            model = %version,
            operation = %operation.operation,
            tick = operation.tick,
            "Handling model command"
        );

        let (outcome, success, failure) = match operation.operation {
            OperationKind::Load => (
                self.load(version).await,
                ModelEventKind::Loaded,
                ModelEventKind::LoadFailed,
            ),
            OperationKind::Unload => (
                self.unload(version).await,
                ModelEventKind::Unloaded,
                ModelEventKind::UnloadFailed,
            ),
        };

        let (event, message) = match outcome {
            Ok(()) => (success, None),
            Err(e) => {
                warn!(model = %version, error = %e, "Model command failed");
                (failure, Some(e.to_string()))
            }
        };

        Some(ModelEvent {
            model_name: version.name.clone(),
            model_version: version.version,
            event,
            message,
            available_memory_bytes: self.state.get_available_memory_bytes(),
        })
    }

    async fn load(&self, version: &ModelVersion) -> ModeletResult<()> {
        if version.artifact_uri.is_some() {
            self.repository.download_model_version(version).await?;
        }
        if let Err(e) = self.state.load_model_version(version).await {
            let tracked = self.state.version_tracked(&version.name, version.version);
            if version.artifact_uri.is_some() && !tracked {
                self.remove_artifact(version).await;
            }
            return Err(e);
        }
        Ok(())
    }

    async fn unload(&self, version: &ModelVersion) -> ModeletResult<()> {
        self.state
            .unload_model_version_with(version, || self.remove_artifact(version))
            .await
    }

    /// Unload every tracked version and remove its staged artifact
    ///
    /// Keeps going past failures and returns the first one.
    pub async fn unload_all(&self) -> ModeletResult<()> {
        let mut first_error = None;
        for version in self.state.tracked_versions() {
            if let Err(e) = self.unload(&version).await {
                warn!(model = %version, error = %e, "Failed to unload model version");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn remove_artifact(&self, version: &ModelVersion) {
        if let Err(e) = self
            .repository
            .remove_model_version(&version.name, version.version)
            .await
        {
            warn!(model = %version, error = %e, "Failed to remove staged artifact");
        }
    }

    pub fn state(&self) -> &Arc<LocalStateManager> {
        &self.state
    }
}
