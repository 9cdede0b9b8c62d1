//! Local state manager
//!
//! Owns the residency of models on this replica. The scheduler decides which
//! versions are assigned here; this module decides which of them are held in
//! server memory at any time, evicting the least recently used models when a
//! load or a lazy reload needs room.
//!
//! Two lock domains are involved:
//! - control locks serialize scheduler commands for the same model
//! - cache transaction locks keep evictions and reloads of a model apart
//!
//! A holder of one model's transaction lock only ever *tries* to lock another
//! model, so no two operations can wait on each other.

use modelet_cache::{CacheTransactionManager, LockArena};
use modelet_core::{
    ModelReplicaState, ModelVersion, ModeletError, ModeletResult, ResidencyState, RuntimeError,
};
use modelet_runtime::ModelServer;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::memory::MemoryBudget;
use crate::registry::ModelState;

/// Attempts at making a model resident before giving up
const MAX_ENSURE_ATTEMPTS: usize = 3;

/// Extra passes over eviction candidates that were busy
const MAX_BUSY_PASSES: usize = 3;

const BUSY_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Manages model residency and the memory budget of one replica
pub struct LocalStateManager {
    /// Inference server control plane
    server: Arc<dyn ModelServer>,
    /// Tracked versions, resident or evicted
    models: ModelState,
    /// Resident models in eviction order
    cache: CacheTransactionManager,
    /// Memory available for resident models
    memory: MemoryBudget,
    /// Serializes control commands per model
    control_locks: LockArena,
}

impl LocalStateManager {
    /// Create a new state manager with an empty replica
    pub fn new(
        server: Arc<dyn ModelServer>,
        total_memory_bytes: u64,
        overcommit_percentage: u32,
    ) -> Self {
        info!(
            server = server.name(),
            memory_bytes = total_memory_bytes,
            overcommit_percentage = overcommit_percentage,
            "Local state manager initialized"
        );

        Self {
            server,
            models: ModelState::new(),
            cache: CacheTransactionManager::new(),
            memory: MemoryBudget::new(total_memory_bytes, overcommit_percentage),
            control_locks: LockArena::new(),
        }
    }

    /// Track a new version and make its model resident
    ///
    /// Loading a version that is already tracked is a no-op. On failure the
    /// version is not tracked afterwards and the memory counter is unchanged.
    pub async fn load_model_version(&self, version: &ModelVersion) -> ModeletResult<()> {
        let name = version.name.as_str();
        let _control = self.control_locks.write(name).await;

        if self.models.version_exists(name, version.version) {
            info!(model = %version, "Model version already loaded");
            return Ok(());
        }

        info!(
            model = %version,
            memory_bytes = version.memory_footprint(),
            "Loading model version"
        );

        let _txn = self.cache.lock(name).await;
        self.models.add_model_version(version.clone())?;

        // a resident model only needs room for the new version
        let resident = self.cache.cache().exists(name);
        let required = if resident {
            if let Err(e) = self.cache.cache().update_default(name) {
                warn!(model = name, error = %e, "Failed to refresh resident model");
            }
            version.memory_footprint()
        } else {
            match self.models.total_memory(name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.forget_version(version);
                    return Err(e);
                }
            }
        };

        if let Err(e) = self.make_room_if_needed(name, required).await {
            warn!(model = %version, error = %e, "Not enough memory to load model version");
            self.forget_version(version);
            return Err(e);
        }
        if let Err(e) = self.memory.try_debit(name, required) {
            warn!(model = %version, error = %e, "Memory taken by a concurrent load");
            self.forget_version(version);
            return Err(e);
        }

        if let Err(source) = self.server.load(name).await {
            error!(model = %version, error = %source, "Server failed to load model");
            self.forget_version(version);
            self.memory.credit(required);
            return Err(ModeletError::RuntimeLoadFailed {
                model: name.to_string(),
                source,
            });
        }

        self.cache.cache().touch(name);

        info!(
            model = %version,
            debited_bytes = required,
            available_bytes = self.memory.available_bytes(),
            "Model version loaded"
        );
        Ok(())
    }

    /// Stop tracking a version, removing its model from the server if it was
    /// the last one
    pub async fn unload_model_version(&self, version: &ModelVersion) -> ModeletResult<()> {
        self.unload_model_version_with(version, || async {}).await
    }

    /// Like `unload_model_version`, running `release` once the version is
    /// committed to leave
    ///
    /// When other versions of a resident model remain, `release` runs before
    /// the server reload so the server only finds the remaining versions
    /// staged.
    pub async fn unload_model_version_with<F, Fut>(
        &self,
        version: &ModelVersion,
        release: F,
    ) -> ModeletResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let name = version.name.as_str();
        let _control = self.control_locks.write(name).await;

        if !self.models.version_exists(name, version.version) {
            error!(model = %version, "Unload of untracked model version");
            return Err(ModeletError::NotTracked(version.to_string()));
        }

        info!(model = %version, "Unloading model version");

        let _txn = self.cache.lock(name).await;
        let others_remain = self.models.versions(name).len() > 1;

        if self.cache.cache().exists(name) {
            if others_remain {
                // the server reloads whatever versions are still staged
                release().await;
                self.server.load(name).await.map_err(|source| {
                    error!(model = %version, error = %source, "Server failed to reload model");
                    ModeletError::RuntimeLoadFailed {
                        model: name.to_string(),
                        source,
                    }
                })?;
            } else {
                self.unload_from_server(name).await?;
                if let Err(e) = self.cache.cache().delete(name) {
                    warn!(model = name, error = %e, "Model missing from cache during unload");
                }
                release().await;
            }

            match self.models.version_memory(name, version.version) {
                Ok(bytes) => self.memory.credit(bytes),
                Err(e) => warn!(model = %version, error = %e, "Could not credit version memory"),
            }
        } else {
            debug!(model = %version, "Model not resident, nothing to unload from server");
            release().await;
        }

        let last = self.models.remove_model_version(name, version.version)?;
        if last == others_remain {
            warn!(
                model = %version,
                last = last,
                "Version bookkeeping changed during unload"
            );
        }

        info!(
            model = %version,
            available_bytes = self.memory.available_bytes(),
            "Model version unloaded"
        );
        Ok(())
    }

    /// Make sure a tracked model is resident before it serves a request
    ///
    /// Resident models only have their recency refreshed. Evicted models are
    /// reloaded once no matter how many callers race here; the others wait
    /// for that reload and share its outcome on the next attempt.
    pub async fn ensure_load_model(&self, name: &str) -> ModeletResult<()> {
        if !self.models.is_tracked(name) {
            return Err(ModeletError::NotTracked(name.to_string()));
        }

        for attempt in 1..=MAX_ENSURE_ATTEMPTS {
            let (hold, exists) = self.cache.start_reload_if_not_exists(name).await;

            if exists {
                if self.cache.cache().update_default(name).is_ok() {
                    return Ok(());
                }
                debug!(model = name, attempt = attempt, "Model left the cache, retrying");
                continue;
            }

            let result = self.reload(name).await;
            drop(hold);
            return result;
        }

        Err(ModeletError::NotFound(name.to_string()))
    }

    /// Reload an evicted model; the caller holds its transaction lock
    async fn reload(&self, name: &str) -> ModeletResult<()> {
        let required = self.models.total_memory(name)?;
        info!(model = name, memory_bytes = required, "Reloading evicted model");

        self.make_room_if_needed(name, required).await?;
        self.memory.try_debit(name, required)?;

        if let Err(source) = self.server.load(name).await {
            error!(model = name, error = %source, "Server failed to reload model");
            self.memory.credit(required);
            return Err(ModeletError::RuntimeLoadFailed {
                model: name.to_string(),
                source,
            });
        }

        if let Err(e) = self.cache.cache().add_default(name) {
            warn!(model = name, error = %e, "Model already cached after reload");
            self.memory.credit(required);
            self.cache.cache().touch(name);
        }

        info!(
            model = name,
            available_bytes = self.memory.available_bytes(),
            "Model reloaded"
        );
        Ok(())
    }

    /// Evict least recently used models until `required` bytes are free
    ///
    /// `target` is never chosen, nor are models the server refuses to unload.
    /// Models busy in another transaction are only ever tried, never waited
    /// on; once nothing else is left they get a few more passes after a short
    /// pause. Fails with `InsufficientMemory` once no candidate is left.
    async fn make_room_if_needed(&self, target: &str, required: u64) -> ModeletResult<()> {
        if required > self.memory.total_bytes() {
            return Err(self.insufficient(target, required));
        }

        let mut skip = HashSet::from([target.to_string()]);
        let mut busy = HashSet::new();
        let mut busy_passes = 0;

        while self.memory.available_bytes() < required {
            let Ok((candidate, _)) = self.cache.cache().peek_excluding(&skip) else {
                if busy.is_empty() || busy_passes == MAX_BUSY_PASSES {
                    return Err(self.insufficient(target, required));
                }
                busy_passes += 1;
                debug!(
                    model = target,
                    busy = busy.len(),
                    pass = busy_passes,
                    "Retrying busy eviction candidates"
                );
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
                for name in busy.drain() {
                    skip.remove(&name);
                }
                continue;
            };

            let Some((_guard, evicted)) = self.cache.try_start_evict(&candidate) else {
                debug!(model = %candidate, "Eviction candidate busy, skipping");
                busy.insert(candidate.clone());
                skip.insert(candidate);
                continue;
            };
            let Ok(priority) = evicted else {
                // left the cache between peek and lock
                continue;
            };

            let evicted_bytes = match self.models.total_memory(&candidate) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(model = %candidate, error = %e, "Cached model is not tracked");
                    self.rollback_eviction(&candidate, priority);
                    skip.insert(candidate);
                    continue;
                }
            };

            match self.server.unload(&candidate).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    warn!(model = %candidate, "Server did not have evicted model loaded");
                }
                Err(e) => {
                    warn!(model = %candidate, error = %e, "Server failed to unload eviction candidate");
                    self.rollback_eviction(&candidate, priority);
                    skip.insert(candidate);
                    continue;
                }
            }

            if let Err(e) = self.cache.cache().end_evict(&candidate, priority, false) {
                warn!(model = %candidate, error = %e, "Failed to commit eviction");
            }
            self.memory.credit(evicted_bytes);

            info!(
                model = %candidate,
                freed_bytes = evicted_bytes,
                for_model = target,
                "Evicted model"
            );
        }

        Ok(())
    }

    async fn unload_from_server(&self, name: &str) -> ModeletResult<()> {
        match self.server.unload(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(model = name, "Server did not have model loaded");
                Ok(())
            }
            Err(source) => {
                error!(model = name, error = %source, "Server failed to unload model");
                Err(ModeletError::RuntimeUnloadFailed {
                    model: name.to_string(),
                    source,
                })
            }
        }
    }

    fn rollback_eviction(&self, name: &str, priority: i64) {
        if let Err(e) = self.cache.cache().end_evict(name, priority, true) {
            warn!(model = name, error = %e, "Failed to restore eviction candidate");
        }
    }

    fn forget_version(&self, version: &ModelVersion) {
        if let Err(e) = self.models.remove_model_version(&version.name, version.version) {
            warn!(model = %version, error = %e, "Failed to drop version after failed load");
        }
    }

    fn insufficient(&self, model: &str, required: u64) -> ModeletError {
        ModeletError::InsufficientMemory {
            model: model.to_string(),
            required,
            available: self.memory.available_bytes(),
        }
    }

    /// Memory available for new models
    pub fn get_available_memory_bytes(&self) -> u64 {
        self.memory.available_bytes()
    }

    /// Memory available including the over-commit allowance
    pub fn available_memory_with_overcommit(&self) -> u64 {
        self.memory
            .available_with_overcommit(self.models.total_memory_all_models())
    }

    /// Every tracked version, resident or evicted
    pub fn tracked_versions(&self) -> Vec<ModelVersion> {
        self.models.all_versions()
    }

    pub fn version_tracked(&self, name: &str, version: u32) -> bool {
        self.models.version_exists(name, version)
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.memory.total_bytes()
    }

    /// Residency of every tracked model, sorted by name
    pub fn model_states(&self) -> Vec<ModelReplicaState> {
        let mut states: Vec<ModelReplicaState> = self
            .models
            .model_names()
            .into_iter()
            .filter_map(|name| {
                let memory_bytes = self.models.total_memory(&name).ok()?;
                let versions = self.models.versions(&name);
                let state = if self.cache.cache().exists(&name) {
                    ResidencyState::Resident
                } else {
                    ResidencyState::Evicted
                };
                let last_accessed = self.cache.cache().last_accessed(&name);
                Some(ModelReplicaState {
                    name,
                    versions,
                    memory_bytes,
                    state,
                    last_accessed,
                })
            })
            .collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    /// Unload every tracked version, continuing past failures
    pub async fn unload_all_models(&self) -> ModeletResult<()> {
        let versions = self.models.all_versions();
        info!(versions = versions.len(), "Unloading all models");

        let mut first_error = None;
        for version in versions {
            if let Err(e) = self.unload_model_version(&version).await {
                warn!(model = %version, error = %e, "Failed to unload model version");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Check the inference server is live
    pub async fn server_live(&self) -> Result<(), RuntimeError> {
        self.server.live().await
    }

    pub fn server_name(&self) -> &'static str {
        self.server.name()
    }

    /// Drop per-model locks nobody holds
    pub fn trim_locks(&self) -> usize {
        self.cache.trim_locks() + self.control_locks.trim()
    }
}
