//! Model versions assigned to this replica
//!
//! Pure bookkeeping: which versions are tracked per model and how much memory
//! they declare. Evicted models stay tracked here; residency lives in the cache.

use modelet_core::{ModelVersion, ModeletError, ModeletResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct TrackedModel {
    versions: BTreeMap<u32, ModelVersion>,
    /// Sum of `memory_footprint` over `versions`
    total_memory: u64,
}

/// Registry of tracked model versions
#[derive(Default)]
pub struct ModelState {
    models: RwLock<HashMap<String, TrackedModel>>,
}

impl ModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new version, returning whether it is the model's first
    ///
    /// Re-adding an identical version is a no-op; re-adding a version number
    /// with a different descriptor is a `VersionConflict`.
    pub fn add_model_version(&self, version: ModelVersion) -> ModeletResult<bool> {
        let mut models = self.models.write();
        let model = models.entry(version.name.clone()).or_default();

        if let Some(existing) = model.versions.get(&version.version) {
            if *existing == version {
                return Ok(false);
            }
            return Err(ModeletError::VersionConflict(format!(
                "{} is already tracked with a different descriptor",
                version
            )));
        }

        let first = model.versions.is_empty();
        model.total_memory = model
            .total_memory
            .saturating_add(version.memory_footprint());
        model.versions.insert(version.version, version);
        Ok(first)
    }

    /// Stop tracking a version, returning whether the model has none left
    pub fn remove_model_version(&self, name: &str, version: u32) -> ModeletResult<bool> {
        let mut models = self.models.write();
        let Some(model) = models.get_mut(name) else {
            return Ok(true);
        };

        let removed = model.versions.remove(&version).ok_or_else(|| {
            ModeletError::NotTracked(format!("{} version {}", name, version))
        })?;
        model.total_memory = model
            .total_memory
            .saturating_sub(removed.memory_footprint());

        if model.versions.is_empty() {
            models.remove(name);
            return Ok(true);
        }
        Ok(false)
    }

    /// Memory of all tracked versions of `name`
    pub fn total_memory(&self, name: &str) -> ModeletResult<u64> {
        self.models
            .read()
            .get(name)
            .map(|m| m.total_memory)
            .ok_or_else(|| ModeletError::NotTracked(name.to_string()))
    }

    /// Memory of a single tracked version
    pub fn version_memory(&self, name: &str, version: u32) -> ModeletResult<u64> {
        self.models
            .read()
            .get(name)
            .and_then(|m| m.versions.get(&version))
            .map(|v| v.memory_footprint())
            .ok_or_else(|| ModeletError::NotTracked(format!("{} version {}", name, version)))
    }

    pub fn version_exists(&self, name: &str, version: u32) -> bool {
        self.models
            .read()
            .get(name)
            .map_or(false, |m| m.versions.contains_key(&version))
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.models.read().contains_key(name)
    }

    /// Tracked version numbers of `name`, ascending
    pub fn versions(&self, name: &str) -> Vec<u32> {
        self.models
            .read()
            .get(name)
            .map(|m| m.versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every tracked version of every model
    pub fn all_versions(&self) -> Vec<ModelVersion> {
        self.models
            .read()
            .values()
            .flat_map(|m| m.versions.values().cloned())
            .collect()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models.read().keys().cloned().collect()
    }

    pub fn num_models(&self) -> usize {
        self.models.read().len()
    }

    /// Memory of everything tracked, resident or evicted
    pub fn total_memory_all_models(&self) -> u64 {
        self.models
            .read()
            .values()
            .map(|m| m.total_memory)
            .fold(0u64, u64::saturating_add)
    }
}
