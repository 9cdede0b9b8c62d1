//! In-memory inference server for state tests

use async_trait::async_trait;
use modelet_core::RuntimeError;
use modelet_runtime::ModelServer;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Default)]
pub struct FakeServer {
    loaded: Mutex<HashSet<String>>,
    loads: Mutex<HashMap<String, usize>>,
    unloads: Mutex<HashMap<String, usize>>,
    failing_loads: Mutex<HashSet<String>>,
    failing_unloads: Mutex<HashSet<String>>,
    failing_next_load: Mutex<HashSet<String>>,
    load_delay: Option<Duration>,
    models_path: Option<PathBuf>,
    staged_at_load: Mutex<HashMap<String, Vec<Vec<String>>>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(delay: Duration) -> Self {
        Self {
            load_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Record the versions staged under `models_path` at every load
    pub fn watching(models_path: PathBuf) -> Self {
        Self {
            models_path: Some(models_path),
            ..Self::default()
        }
    }

    pub fn fail_next_load(&self, model: &str) {
        self.failing_next_load.lock().insert(model.to_string());
    }

    pub fn fail_loads(&self, model: &str) {
        self.failing_loads.lock().insert(model.to_string());
    }

    pub fn fail_unloads(&self, model: &str) {
        self.failing_unloads.lock().insert(model.to_string());
    }

    pub fn loads(&self, model: &str) -> usize {
        self.loads.lock().get(model).copied().unwrap_or(0)
    }

    pub fn unloads(&self, model: &str) -> usize {
        self.unloads.lock().get(model).copied().unwrap_or(0)
    }

    /// Staged versions seen by each load of `model`, oldest first
    pub fn staged_at_load(&self, model: &str) -> Vec<Vec<String>> {
        self.staged_at_load
            .lock()
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_loaded(&self, model: &str) -> bool {
        self.loaded.lock().contains(model)
    }
}

#[async_trait]
impl ModelServer for FakeServer {
    async fn load(&self, model: &str) -> Result<(), RuntimeError> {
        *self.loads.lock().entry(model.to_string()).or_default() += 1;
        if let Some(root) = &self.models_path {
            let mut staged: Vec<String> = std::fs::read_dir(root.join(model))
                .map(|entries| {
                    entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            staged.sort();
            self.staged_at_load
                .lock()
                .entry(model.to_string())
                .or_default()
                .push(staged);
        }
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        let fail_once = self.failing_next_load.lock().remove(model);
        if fail_once || self.failing_loads.lock().contains(model) {
            return Err(RuntimeError::Server {
                status: 500,
                body: "load failed".to_string(),
            });
        }
        self.loaded.lock().insert(model.to_string());
        Ok(())
    }

    async fn unload(&self, model: &str) -> Result<(), RuntimeError> {
        *self.unloads.lock().entry(model.to_string()).or_default() += 1;
        if self.failing_unloads.lock().contains(model) {
            return Err(RuntimeError::Server {
                status: 500,
                body: "unload failed".to_string(),
            });
        }
        if !self.loaded.lock().remove(model) {
            return Err(RuntimeError::NotFound(model.to_string()));
        }
        Ok(())
    }

    async fn live(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
