//! Model repository staging artifacts on local disk
//!
//! Artifacts land in `<models_path>/<name>/<version>/`, the layout V2 servers
//! scan when asked to load a model by name.

use async_trait::async_trait;
use modelet_core::{ModelVersion, ModeletError, ModeletResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stages model versions where the inference server can load them
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Stage the artifact of `model` and return its local path
    async fn download_model_version(&self, model: &ModelVersion) -> ModeletResult<PathBuf>;

    /// Reclaim the disk space of one staged version
    async fn remove_model_version(&self, name: &str, version: u32) -> ModeletResult<()>;
}

/// Repository that copies artifacts from local paths or `file://` URIs
pub struct LocalRepository {
    /// Directory the inference server loads models from
    models_path: PathBuf,
}

impl LocalRepository {
    /// Create a new local repository
    pub fn new(models_path: PathBuf) -> Self {
        Self { models_path }
    }

    /// Create the models directory if needed
    pub async fn init(&self) -> ModeletResult<()> {
        if !self.models_path.exists() {
            tokio::fs::create_dir_all(&self.models_path).await?;
            info!(path = %self.models_path.display(), "Created models directory");
        }
        Ok(())
    }

    /// Directory holding every staged version of `name`
    pub fn model_path(&self, name: &str) -> ModeletResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ModeletError::Storage(format!("Invalid model name: {:?}", name)));
        }
        Ok(self.models_path.join(name))
    }

    /// Directory holding one staged version
    pub fn version_path(&self, name: &str, version: u32) -> ModeletResult<PathBuf> {
        Ok(self.model_path(name)?.join(version.to_string()))
    }

    /// Versions of `name` currently staged on disk
    pub async fn staged_versions(&self, name: &str) -> ModeletResult<Vec<u32>> {
        let path = self.model_path(name)?;
        let mut versions = Vec::new();

        if !path.exists() {
            return Ok(versions);
        }

        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(version) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    fn source_path(uri: &str) -> ModeletResult<PathBuf> {
        if let Some(path) = uri.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if uri.contains("://") {
            return Err(ModeletError::Storage(format!(
                "Unsupported artifact location: {}",
                uri
            )));
        }
        Ok(PathBuf::from(uri))
    }
}

/// Copy a file or directory tree into `dest`
async fn copy_tree(source: &Path, dest: &Path) -> ModeletResult<()> {
    tokio::fs::create_dir_all(dest).await?;

    if tokio::fs::metadata(source).await?.is_file() {
        let file_name = source
            .file_name()
            .ok_or_else(|| ModeletError::Storage(format!("Invalid artifact: {}", source.display())))?;
        tokio::fs::copy(source, dest.join(file_name)).await?;
        return Ok(());
    }

    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ModelRepository for LocalRepository {
    async fn download_model_version(&self, model: &ModelVersion) -> ModeletResult<PathBuf> {
        let uri = model.artifact_uri.as_deref().ok_or_else(|| {
            ModeletError::Storage(format!("No artifact location for {}", model))
        })?;
        let source = Self::source_path(uri)?;
        let dest = self.version_path(&model.name, model.version)?;

        if dest.exists() {
            debug!(model = %model, path = %dest.display(), "Replacing staged version");
            tokio::fs::remove_dir_all(&dest).await?;
        }

        copy_tree(&source, &dest).await?;

        info!(
            model = %model.name,
            version = model.version,
            path = %dest.display(),
            "Staged model version"
        );
        Ok(dest)
    }

    async fn remove_model_version(&self, name: &str, version: u32) -> ModeletResult<()> {
        let path = self.version_path(name, version)?;

        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
            info!(model = name, version = version, "Removed staged model version");
        } else {
            warn!(model = name, version = version, "No staged files to remove");
        }

        // drop the model directory once its last version is gone
        let model_path = self.model_path(name)?;
        if tokio::fs::remove_dir(&model_path).await.is_ok() {
            debug!(model = name, "Removed empty model directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(dir: &Path) -> PathBuf {
        let source = dir.join("source");
        std::fs::create_dir_all(source.join("weights")).unwrap();
        std::fs::write(source.join("model-settings.json"), "{}").unwrap();
        std::fs::write(source.join("weights").join("model.bin"), "0101").unwrap();
        source
    }

    #[test]
    fn test_model_path() {
        let repo = LocalRepository::new(PathBuf::from("/mnt/agent/models"));
        assert_eq!(
            repo.version_path("iris", 3).unwrap(),
            PathBuf::from("/mnt/agent/models/iris/3")
        );
        assert!(repo.model_path("../etc").is_err());
        assert!(repo.model_path("").is_err());
    }

    #[test]
    fn test_source_path() {
        assert_eq!(
            LocalRepository::source_path("file:///data/iris").unwrap(),
            PathBuf::from("/data/iris")
        );
        assert_eq!(
            LocalRepository::source_path("/data/iris").unwrap(),
            PathBuf::from("/data/iris")
        );
        assert!(LocalRepository::source_path("s3://bucket/iris").is_err());
    }

    #[tokio::test]
    async fn test_stage_and_remove_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = artifact(dir.path());
        let repo = LocalRepository::new(dir.path().join("models"));
        repo.init().await.unwrap();

        let mut mv = ModelVersion::new("iris", 1, 100);
        mv.artifact_uri = Some(format!("file://{}", source.display()));

        let path = repo.download_model_version(&mv).await.unwrap();
        assert!(path.join("model-settings.json").exists());
        assert!(path.join("weights").join("model.bin").exists());

        mv.version = 2;
        repo.download_model_version(&mv).await.unwrap();
        assert_eq!(repo.staged_versions("iris").await.unwrap(), vec![1, 2]);

        repo.remove_model_version("iris", 1).await.unwrap();
        assert_eq!(repo.staged_versions("iris").await.unwrap(), vec![2]);

        repo.remove_model_version("iris", 2).await.unwrap();
        assert!(!repo.model_path("iris").unwrap().exists());
    }

    #[tokio::test]
    async fn test_stage_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.onnx");
        std::fs::write(&file, "onnx").unwrap();
        let repo = LocalRepository::new(dir.path().join("models"));

        let mut mv = ModelVersion::new("mnist", 4, 100);
        mv.artifact_uri = Some(file.display().to_string());

        let path = repo.download_model_version(&mv).await.unwrap();
        assert!(path.join("model.onnx").exists());
    }

    #[tokio::test]
    async fn test_stage_without_uri_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new(dir.path().to_path_buf());
        let mv = ModelVersion::new("iris", 1, 100);

        let result = repo.download_model_version(&mv).await;
        assert!(matches!(result, Err(ModeletError::Storage(_))));
    }
}
