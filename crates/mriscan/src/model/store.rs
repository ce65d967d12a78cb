use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::ModelStoreError;
use crate::model::metadata::ModelMetadata;
use crate::model::network::ClassifierNet;

const WEIGHTS_FILE: &str = "model.mpk";
const METADATA_FILE: &str = "metadata.json";
const ACTIVE_FILE: &str = "ACTIVE";

type Recorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Versioned model artifacts on disk:
///
/// ```text
/// <root>/v1/model.mpk
/// <root>/v1/metadata.json
/// <root>/ACTIVE
/// ```
///
/// A directory only counts as a version once its metadata exists.
#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn version_dir(&self, version: u32) -> PathBuf {
        self.root.join(format!("v{}", version))
    }

    /// Writes the weights for `version`. Weights land in a hidden staging
    /// directory first and are renamed into place, so a half-written
    /// version directory never exists.
    pub fn save<B: Backend>(
        &self,
        net: &ClassifierNet<B>,
        version: u32,
    ) -> Result<PathBuf, ModelStoreError> {
        let target = self.version_dir(version);
        if target.exists() {
            return Err(ModelStoreError::VersionConflict(version));
        }
        ensure_dir(&self.root)?;

        let staging = self
            .root
            .join(format!(".staging-v{}-{}", version, uuid::Uuid::new_v4().simple()));
        ensure_dir(&staging)?;

        if let Err(e) = net
            .clone()
            .save_file(staging.join(WEIGHTS_FILE), &Recorder::new())
        {
            remove_staging(&staging);
            return Err(ModelStoreError::Record(e.to_string()));
        }

        if target.exists() {
            remove_staging(&staging);
            return Err(ModelStoreError::VersionConflict(version));
        }
        if let Err(e) = std::fs::rename(&staging, &target) {
            remove_staging(&staging);
            return Err(ModelStoreError::Io {
                path: target,
                source: e,
            });
        }

        log::debug!("Stored weights for v{} at {:?}", version, target);
        Ok(target)
    }

    pub fn save_metadata(
        &self,
        metadata: &ModelMetadata,
        version: u32,
    ) -> Result<PathBuf, ModelStoreError> {
        let dir = self.version_dir(version);
        if !dir.is_dir() {
            return Err(ModelStoreError::ModelNotFound(version));
        }
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(metadata)?;
        write_atomic(&path, &json)?;
        Ok(path)
    }

    /// Saves weights and metadata as one version. If the metadata cannot be
    /// written the version directory is removed again.
    pub fn write_version<B: Backend>(
        &self,
        net: &ClassifierNet<B>,
        metadata: &ModelMetadata,
    ) -> Result<PathBuf, ModelStoreError> {
        let _span = tracing::info_span!("write_version", version = metadata.version).entered();

        let dir = self.save(net, metadata.version)?;
        if let Err(e) = self.save_metadata(metadata, metadata.version) {
            if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                log::warn!("Failed to remove incomplete version {:?}: {}", dir, cleanup);
            }
            return Err(e);
        }

        log::info!("Wrote model version {}", metadata.version_label());
        Ok(dir)
    }

    pub fn load_metadata(&self, version: u32) -> Result<ModelMetadata, ModelStoreError> {
        let path = self.version_dir(version).join(METADATA_FILE);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelStoreError::ModelNotFound(version));
            }
            Err(e) => return Err(ModelStoreError::Io { path, source: e }),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn load<B: Backend>(
        &self,
        version: u32,
        device: &B::Device,
    ) -> Result<(ClassifierNet<B>, ModelMetadata), ModelStoreError> {
        let metadata = self.load_metadata(version)?;
        let weights = self.version_dir(version).join(WEIGHTS_FILE);
        if !weights.is_file() {
            return Err(ModelStoreError::ModelNotFound(version));
        }

        let net = ClassifierNet::<B>::new(&metadata.network_config(), device)
            .load_file(weights, &Recorder::new(), device)
            .map_err(|e| ModelStoreError::Record(e.to_string()))?;

        Ok((net, metadata))
    }

    /// Complete versions in ascending order.
    pub fn list_versions(&self) -> Result<Vec<u32>, ModelStoreError> {
        let mut versions: Vec<u32> = self
            .version_dirs()?
            .into_iter()
            .filter(|(_, path)| path.join(METADATA_FILE).is_file())
            .map(|(version, _)| version)
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Metadata for every complete version, oldest first. Unreadable
    /// entries are skipped.
    pub fn list_metadata(&self) -> Result<Vec<ModelMetadata>, ModelStoreError> {
        let mut all = Vec::new();
        for version in self.list_versions()? {
            match self.load_metadata(version) {
                Ok(metadata) => all.push(metadata),
                Err(e) => log::warn!("Skipping model v{}: {}", version, e),
            }
        }
        Ok(all)
    }

    pub fn latest_version(&self) -> Result<u32, ModelStoreError> {
        self.list_versions()?
            .last()
            .copied()
            .ok_or(ModelStoreError::NoVersions)
    }

    /// One past the highest version directory, complete or not.
    pub fn next_version(&self) -> Result<u32, ModelStoreError> {
        let highest = self
            .version_dirs()?
            .into_iter()
            .map(|(version, _)| version)
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    pub fn set_active(&self, version: u32) -> Result<(), ModelStoreError> {
        if !self.version_dir(version).join(METADATA_FILE).is_file() {
            return Err(ModelStoreError::ModelNotFound(version));
        }
        ensure_dir(&self.root)?;
        write_atomic(&self.root.join(ACTIVE_FILE), format!("{}\n", version).as_bytes())
    }

    /// Deletes a version. Its metadata goes first so a partial removal is
    /// no longer listed as complete.
    pub fn remove_version(&self, version: u32) -> Result<(), ModelStoreError> {
        let dir = self.version_dir(version);
        if !dir.is_dir() {
            return Err(ModelStoreError::ModelNotFound(version));
        }
        let metadata = dir.join(METADATA_FILE);
        if metadata.is_file() {
            std::fs::remove_file(&metadata).map_err(|e| ModelStoreError::Io {
                path: metadata.clone(),
                source: e,
            })?;
        }
        std::fs::remove_dir_all(&dir).map_err(|e| ModelStoreError::Io {
            path: dir.clone(),
            source: e,
        })?;
        log::info!("Removed model version v{}", version);
        Ok(())
    }

    pub fn active_version(&self) -> Result<Option<u32>, ModelStoreError> {
        let path = self.root.join(ACTIVE_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ModelStoreError::Io { path, source: e }),
        };
        match content.trim().trim_start_matches('v').parse::<u32>() {
            Ok(version) => Ok(Some(version)),
            Err(_) => {
                log::warn!("Ignoring malformed active pointer {:?}: {:?}", path, content);
                Ok(None)
            }
        }
    }

    fn version_dirs(&self) -> Result<Vec<(u32, PathBuf)>, ModelStoreError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ModelStoreError::Io {
                    path: self.root.clone(),
                    source: e,
                })
            }
        };

        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(version) = parse_version_dir(name) {
                dirs.push((version, path));
            }
        }
        Ok(dirs)
    }
}

fn parse_version_dir(name: &str) -> Option<u32> {
    let digits = name.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn ensure_dir(path: &Path) -> Result<(), ModelStoreError> {
    std::fs::create_dir_all(path).map_err(|e| ModelStoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn remove_staging(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        log::warn!("Failed to remove staging directory {:?}: {}", path, e);
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ModelStoreError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    std::fs::write(&tmp, content).map_err(|e| ModelStoreError::Io {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        ModelStoreError::Io {
            path: path.to_path_buf(),
            source: e,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::metadata::ModelMetrics;
    use crate::model::network::{images_to_tensor, NetworkConfig};
    use crate::model::InferenceBackend;
    use crate::preprocess::{ImageTensor, Normalization};
    use tempfile::TempDir;

    fn metadata(version: u32) -> ModelMetadata {
        ModelMetadata {
            version,
            name: "test".to_string(),
            architecture: "test-arch".to_string(),
            input_shape: [4, 4, 3],
            class_labels: vec!["A".into(), "B".into(), "C".into()],
            metrics: ModelMetrics::default(),
            created_at: chrono::Utc::now(),
            learning_rate: 1e-3,
            batch_size: 2,
            epochs_requested: 1,
            epochs_trained: 1,
            samples_used: 3,
            parent_version: None,
            hidden_units: 4,
            pool_size: 2,
            dropout: 0.0,
            normalization: Normalization::UnitScale,
        }
    }

    fn net(meta: &ModelMetadata) -> ClassifierNet<InferenceBackend> {
        ClassifierNet::new(&meta.network_config(), &Default::default())
    }

    #[test]
    fn test_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path().join("models"));
        assert!(store.list_versions().unwrap().is_empty());
        assert_eq!(store.next_version().unwrap(), 1);
        assert!(matches!(
            store.latest_version(),
            Err(ModelStoreError::NoVersions)
        ));
        assert_eq!(store.active_version().unwrap(), None);
    }

    #[test]
    fn test_write_and_load_round_trip_preserves_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        let meta = metadata(1);
        let original = net(&meta);

        store.write_version(&original, &meta).unwrap();
        assert_eq!(store.list_versions().unwrap(), vec![1]);

        let device = Default::default();
        let (loaded, loaded_meta) = store.load::<InferenceBackend>(1, &device).unwrap();
        assert_eq!(loaded_meta, meta);

        let image = ImageTensor {
            data: (0..48).map(|i| i as f32 / 48.0).collect(),
            height: 4,
            width: 4,
        };
        let input = images_to_tensor::<InferenceBackend>(&[&image], &device).unwrap();
        let a: Vec<f32> = original.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_existing_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        let meta = metadata(1);
        store.write_version(&net(&meta), &meta).unwrap();

        let result = store.save(&net(&meta), 1);
        assert!(matches!(result, Err(ModelStoreError::VersionConflict(1))));
    }

    #[test]
    fn test_versions_without_metadata_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        let meta = metadata(1);
        store.save(&net(&meta), 1).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("vnext")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join(".staging-v9-abc")).unwrap();

        assert!(store.list_versions().unwrap().is_empty());
        assert!(matches!(
            store.load::<InferenceBackend>(1, &Default::default()),
            Err(ModelStoreError::ModelNotFound(1))
        ));
        // the incomplete directory still reserves its number
        assert_eq!(store.next_version().unwrap(), 2);
    }

    #[test]
    fn test_next_and_latest_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        for version in [1, 2, 5] {
            let meta = metadata(version);
            store.write_version(&net(&meta), &meta).unwrap();
        }
        assert_eq!(store.list_versions().unwrap(), vec![1, 2, 5]);
        assert_eq!(store.latest_version().unwrap(), 5);
        assert_eq!(store.next_version().unwrap(), 6);
        assert_eq!(store.list_metadata().unwrap().len(), 3);
    }

    #[test]
    fn test_remove_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        for version in [1, 2] {
            let meta = metadata(version);
            store.write_version(&net(&meta), &meta).unwrap();
        }

        store.remove_version(2).unwrap();
        assert_eq!(store.list_versions().unwrap(), vec![1]);
        assert!(!store.version_dir(2).exists());
        assert!(matches!(
            store.remove_version(2),
            Err(ModelStoreError::ModelNotFound(2))
        ));
    }

    #[test]
    fn test_active_pointer() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        assert!(matches!(
            store.set_active(3),
            Err(ModelStoreError::ModelNotFound(3))
        ));

        let meta = metadata(3);
        store.write_version(&net(&meta), &meta).unwrap();
        store.set_active(3).unwrap();
        assert_eq!(store.active_version().unwrap(), Some(3));
    }

    #[test]
    fn test_malformed_active_pointer_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        std::fs::write(temp_dir.path().join("ACTIVE"), "garbage").unwrap();
        assert_eq!(store.active_version().unwrap(), None);
    }

    #[test]
    fn test_metadata_for_missing_version() {
        let temp_dir = TempDir::new().unwrap();
        let store = ModelStore::new(temp_dir.path());
        assert!(matches!(
            store.save_metadata(&metadata(4), 4),
            Err(ModelStoreError::ModelNotFound(4))
        ));
        assert!(matches!(
            store.load_metadata(4),
            Err(ModelStoreError::ModelNotFound(4))
        ));
    }

    #[test]
    fn test_parse_version_dir() {
        assert_eq!(parse_version_dir("v12"), Some(12));
        assert_eq!(parse_version_dir("v"), None);
        assert_eq!(parse_version_dir("v1a"), None);
        assert_eq!(parse_version_dir("12"), None);
        assert_eq!(parse_version_dir("v+1"), None);
    }

    #[test]
    fn test_network_config_from_metadata() {
        let meta = metadata(1);
        assert_eq!(
            meta.network_config(),
            NetworkConfig {
                num_classes: 3,
                hidden_units: 4,
                pool_size: 2,
                dropout: 0.0
            }
        );
    }
}
