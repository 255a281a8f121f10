//! Index descriptor persistence.
//!
//! A descriptor is written once, after a successful create, and read on
//! every later query or delete to reconstruct the right connector.

use crate::naming::validate_dataset_id;
use crate::types::IndexDescriptor;
use docindex_core::{AppError, AppResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Storage for dataset descriptors.
pub trait DescriptorStore: Send + Sync + std::fmt::Debug {
    /// Descriptor of `dataset_id`, or `None` when the dataset is unindexed.
    fn load(&self, dataset_id: &str) -> AppResult<Option<IndexDescriptor>>;

    fn save(&self, dataset_id: &str, descriptor: &IndexDescriptor) -> AppResult<()>;

    /// Forget a descriptor. Removing an absent one is not an error.
    fn remove(&self, dataset_id: &str) -> AppResult<()>;
}

/// One JSON file per dataset under a directory.
#[derive(Debug, Clone)]
pub struct FileDescriptorStore {
    dir: PathBuf,
}

impl FileDescriptorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a dataset's descriptor file.
    pub fn path_for(&self, dataset_id: &str) -> AppResult<PathBuf> {
        validate_dataset_id(dataset_id)?;
        Ok(self.dir.join(format!("{}.json", dataset_id)))
    }
}

impl DescriptorStore for FileDescriptorStore {
    fn load(&self, dataset_id: &str) -> AppResult<Option<IndexDescriptor>> {
        let path = self.path_for(dataset_id)?;
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| {
            AppError::Index(format!("Failed to read descriptor at {:?}: {}", path, e))
        })?;

        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
            AppError::Serialization(format!("Failed to parse descriptor at {:?}: {}", path, e))
        })?;

        let descriptor = if value.get("backend_type").is_some() {
            serde_json::from_value(value)?
        } else {
            IndexDescriptor::from_legacy_struct(&value)?
        };

        tracing::debug!("Loaded descriptor for dataset '{}'", dataset_id);
        Ok(Some(descriptor))
    }

    fn save(&self, dataset_id: &str, descriptor: &IndexDescriptor) -> AppResult<()> {
        let path = self.path_for(dataset_id)?;

        fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::Index(format!("Failed to create descriptor directory: {}", e))
        })?;

        let json = serde_json::to_string_pretty(descriptor)?;

        // Write then rename so readers never observe a half-written file.
        let tmp = self.dir.join(format!(".{}.json.tmp", dataset_id));
        fs::write(&tmp, json).map_err(|e| {
            AppError::Index(format!("Failed to write descriptor to {:?}: {}", tmp, e))
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            AppError::Index(format!("Failed to move descriptor into {:?}: {}", path, e))
        })?;

        tracing::debug!("Saved descriptor for dataset '{}'", dataset_id);
        Ok(())
    }

    fn remove(&self, dataset_id: &str) -> AppResult<()> {
        let path = self.path_for(dataset_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Index(format!(
                "Failed to remove descriptor at {:?}: {}",
                path, e
            ))),
        }
    }
}

/// Process-local descriptor store.
#[derive(Debug, Default)]
pub struct MemoryDescriptorStore {
    descriptors: RwLock<HashMap<String, IndexDescriptor>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DescriptorStore for MemoryDescriptorStore {
    fn load(&self, dataset_id: &str) -> AppResult<Option<IndexDescriptor>> {
        let descriptors = self
            .descriptors
            .read()
            .map_err(|_| AppError::Other("descriptor store poisoned".to_string()))?;
        Ok(descriptors.get(dataset_id).cloned())
    }

    fn save(&self, dataset_id: &str, descriptor: &IndexDescriptor) -> AppResult<()> {
        self.descriptors
            .write()
            .map_err(|_| AppError::Other("descriptor store poisoned".to_string()))?
            .insert(dataset_id.to_string(), descriptor.clone());
        Ok(())
    }

    fn remove(&self, dataset_id: &str) -> AppResult<()> {
        self.descriptors
            .write()
            .map_err(|_| AppError::Other("descriptor store poisoned".to_string()))?
            .remove(dataset_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BackendType;
    use tempfile::TempDir;

    fn descriptor() -> IndexDescriptor {
        IndexDescriptor::new(BackendType::Sqlite, "vector_index_ds_1_node")
            .with_embedding("trigram-v1", 384)
    }

    #[test]
    fn test_file_store_save_load_remove() {
        let temp = TempDir::new().unwrap();
        let store = FileDescriptorStore::new(temp.path().join("descriptors"));

        assert!(store.load("ds-1").unwrap().is_none());

        store.save("ds-1", &descriptor()).unwrap();
        assert_eq!(store.load("ds-1").unwrap(), Some(descriptor()));
        assert!(store.path_for("ds-1").unwrap().exists());

        store.remove("ds-1").unwrap();
        assert!(store.load("ds-1").unwrap().is_none());
        store.remove("ds-1").unwrap();
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = FileDescriptorStore::new(temp.path());
        store.save("ds-1", &descriptor()).unwrap();

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["ds-1.json".to_string()]);
    }

    #[test]
    fn test_file_store_reads_legacy_layout() {
        let temp = TempDir::new().unwrap();
        let store = FileDescriptorStore::new(temp.path());
        fs::write(
            temp.path().join("old.json"),
            r#"{"type": "weaviate", "vector_store": {"class_prefix": "Vector_index_old_node"}}"#,
        )
        .unwrap();

        let loaded = store.load("old").unwrap().unwrap();
        assert_eq!(loaded.backend_type, BackendType::Weaviate);
        assert_eq!(loaded.index_name, "Vector_index_old_node");
    }

    #[test]
    fn test_file_store_rejects_path_like_ids() {
        let temp = TempDir::new().unwrap();
        let store = FileDescriptorStore::new(temp.path());
        assert!(matches!(
            store.save("../escape", &descriptor()),
            Err(AppError::InvalidDatasetId(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryDescriptorStore::new();
        store.save("a", &descriptor()).unwrap();
        assert!(store.load("a").unwrap().is_some());
        assert!(store.load("b").unwrap().is_none());
        store.remove("a").unwrap();
        assert!(store.load("a").unwrap().is_none());
    }
}
