//! Registry seams and in-memory implementations.
//!
//! Images and data volumes are looked up by symbolic name; instance records
//! are stored by [`InstanceId`]. Persistent backings plug in behind the same
//! traits.

use crate::config::{Params, ResolvedConfig};
use crate::error::{CoreError, ResourceKind, Result};
use crate::instance::{InstanceId, InstanceState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Resolves image names to on-disk image paths.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Path of the image called `name`.
    async fn image_path(&self, name: &str) -> Result<PathBuf>;
}

/// Resolves data-volume names to on-disk paths.
#[async_trait]
pub trait VolumeRegistry: Send + Sync {
    /// Path of the volume called `name`.
    async fn volume_path(&self, name: &str) -> Result<PathBuf>;

    /// Register (or replace) the volume called `name`.
    async fn add_volume_path(&self, name: &str, path: PathBuf) -> Result<()>;
}

/// Durable mirror of every tracked instance.
#[async_trait]
pub trait InstanceRegistry: Send + Sync {
    /// Insert a new record.
    async fn register(&self, record: InstanceRecord) -> Result<()>;

    /// Overwrite the full record for `record.id`.
    async fn populate(&self, record: InstanceRecord) -> Result<()>;

    /// Remove the record for `id`.
    async fn remove(&self, id: InstanceId) -> Result<()>;

    /// Every tracked id.
    async fn id_list(&self) -> Result<Vec<InstanceId>>;

    /// Record for `id`, or [`CoreError::NotFound`].
    async fn query(&self, id: InstanceId) -> Result<InstanceRecord>;
}

/// Snapshot of an instance as stored in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Instance id.
    pub id: InstanceId,
    /// Instance name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Resolved launch configuration.
    pub config: ResolvedConfig,
    /// Parameters the caller supplied to `create`.
    pub params: Params,
}

impl InstanceRecord {
    /// The short projection returned by `list`.
    pub fn summary(&self) -> InstanceSummary {
        InstanceSummary {
            id: self.id,
            created_at: self.created_at,
            name: self.name.clone(),
            state: self.state,
        }
    }
}

/// Short projection of an [`InstanceRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSummary {
    /// Instance id.
    pub id: InstanceId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Instance name.
    pub name: String,
    /// Lifecycle state.
    pub state: InstanceState,
}

/// In-memory [`ImageRegistry`].
#[derive(Debug, Default)]
pub struct MemoryImageRegistry {
    images: RwLock<HashMap<String, PathBuf>>,
}

impl MemoryImageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the image called `name`.
    pub async fn add_image_path(&self, name: &str, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::debug!(image = %name, path = %path.display(), "Image registered");
        self.images.write().await.insert(name.to_string(), path);
    }
}

#[async_trait]
impl ImageRegistry for MemoryImageRegistry {
    async fn image_path(&self, name: &str) -> Result<PathBuf> {
        self.images
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownResource {
                kind: ResourceKind::Image,
                name: name.to_string(),
            })
    }
}

/// In-memory [`VolumeRegistry`].
#[derive(Debug, Default)]
pub struct MemoryVolumeRegistry {
    volumes: RwLock<HashMap<String, PathBuf>>,
}

impl MemoryVolumeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VolumeRegistry for MemoryVolumeRegistry {
    async fn volume_path(&self, name: &str) -> Result<PathBuf> {
        self.volumes
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownResource {
                kind: ResourceKind::Volume,
                name: name.to_string(),
            })
    }

    async fn add_volume_path(&self, name: &str, path: PathBuf) -> Result<()> {
        tracing::debug!(volume = %name, path = %path.display(), "Data volume registered");
        self.volumes.write().await.insert(name.to_string(), path);
        Ok(())
    }
}

/// In-memory [`InstanceRegistry`].
///
/// Records are replaced whole under the write lock, so a reader sees either
/// the previous snapshot or the new one.
#[derive(Debug, Default)]
pub struct MemoryInstanceRegistry {
    records: RwLock<HashMap<InstanceId, InstanceRecord>>,
}

impl MemoryInstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no records are tracked.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl InstanceRegistry for MemoryInstanceRegistry {
    async fn register(&self, record: InstanceRecord) -> Result<()> {
        let id = record.id;
        if self.records.write().await.insert(id, record).is_some() {
            tracing::warn!(instance_id = %id, "Registered over an existing record");
        }
        tracing::trace!(instance_id = %id, "Record registered");
        Ok(())
    }

    async fn populate(&self, record: InstanceRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let slot = records
            .get_mut(&record.id)
            .ok_or(CoreError::NotFound(record.id))?;
        tracing::trace!(instance_id = %record.id, state = %record.state, "Record populated");
        *slot = record;
        Ok(())
    }

    async fn remove(&self, id: InstanceId) -> Result<()> {
        self.records
            .write()
            .await
            .remove(&id)
            .ok_or(CoreError::NotFound(id))?;
        tracing::trace!(instance_id = %id, "Record removed");
        Ok(())
    }

    async fn id_list(&self) -> Result<Vec<InstanceId>> {
        let records = self.records.read().await;
        let mut ids: Vec<_> = records.values().map(|r| (r.created_at, r.id)).collect();
        ids.sort();
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn query(&self, id: InstanceId) -> Result<InstanceRecord> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cunik_vm::Hypervisor;

    fn record(name: &str) -> InstanceRecord {
        InstanceRecord {
            id: InstanceId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
            state: InstanceState::NotStarted,
            config: ResolvedConfig {
                name: name.to_string(),
                image_path: PathBuf::from("/images/hello.img"),
                cmdline: String::new(),
                hypervisor: Hypervisor::Kvm,
                memory_kb: 1024,
                nic: None,
                data_volume_path: None,
            },
            params: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_image_registry_miss() {
        let images = MemoryImageRegistry::new();
        images.add_image_path("hello", "/images/hello.img").await;

        assert_eq!(
            images.image_path("hello").await.unwrap(),
            PathBuf::from("/images/hello.img")
        );
        let err = images.image_path("nginx").await.unwrap_err();
        assert_eq!(err.to_string(), "cannot find image nginx in registry");
    }

    #[tokio::test]
    async fn test_volume_registry_replace() {
        let volumes = MemoryVolumeRegistry::new();
        assert!(volumes.volume_path("db").await.is_err());

        volumes.add_volume_path("db", "/a.img".into()).await.unwrap();
        volumes.add_volume_path("db", "/b.img".into()).await.unwrap();
        assert_eq!(volumes.volume_path("db").await.unwrap(), PathBuf::from("/b.img"));
    }

    #[tokio::test]
    async fn test_instance_registry_lifecycle() {
        let registry = MemoryInstanceRegistry::new();
        let mut rec = record("hello1");
        let id = rec.id;

        registry.register(rec.clone()).await.unwrap();
        assert_eq!(registry.id_list().await.unwrap(), vec![id]);

        rec.state = InstanceState::Running;
        registry.populate(rec.clone()).await.unwrap();
        assert_eq!(registry.query(id).await.unwrap().state, InstanceState::Running);

        registry.remove(id).await.unwrap();
        assert!(matches!(registry.query(id).await, Err(CoreError::NotFound(x)) if x == id));
        assert!(matches!(registry.remove(id).await, Err(CoreError::NotFound(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_populate_unknown_id() {
        let registry = MemoryInstanceRegistry::new();
        let result = registry.populate(record("ghost1")).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_id_list_in_creation_order() {
        let registry = MemoryInstanceRegistry::new();
        let first = record("hello1");
        let mut second = record("hello2");
        second.created_at = first.created_at + chrono::Duration::seconds(1);

        registry.register(second.clone()).await.unwrap();
        registry.register(first.clone()).await.unwrap();

        assert_eq!(registry.id_list().await.unwrap(), vec![first.id, second.id]);
    }

    #[test]
    fn test_summary() {
        let rec = record("hello1");
        let summary = rec.summary();
        assert_eq!(summary.id, rec.id);
        assert_eq!(summary.name, "hello1");
        assert_eq!(summary.state, InstanceState::NotStarted);
    }
}
