//! Registry backend implementations.
//!
//! A backend stores device records and maintains the entity index. It does no
//! locking of its own beyond what keeps a single call consistent; ordering of
//! read-modify-write sequences is the registry's job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use iotagent_core::{
    Device, DeviceKey, EntityKey, Error, RegistryBackendKind, RegistryConfig, Result, ServiceScope,
};

pub mod memory;
pub mod redb;

pub use memory::MemoryBackend;
pub use redb::RedbBackend;

/// Paging window for device listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// One page of a device listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePage {
    /// Total devices in the scope, independent of paging.
    pub count: usize,
    pub devices: Vec<Device>,
}

/// Storage for device records.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Insert a new record, failing on a taken device key or entity.
    async fn insert(&self, device: &Device) -> Result<()>;

    /// Read a record by device key.
    async fn get(&self, key: &DeviceKey) -> Result<Option<Device>>;

    /// Read a record by the entity it is published as.
    async fn find(&self, key: &EntityKey) -> Result<Option<Device>>;

    /// Replace an existing record. Returns `false` if it does not exist.
    async fn update(&self, device: &Device) -> Result<bool>;

    /// Delete a record, returning it.
    async fn remove(&self, key: &DeviceKey) -> Result<Option<Device>>;

    /// List a scope ordered by device id.
    async fn list(&self, scope: &ServiceScope, page: Page) -> Result<DevicePage>;

    /// Keys of every record across all scopes.
    async fn keys(&self) -> Result<Vec<DeviceKey>>;

    /// Delete every record. Returns the number deleted.
    async fn clear(&self) -> Result<usize>;

    /// Check if records survive a restart.
    fn is_persistent(&self) -> bool;

    /// Backend type identifier.
    fn backend_type(&self) -> &'static str;
}

/// Create a registry backend from configuration.
pub fn create_backend(config: &RegistryConfig) -> Result<Arc<dyn RegistryBackend>> {
    match config.backend {
        RegistryBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        RegistryBackendKind::Redb => {
            let path = config.path.as_ref().ok_or_else(|| {
                Error::Config(format!(
                    "Registry backend 'redb' needs a path. Available backends: {}",
                    available_backends().join(", ")
                ))
            })?;
            Ok(Arc::new(RedbBackend::open(path)?))
        }
    }
}

/// Get list of available backend types.
pub fn available_backends() -> Vec<&'static str> {
    vec!["memory", "redb"]
}
