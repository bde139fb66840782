//! Redb registry backend.
//!
//! Wraps the blocking [`DeviceStore`] and runs every call on the blocking
//! thread pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use iotagent_core::{Device, DeviceKey, EntityKey, Result, ServiceScope};
use iotagent_storage::DeviceStore;

use super::{DevicePage, Page, RegistryBackend};

/// Registry backend persisting records in a redb file.
#[derive(Debug, Clone)]
pub struct RedbBackend {
    store: Arc<DeviceStore>,
}

impl RedbBackend {
    /// Open (or create) the database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            store: DeviceStore::open(path)?,
        })
    }

    pub fn from_store(store: Arc<DeviceStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DeviceStore> {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DeviceStore) -> iotagent_storage::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(iotagent_storage::Error::from)?;
        Ok(result?)
    }
}

#[async_trait]
impl RegistryBackend for RedbBackend {
    async fn insert(&self, device: &Device) -> Result<()> {
        let device = device.clone();
        self.blocking(move |store| store.insert_device(&device)).await
    }

    async fn get(&self, key: &DeviceKey) -> Result<Option<Device>> {
        let key = key.clone();
        self.blocking(move |store| store.load_device(&key)).await
    }

    async fn find(&self, key: &EntityKey) -> Result<Option<Device>> {
        let key = key.clone();
        self.blocking(move |store| store.find_device(&key)).await
    }

    async fn update(&self, device: &Device) -> Result<bool> {
        let device = device.clone();
        self.blocking(move |store| store.update_device(&device)).await
    }

    async fn remove(&self, key: &DeviceKey) -> Result<Option<Device>> {
        let key = key.clone();
        self.blocking(move |store| store.delete_device(&key)).await
    }

    async fn list(&self, scope: &ServiceScope, page: Page) -> Result<DevicePage> {
        let scope = scope.clone();
        let stored = self
            .blocking(move |store| {
                store.list_devices(&scope.service, &scope.subservice, page.offset, page.limit)
            })
            .await?;
        Ok(DevicePage {
            count: stored.count,
            devices: stored.devices,
        })
    }

    async fn keys(&self) -> Result<Vec<DeviceKey>> {
        self.blocking(|store| store.list_keys()).await
    }

    async fn clear(&self) -> Result<usize> {
        self.blocking(|store| store.clear()).await
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn backend_type(&self) -> &'static str {
        "redb"
    }
}
