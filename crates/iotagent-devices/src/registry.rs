//! Device registry.
//!
//! Every operation that reads or writes one device record runs under that
//! device's lock. Multi-step work that must look atomic to other callers,
//! such as persisting a device and then registering it north-bound, takes
//! the lock explicitly with [`DeviceRegistry::lock`] and uses the `*_locked`
//! variants while holding it.

use std::sync::Arc;

use iotagent_core::{Device, DeviceKey, EntityKey, Error, Result, ServiceScope, TypeCatalog};

use crate::backends::{DevicePage, MemoryBackend, Page, RegistryBackend};
use crate::locks::{DeviceGuard, KeyLocks};

/// Device registry.
#[derive(Clone)]
pub struct DeviceRegistry {
    catalog: Arc<TypeCatalog>,
    backend: Arc<dyn RegistryBackend>,
    locks: KeyLocks,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("backend", &self.backend.backend_type())
            .field("types", &self.catalog.len())
            .finish()
    }
}

impl DeviceRegistry {
    pub fn new(catalog: TypeCatalog, backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            backend,
            locks: KeyLocks::new(),
        }
    }

    /// In-memory registry with the given type catalog.
    pub fn in_memory(catalog: TypeCatalog) -> Self {
        Self::new(catalog, Arc::new(MemoryBackend::new()))
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    pub fn backend(&self) -> &Arc<dyn RegistryBackend> {
        &self.backend
    }

    /// Merge the device's type schema into it and fill entity defaults.
    pub fn resolve(&self, device: Device) -> Device {
        self.catalog.resolve(device)
    }

    /// Wait for exclusive access to one device key.
    pub async fn lock(&self, key: &DeviceKey) -> DeviceGuard {
        self.locks.lock(key).await
    }

    /// Resolve and store a new device.
    ///
    /// Fails with [`Error::DuplicateDevice`] when the id is taken in the scope
    /// and with [`Error::EntityConflict`] when the entity is.
    pub async fn create(&self, device: Device) -> Result<Device> {
        let device = self.resolve(device);
        let guard = self.lock(&device.key()).await;
        self.insert_locked(&guard, &device).await?;
        Ok(device)
    }

    pub async fn get(&self, key: &DeviceKey) -> Result<Device> {
        let guard = self.lock(key).await;
        self.get_locked(&guard).await
    }

    /// Look a device up by the entity it is published as.
    ///
    /// The record is re-read under the device lock so a device still being
    /// registered (or rolled back) is never observed half-done.
    pub async fn find(&self, key: &EntityKey) -> Result<Device> {
        let candidate = self
            .backend
            .find(key)
            .await?
            .ok_or_else(|| Error::entity_not_found(key))?;

        let guard = self.lock(&candidate.key()).await;
        match self.backend.get(guard.key()).await? {
            Some(device) if device.entity_key() == *key => Ok(device),
            _ => Err(Error::entity_not_found(key)),
        }
    }

    /// Replace a stored device.
    pub async fn update(&self, device: Device) -> Result<Device> {
        let guard = self.lock(&device.key()).await;
        self.store_locked(&guard, &device).await?;
        Ok(device)
    }

    /// Read-modify-write one device under its lock.
    ///
    /// Nothing is written when `f` fails. Returns the stored device along
    /// with the closure's result.
    pub async fn modify<T, F>(&self, key: &DeviceKey, f: F) -> Result<(Device, T)>
    where
        F: FnOnce(&mut Device) -> Result<T> + Send,
        T: Send,
    {
        let guard = self.lock(key).await;
        let mut device = self.get_locked(&guard).await?;
        let output = f(&mut device)?;
        self.store_locked(&guard, &device).await?;
        Ok((device, output))
    }

    pub async fn remove(&self, key: &DeviceKey) -> Result<Device> {
        let guard = self.lock(key).await;
        self.remove_locked(&guard).await
    }

    /// List the devices of a scope ordered by id.
    pub async fn list(&self, scope: &ServiceScope, page: Page) -> Result<DevicePage> {
        self.backend.list(scope, page).await
    }

    /// Keys of every device in every scope.
    pub async fn keys(&self) -> Result<Vec<DeviceKey>> {
        self.backend.keys().await
    }

    /// Remove every device from every scope.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.backend.clear().await?;
        tracing::info!(removed, "Device registry cleared");
        Ok(removed)
    }

    pub async fn insert_locked(&self, guard: &DeviceGuard, device: &Device) -> Result<()> {
        check_guard(guard, device)?;
        self.backend.insert(device).await?;
        tracing::debug!(device = %guard.key(), "Device stored");
        Ok(())
    }

    pub async fn get_locked(&self, guard: &DeviceGuard) -> Result<Device> {
        self.backend
            .get(guard.key())
            .await?
            .ok_or_else(|| Error::device_not_found(guard.key()))
    }

    pub async fn store_locked(&self, guard: &DeviceGuard, device: &Device) -> Result<()> {
        check_guard(guard, device)?;
        if self.backend.update(device).await? {
            Ok(())
        } else {
            Err(Error::device_not_found(guard.key()))
        }
    }

    pub async fn remove_locked(&self, guard: &DeviceGuard) -> Result<Device> {
        let removed = self
            .backend
            .remove(guard.key())
            .await?
            .ok_or_else(|| Error::device_not_found(guard.key()))?;
        tracing::debug!(device = %guard.key(), "Device removed");
        Ok(removed)
    }
}

fn check_guard(guard: &DeviceGuard, device: &Device) -> Result<()> {
    if *guard.key() == device.key() {
        Ok(())
    } else {
        Err(Error::Storage(format!(
            "device {} written while holding the lock of {}",
            device.key(),
            guard.key()
        )))
    }
}
