//! In-memory registry backend.
//!
//! Records are lost when the process exits. Used by default and in tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use iotagent_core::{Device, DeviceKey, EntityKey, Error, Result, ServiceScope};

use super::{DevicePage, Page, RegistryBackend};

#[derive(Debug, Default)]
struct MemoryState {
    devices: BTreeMap<DeviceKey, Device>,
    entities: HashMap<EntityKey, DeviceKey>,
}

/// Registry backend keeping records in process memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn insert(&self, device: &Device) -> Result<()> {
        let key = device.key();
        let entity = device.entity_key();
        let mut state = self.state.write();

        if state.devices.contains_key(&key) {
            return Err(Error::DuplicateDevice(key));
        }
        if state.entities.contains_key(&entity) {
            return Err(Error::EntityConflict(entity));
        }

        state.entities.insert(entity, key.clone());
        state.devices.insert(key, device.clone());
        Ok(())
    }

    async fn get(&self, key: &DeviceKey) -> Result<Option<Device>> {
        Ok(self.state.read().devices.get(key).cloned())
    }

    async fn find(&self, key: &EntityKey) -> Result<Option<Device>> {
        let state = self.state.read();
        Ok(state
            .entities
            .get(key)
            .and_then(|device_key| state.devices.get(device_key))
            .cloned())
    }

    async fn update(&self, device: &Device) -> Result<bool> {
        let key = device.key();
        let entity = device.entity_key();
        let mut state = self.state.write();

        let old_entity = match state.devices.get(&key) {
            Some(old) => old.entity_key(),
            None => return Ok(false),
        };

        if old_entity != entity {
            if state.entities.get(&entity).is_some_and(|owner| *owner != key) {
                return Err(Error::EntityConflict(entity));
            }
            state.entities.remove(&old_entity);
            state.entities.insert(entity, key.clone());
        }

        state.devices.insert(key, device.clone());
        Ok(true)
    }

    async fn remove(&self, key: &DeviceKey) -> Result<Option<Device>> {
        let mut state = self.state.write();
        let removed = state.devices.remove(key);
        if let Some(device) = &removed {
            state.entities.remove(&device.entity_key());
        }
        Ok(removed)
    }

    async fn list(&self, scope: &ServiceScope, page: Page) -> Result<DevicePage> {
        let state = self.state.read();
        let in_scope: Vec<&Device> = state
            .devices
            .values()
            .filter(|d| d.service == scope.service && d.subservice == scope.subservice)
            .collect();

        Ok(DevicePage {
            count: in_scope.len(),
            devices: in_scope
                .into_iter()
                .skip(page.offset)
                .take(page.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect(),
        })
    }

    async fn keys(&self) -> Result<Vec<DeviceKey>> {
        Ok(self.state.read().devices.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize> {
        let mut state = self.state.write();
        let removed = state.devices.len();
        state.devices.clear();
        state.entities.clear();
        Ok(removed)
    }

    fn is_persistent(&self) -> bool {
        false
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(id: &str) -> Device {
        let mut device = Device::new(id, "Light").with_scope("smartGondor", "/gardens");
        device.resolve_entity();
        device
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let backend = MemoryBackend::new();
        let device = light("light1");
        backend.insert(&device).await.unwrap();

        let found = backend.find(&device.entity_key()).await.unwrap();
        assert_eq!(found, Some(device));
    }

    #[tokio::test]
    async fn test_duplicate_and_entity_conflict() {
        let backend = MemoryBackend::new();
        backend.insert(&light("light1")).await.unwrap();

        assert!(matches!(
            backend.insert(&light("light1")).await,
            Err(Error::DuplicateDevice(_))
        ));

        let clash = light("light2").with_entity("light1:Light", "Light");
        assert!(matches!(
            backend.insert(&clash).await,
            Err(Error::EntityConflict(_))
        ));
    }

    #[tokio::test]
    async fn test_update_moves_entity_index() {
        let backend = MemoryBackend::new();
        let device = light("light1");
        backend.insert(&device).await.unwrap();

        let renamed = device.clone().with_entity("Lamp", "Light");
        assert!(backend.update(&renamed).await.unwrap());
        assert!(backend.find(&device.entity_key()).await.unwrap().is_none());
        assert!(backend.find(&renamed.entity_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_paged() {
        let backend = MemoryBackend::new();
        for id in ["b", "c", "a"] {
            backend.insert(&light(id)).await.unwrap();
        }

        let scope = ServiceScope::new("smartGondor", "/gardens");
        let page = backend.list(&scope, Page::new(1, 5)).await.unwrap();
        assert_eq!(page.count, 3);
        let ids: Vec<_> = page.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
