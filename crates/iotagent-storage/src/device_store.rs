//! Device document storage using redb.
//!
//! Every device is stored as one JSON document keyed by
//! `(service, subservice, device_id)`. A second table indexes the north-bound
//! entity `(service, subservice, entity_name, entity_type)` back to the owning
//! device id. Both tables are always written in the same transaction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use redb::{Database, ReadableTable, TableDefinition};

use iotagent_core::{Device, DeviceKey, EntityKey};

use crate::{Error, Result};

// Devices table: key = (service, subservice, device_id), value = Device (JSON)
const DEVICES_TABLE: TableDefinition<(&str, &str, &str), &str> = TableDefinition::new("devices");

// Entity index: key = (service, subservice, entity_name, entity_type), value = device_id
const ENTITY_INDEX_TABLE: TableDefinition<(&str, &str, &str, &str), &str> =
    TableDefinition::new("entity_index");

/// Open stores by path. redb refuses a second open of the same file in one
/// process, so agents sharing a file share the store.
fn store_cache() -> &'static Mutex<HashMap<PathBuf, Weak<DeviceStore>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Weak<DeviceStore>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// One page of devices plus the total number of devices in the scope.
#[derive(Debug, Clone, Default)]
pub struct StoredPage {
    pub count: usize,
    pub devices: Vec<Device>,
}

/// Persistent device store.
pub struct DeviceStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for DeviceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStore")
            .field("path", &self.path)
            .finish()
    }
}

impl DeviceStore {
    /// Open or create a device store at the given path.
    ///
    /// Returns the already open store when another handle to the same path
    /// is still alive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path_ref = path.as_ref();
        let mut cache = store_cache().lock();

        if let Some(store) = cache.get(path_ref).and_then(Weak::upgrade) {
            return Ok(store);
        }

        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = if path_ref.exists() {
            Database::open(path_ref)?
        } else {
            Database::create(path_ref)?
        };

        let write_txn = db.begin_write()?;
        {
            let _devices = write_txn.open_table(DEVICES_TABLE)?;
            let _index = write_txn.open_table(ENTITY_INDEX_TABLE)?;
        }
        write_txn.commit()?;

        let store = Arc::new(Self {
            db,
            path: path_ref.to_path_buf(),
        });

        let (devices, indexed) = store.table_sizes()?;
        if devices != indexed {
            tracing::warn!(
                path = %path_ref.display(),
                devices,
                indexed,
                "Entity index out of step with device table, rebuilding"
            );
            store.reindex()?;
        }

        tracing::info!(path = %path_ref.display(), devices, "Device store opened");
        cache.insert(path_ref.to_path_buf(), Arc::downgrade(&store));
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a new device.
    ///
    /// Fails with [`Error::Duplicate`] if the device key is taken and with
    /// [`Error::EntityConflict`] if another device owns the entity.
    pub fn insert_device(&self, device: &Device) -> Result<()> {
        let json = serde_json::to_string(device)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut devices_table = write_txn.open_table(DEVICES_TABLE)?;
            let mut index_table = write_txn.open_table(ENTITY_INDEX_TABLE)?;

            let key = (device.service.as_str(), device.subservice.as_str(), device.id.as_str());
            if devices_table.get(key)?.is_some() {
                return Err(Error::Duplicate(device.key()));
            }

            let entity = entity_tuple(device);
            if index_table.get(entity)?.is_some() {
                return Err(Error::EntityConflict(device.entity_key()));
            }

            devices_table.insert(key, json.as_str())?;
            index_table.insert(entity, device.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Load a device by its primary key.
    pub fn load_device(&self, key: &DeviceKey) -> Result<Option<Device>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        match table.get((
            key.service.as_str(),
            key.subservice.as_str(),
            key.device_id.as_str(),
        ))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Load a device by the entity it is published as.
    pub fn find_device(&self, key: &EntityKey) -> Result<Option<Device>> {
        let read_txn = self.db.begin_read()?;
        let index_table = read_txn.open_table(ENTITY_INDEX_TABLE)?;

        let device_id = match index_table.get((
            key.service.as_str(),
            key.subservice.as_str(),
            key.name.as_str(),
            key.entity_type.as_str(),
        ))? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };

        let devices_table = read_txn.open_table(DEVICES_TABLE)?;
        match devices_table.get((key.service.as_str(), key.subservice.as_str(), device_id.as_str()))? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Replace a stored device. Returns `false` if no such device exists.
    ///
    /// A changed entity identity is re-indexed in the same transaction.
    pub fn update_device(&self, device: &Device) -> Result<bool> {
        let json = serde_json::to_string(device)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut devices_table = write_txn.open_table(DEVICES_TABLE)?;
            let mut index_table = write_txn.open_table(ENTITY_INDEX_TABLE)?;

            let key = (device.service.as_str(), device.subservice.as_str(), device.id.as_str());
            let old: Device = match devices_table.get(key)? {
                Some(value) => serde_json::from_str(value.value())?,
                None => return Ok(false),
            };

            if old.entity_key() != device.entity_key() {
                let entity = entity_tuple(device);
                let taken_by_other = match index_table.get(entity)? {
                    Some(owner) => owner.value() != device.id,
                    None => false,
                };
                if taken_by_other {
                    return Err(Error::EntityConflict(device.entity_key()));
                }
                index_table.remove(entity_tuple(&old))?;
                index_table.insert(entity, device.id.as_str())?;
            }

            devices_table.insert(key, json.as_str())?;
        }
        write_txn.commit()?;
        Ok(true)
    }

    /// Delete a device and its index entry. Returns the removed device.
    pub fn delete_device(&self, key: &DeviceKey) -> Result<Option<Device>> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut devices_table = write_txn.open_table(DEVICES_TABLE)?;
            let mut index_table = write_txn.open_table(ENTITY_INDEX_TABLE)?;

            let removed: Option<Device> = match devices_table.remove((
                key.service.as_str(),
                key.subservice.as_str(),
                key.device_id.as_str(),
            ))? {
                Some(value) => Some(serde_json::from_str(value.value())?),
                None => None,
            };

            if let Some(device) = &removed {
                index_table.remove(entity_tuple(device))?;
            }
            removed
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// List devices of a scope ordered by device id.
    ///
    /// `count` is the number of devices in the scope regardless of paging.
    pub fn list_devices(
        &self,
        service: &str,
        subservice: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<StoredPage> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut page = StoredPage::default();
        for entry in table.range((service, subservice, "")..)? {
            let (key, value) = entry?;
            let (key_service, key_subservice, key_id) = key.value();
            if key_service != service || key_subservice != subservice {
                break;
            }

            let index = page.count;
            page.count += 1;
            if index < offset || limit.is_some_and(|limit| page.devices.len() >= limit) {
                continue;
            }

            match serde_json::from_str::<Device>(value.value()) {
                Ok(device) => page.devices.push(device),
                Err(e) => {
                    tracing::warn!(device_id = key_id, error = %e, "Skipping unreadable device document");
                }
            }
        }

        Ok(page)
    }

    /// Keys of every stored device across all scopes.
    pub fn list_keys(&self) -> Result<Vec<DeviceKey>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEVICES_TABLE)?;

        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            let (service, subservice, device_id) = key.value();
            keys.push(DeviceKey::new(device_id, service, subservice));
        }
        Ok(keys)
    }

    /// Remove every device. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut devices_table = write_txn.open_table(DEVICES_TABLE)?;
            let keys: Vec<(String, String, String)> = devices_table
                .iter()?
                .filter_map(|entry| entry.ok())
                .map(|(key, _)| {
                    let (s, ss, id) = key.value();
                    (s.to_string(), ss.to_string(), id.to_string())
                })
                .collect();
            for (s, ss, id) in &keys {
                devices_table.remove((s.as_str(), ss.as_str(), id.as_str()))?;
            }

            let mut index_table = write_txn.open_table(ENTITY_INDEX_TABLE)?;
            let entities: Vec<(String, String, String, String)> = index_table
                .iter()?
                .filter_map(|entry| entry.ok())
                .map(|(key, _)| {
                    let (s, ss, name, entity_type) = key.value();
                    (
                        s.to_string(),
                        ss.to_string(),
                        name.to_string(),
                        entity_type.to_string(),
                    )
                })
                .collect();
            for (s, ss, name, entity_type) in &entities {
                index_table.remove((s.as_str(), ss.as_str(), name.as_str(), entity_type.as_str()))?;
            }

            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Rebuild the entity index from the device documents.
    pub fn reindex(&self) -> Result<usize> {
        let devices: Vec<Device> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(DEVICES_TABLE)?;
            table
                .iter()?
                .filter_map(|entry| entry.ok())
                .filter_map(|(_, value)| serde_json::from_str(value.value()).ok())
                .collect()
        };

        let write_txn = self.db.begin_write()?;
        write_txn.delete_table(ENTITY_INDEX_TABLE)?;
        {
            let mut index_table = write_txn.open_table(ENTITY_INDEX_TABLE)?;
            for device in &devices {
                index_table.insert(entity_tuple(device), device.id.as_str())?;
            }
        }
        write_txn.commit()?;
        Ok(devices.len())
    }

    /// Number of stored devices across all scopes.
    pub fn device_count(&self) -> Result<usize> {
        Ok(self.table_sizes()?.0)
    }

    fn table_sizes(&self) -> Result<(usize, usize)> {
        let read_txn = self.db.begin_read()?;
        let devices = read_txn.open_table(DEVICES_TABLE)?.iter()?.count();
        let indexed = read_txn.open_table(ENTITY_INDEX_TABLE)?.iter()?.count();
        Ok((devices, indexed))
    }
}

fn entity_tuple(device: &Device) -> (&str, &str, &str, &str) {
    (
        device.service.as_str(),
        device.subservice.as_str(),
        device.name.as_str(),
        device.entity_type.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotagent_core::{AttributeDefinition, CommandInvocation};

    fn create_temp_store() -> (tempfile::TempDir, Arc<DeviceStore>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = DeviceStore::open(temp_dir.path().join("devices.redb")).unwrap();
        (temp_dir, store)
    }

    fn light(id: &str) -> Device {
        let mut device = Device::new(id, "Light").with_scope("smartGondor", "/gardens");
        device.resolve_entity();
        device
    }

    #[test]
    fn test_device_crud() {
        let (_dir, store) = create_temp_store();
        let device = light("light1");

        store.insert_device(&device).unwrap();
        let loaded = store.load_device(&device.key()).unwrap().unwrap();
        assert_eq!(loaded, device);

        let found = store.find_device(&device.entity_key()).unwrap().unwrap();
        assert_eq!(found.id, "light1");

        let deleted = store.delete_device(&device.key()).unwrap();
        assert!(deleted.is_some());
        assert!(store.load_device(&device.key()).unwrap().is_none());
        assert!(store.find_device(&device.entity_key()).unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let (_dir, store) = create_temp_store();
        store.insert_device(&light("light1")).unwrap();

        let err = store.insert_device(&light("light1")).unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[test]
    fn test_insert_entity_conflict_rejected() {
        let (_dir, store) = create_temp_store();
        let first = light("light1").with_entity("TheLight", "Light");
        let second = light("light2").with_entity("TheLight", "Light");

        store.insert_device(&first).unwrap();
        let err = store.insert_device(&second).unwrap_err();
        assert!(matches!(err, Error::EntityConflict(_)));
        assert!(store.load_device(&second.key()).unwrap().is_none());
    }

    #[test]
    fn test_same_id_in_other_scope_is_distinct() {
        let (_dir, store) = create_temp_store();
        store.insert_device(&light("light1")).unwrap();

        let mut other = Device::new("light1", "Light").with_scope("smartGondor", "/roofs");
        other.resolve_entity();
        store.insert_device(&other).unwrap();

        assert_eq!(store.device_count().unwrap(), 2);
    }

    #[test]
    fn test_update_reindexes_entity() {
        let (_dir, store) = create_temp_store();
        let device = light("light1");
        store.insert_device(&device).unwrap();

        let renamed = device.clone().with_entity("Renamed", "Light");
        assert!(store.update_device(&renamed).unwrap());

        assert!(store.find_device(&device.entity_key()).unwrap().is_none());
        let found = store.find_device(&renamed.entity_key()).unwrap().unwrap();
        assert_eq!(found.name, "Renamed");
    }

    #[test]
    fn test_update_missing_device() {
        let (_dir, store) = create_temp_store();
        assert!(!store.update_device(&light("ghost")).unwrap());
    }

    #[test]
    fn test_list_devices_pages_within_scope() {
        let (_dir, store) = create_temp_store();
        for id in ["c", "a", "b"] {
            store.insert_device(&light(id)).unwrap();
        }
        let mut outsider = Device::new("z", "Light").with_scope("other", "/");
        outsider.resolve_entity();
        store.insert_device(&outsider).unwrap();

        let page = store
            .list_devices("smartGondor", "/gardens", 0, None)
            .unwrap();
        assert_eq!(page.count, 3);
        let ids: Vec<_> = page.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let page = store
            .list_devices("smartGondor", "/gardens", 1, Some(1))
            .unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.devices.len(), 1);
        assert_eq!(page.devices[0].id, "b");
    }

    #[test]
    fn test_clear() {
        let (_dir, store) = create_temp_store();
        store.insert_device(&light("a")).unwrap();
        store.insert_device(&light("b")).unwrap();

        let keys = store.list_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].device_id, "a");

        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.device_count().unwrap(), 0);
        assert!(store.find_device(&light("a").entity_key()).unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_devices() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("devices.redb");

        let mut device = light("r2d2")
            .with_command(AttributeDefinition::new("position", "Array"));
        device
            .command_status
            .insert("position".into(), CommandInvocation::pending("position", "[28, -104, 23]"));

        {
            let store = DeviceStore::open(&path).unwrap();
            store.insert_device(&device).unwrap();
        }

        let store = DeviceStore::open(&path).unwrap();
        let loaded = store.load_device(&device.key()).unwrap().unwrap();
        assert_eq!(loaded, device);
        assert!(store.find_device(&device.entity_key()).unwrap().is_some());
    }

    #[test]
    fn test_open_returns_shared_handle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("devices.redb");

        let first = DeviceStore::open(&path).unwrap();
        let second = DeviceStore::open(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
