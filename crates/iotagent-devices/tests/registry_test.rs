//! Device registry behavior across both backends.

use std::sync::Arc;
use std::time::Duration;

use iotagent_core::{
    AttributeDefinition, CommandInvocation, Device, DeviceKey, DeviceTypeSchema, EntityKey, Error,
    ServiceScope, TypeCatalog,
};
use iotagent_devices::{DeviceRegistry, MemoryBackend, Page, RedbBackend, RegistryBackend};

fn catalog() -> TypeCatalog {
    let mut catalog = TypeCatalog::new();
    catalog.insert(
        "Light",
        DeviceTypeSchema::new()
            .with_active("pressure", "Hgmm")
            .with_lazy("temperature", "centigrades"),
    );
    catalog.insert(
        "Robot",
        DeviceTypeSchema::new().with_command("position", "Array"),
    );
    catalog
}

fn light(id: &str) -> Device {
    Device::new(id, "Light").with_scope("smartGondor", "/gardens")
}

fn entity(name: &str, entity_type: &str) -> EntityKey {
    EntityKey {
        service: "smartGondor".into(),
        subservice: "/gardens".into(),
        name: name.into(),
        entity_type: entity_type.into(),
    }
}

async fn with_each_backend<F, Fut>(test: F)
where
    F: Fn(DeviceRegistry) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    test(DeviceRegistry::new(catalog(), Arc::new(MemoryBackend::new()))).await;

    let temp_dir = tempfile::tempdir().unwrap();
    let backend = RedbBackend::open(temp_dir.path().join("registry.redb")).unwrap();
    test(DeviceRegistry::new(catalog(), Arc::new(backend))).await;
}

#[tokio::test]
async fn test_create_merges_type_schema() {
    with_each_backend(|registry| async move {
        let device = registry.create(light("light1")).await.unwrap();
        assert_eq!(device.name, "light1:Light");
        assert_eq!(device.entity_type, "Light");
        assert_eq!(device.active[0].name, "pressure");
        assert_eq!(device.lazy[0].name, "temperature");

        let stored = registry.get(&device.key()).await.unwrap();
        assert_eq!(stored, device);
    })
    .await;
}

#[tokio::test]
async fn test_create_duplicate_fails() {
    with_each_backend(|registry| async move {
        registry.create(light("light1")).await.unwrap();
        let err = registry.create(light("light1")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateDevice(_)));
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_admit_one() {
    with_each_backend(|registry| async move {
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.create(light("light1")).await })
            })
            .collect();

        let mut created = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(Error::DuplicateDevice(_)) => duplicates += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(duplicates, 7);

        let scope = ServiceScope::new("smartGondor", "/gardens");
        let page = registry.list(&scope, Page::all()).await.unwrap();
        assert_eq!(page.count, 1);
    })
    .await;
}

#[tokio::test]
async fn test_create_entity_conflict_fails() {
    with_each_backend(|registry| async move {
        registry
            .create(light("light1").with_entity("TheLight", "Light"))
            .await
            .unwrap();
        let err = registry
            .create(light("light2").with_entity("TheLight", "Light"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EntityConflict(_)));
    })
    .await;
}

#[tokio::test]
async fn test_find_by_entity() {
    with_each_backend(|registry| async move {
        registry.create(light("light1")).await.unwrap();

        let found = registry
            .find(&entity("light1:Light", "Light"))
            .await
            .unwrap();
        assert_eq!(found.id, "light1");

        let missing = registry.find(&entity("light1:Light", "Robot")).await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    })
    .await;
}

#[tokio::test]
async fn test_remove_then_find_not_found() {
    with_each_backend(|registry| async move {
        let device = registry.create(light("light1")).await.unwrap();
        registry.remove(&device.key()).await.unwrap();

        assert!(registry.get(&device.key()).await.unwrap_err().is_not_found());
        assert!(registry
            .find(&device.entity_key())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(registry.remove(&device.key()).await.unwrap_err().is_not_found());
    })
    .await;
}

#[tokio::test]
async fn test_modify_updates_under_lock() {
    with_each_backend(|registry| async move {
        let device = registry
            .create(Device::new("r2d2", "Robot").with_scope("smartGondor", "/gardens"))
            .await
            .unwrap();

        let (updated, previous) = registry
            .modify(&device.key(), |device| {
                let previous = device.command_status.len();
                device.command_status.insert(
                    "position".into(),
                    CommandInvocation::pending("position", "[28, -104, 23]"),
                );
                Ok(previous)
            })
            .await
            .unwrap();
        assert_eq!(previous, 0);
        assert!(updated.command_status.contains_key("position"));

        let stored = registry.get(&device.key()).await.unwrap();
        assert_eq!(stored.command_status, updated.command_status);
    })
    .await;
}

#[tokio::test]
async fn test_modify_failure_writes_nothing() {
    with_each_backend(|registry| async move {
        let device = registry.create(light("light1")).await.unwrap();

        let result = registry
            .modify(&device.key(), |device| -> iotagent_core::Result<()> {
                device.name = "changed".into();
                Err(Error::InvalidCommand("nope".into()))
            })
            .await;
        assert!(result.is_err());

        let stored = registry.get(&device.key()).await.unwrap();
        assert_eq!(stored.name, "light1:Light");
    })
    .await;
}

#[tokio::test]
async fn test_concurrent_modify_loses_no_writes() {
    with_each_backend(|registry| async move {
        let device = registry
            .create(
                Device::new("r2d2", "Robot")
                    .with_scope("smartGondor", "/gardens")
                    .with_command(AttributeDefinition::new("a", "x"))
                    .with_command(AttributeDefinition::new("b", "x")),
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for name in ["a", "b", "position"] {
            let registry = registry.clone();
            let key = device.key();
            tasks.push(tokio::spawn(async move {
                registry
                    .modify(&key, move |device| {
                        device
                            .command_status
                            .insert(name.into(), CommandInvocation::pending(name, "1"));
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stored = registry.get(&device.key()).await.unwrap();
        assert_eq!(stored.command_status.len(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_find_waits_for_locked_device() {
    let registry = DeviceRegistry::in_memory(catalog());
    let device = registry.resolve(light("light1"));
    let key = device.key();

    let guard = registry.lock(&key).await;
    registry.insert_locked(&guard, &device).await.unwrap();

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        registry.find(&device.entity_key()),
    )
    .await;
    assert!(blocked.is_err());

    // Roll the insert back before releasing: the device never becomes visible.
    registry.remove_locked(&guard).await.unwrap();
    drop(guard);

    let result = registry.find(&device.entity_key()).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_list_scoped_and_paged() {
    with_each_backend(|registry| async move {
        for id in ["light3", "light1", "light2"] {
            registry.create(light(id)).await.unwrap();
        }
        registry
            .create(Device::new("light9", "Light").with_scope("smartGondor", "/roofs"))
            .await
            .unwrap();

        let scope = ServiceScope::new("smartGondor", "/gardens");
        let all = registry.list(&scope, Page::all()).await.unwrap();
        assert_eq!(all.count, 3);
        let ids: Vec<_> = all.devices.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["light1", "light2", "light3"]);

        let page = registry.list(&scope, Page::new(2, 10)).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.devices.len(), 1);
        assert_eq!(page.devices[0].id, "light3");
    })
    .await;
}

#[tokio::test]
async fn test_clear_removes_all_scopes() {
    with_each_backend(|registry| async move {
        registry.create(light("light1")).await.unwrap();
        registry
            .create(Device::new("light1", "Light").with_scope("other", "/"))
            .await
            .unwrap();

        assert_eq!(registry.clear().await.unwrap(), 2);
        let key = DeviceKey::new("light1", "smartGondor", "/gardens");
        assert!(registry.get(&key).await.unwrap_err().is_not_found());
    })
    .await;
}

#[tokio::test]
async fn test_redb_registry_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("registry.redb");

    let device = {
        let backend: Arc<dyn RegistryBackend> = Arc::new(RedbBackend::open(&path).unwrap());
        let registry = DeviceRegistry::new(catalog(), backend);
        let device = registry.create(light("light1")).await.unwrap();
        registry
            .modify(&device.key(), |device| {
                device.registration_id = Some("6319a7f5254b05844116584d".into());
                Ok(())
            })
            .await
            .unwrap()
            .0
    };

    let backend: Arc<dyn RegistryBackend> = Arc::new(RedbBackend::open(&path).unwrap());
    let registry = DeviceRegistry::new(catalog(), backend);

    let restored = registry.get(&device.key()).await.unwrap();
    assert_eq!(restored, device);
    let found = registry.find(&device.entity_key()).await.unwrap();
    assert_eq!(found.registration_id.as_deref(), Some("6319a7f5254b05844116584d"));
}
