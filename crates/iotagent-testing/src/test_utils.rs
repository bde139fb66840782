//! Isolated test environments.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

use iotagent_core::{
    AgentConfig, BrokerConfig, DeviceTypeSchema, RegistryBackendKind, RegistryConfig,
};

/// Global test counter for generating unique test IDs
static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Get a unique test ID for this test run
pub fn test_id() -> String {
    let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_{}", id)
}

/// A redb file in its own temp directory, removed on drop.
pub struct TestDbConfig {
    pub path: PathBuf,
    _dir: TempDir,
}

impl TestDbConfig {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("iotagent_{}_", name))
            .tempdir()?;
        let path = dir.path().join(format!("{}_{}.redb", name, test_id()));
        Ok(Self { path, _dir: dir })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            backend: RegistryBackendKind::Redb,
            path: Some(self.path.clone()),
        }
    }
}

/// Agent configuration used across the test suites: scope
/// `smartGondor` `/gardens` and the `Light`, `Robot` and `Termometer` types.
pub fn agent_config(broker: BrokerConfig) -> AgentConfig {
    let mut config = AgentConfig {
        service: "smartGondor".to_string(),
        subservice: "/gardens".to_string(),
        provider_url: "http://smartGondor.com".to_string(),
        context_broker: broker,
        ..Default::default()
    };

    config.types.insert(
        "Light".to_string(),
        DeviceTypeSchema::new()
            .with_active("pressure", "Hgmm")
            .with_lazy("temperature", "centigrades"),
    );
    config.types.insert(
        "Robot".to_string(),
        DeviceTypeSchema::new()
            .with_command("position", "Array")
            .with_lazy("batteryLevel", "Percentage"),
    );
    config.types.insert(
        "Termometer".to_string(),
        DeviceTypeSchema::new()
            .with_lazy("temp", "kelvin")
            .with_static("location", "Vector", "(123,523)"),
    );
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_id_is_unique() {
        assert_ne!(test_id(), test_id());
    }

    #[test]
    fn test_db_config_paths_are_unique() {
        let a = TestDbConfig::new("registry").unwrap();
        let b = TestDbConfig::new("registry").unwrap();
        assert_ne!(a.path, b.path);
        assert!(a.path.parent().unwrap().exists());
    }

    #[test]
    fn test_agent_config_is_valid() {
        let config = agent_config(BrokerConfig::default());
        config.validate().unwrap();
        assert_eq!(config.catalog().len(), 3);
    }
}
