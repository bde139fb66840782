//! The agent facade.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use iotagent_commands::CommandTracker;
use iotagent_core::{
    AgentConfig, Attribute, AttributeDefinition, CommandInvocation, CommandStatus, Device,
    DeviceKey, EntityKey, Error, Result, ServiceScope,
};
use iotagent_devices::{DeviceGuard, DevicePage, DeviceRegistry, Page, create_backend};
use iotagent_ngsi::{ContextBroker, ContextElement, NgsiClient};

use crate::handlers::{CommandHandler, DataQueryHandler, DataUpdateHandler, Handlers};
use crate::router::{ContextQuery, ContextUpdate, UpdateRouter};

/// Attributes to add to an already registered device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationUpdate {
    #[serde(default)]
    pub active: Vec<AttributeDefinition>,
    #[serde(default)]
    pub lazy: Vec<AttributeDefinition>,
    #[serde(default)]
    pub commands: Vec<AttributeDefinition>,
}

/// IoT agent: device registry, broker registration, update routing and
/// command tracking behind one handle.
#[derive(Clone)]
pub struct IotAgent {
    defaults: ServiceScope,
    registry: DeviceRegistry,
    broker: Arc<dyn ContextBroker>,
    tracker: CommandTracker,
    router: UpdateRouter,
    handlers: Handlers,
}

impl IotAgent {
    pub fn new(
        defaults: ServiceScope,
        registry: DeviceRegistry,
        broker: Arc<dyn ContextBroker>,
    ) -> Self {
        let handlers = Handlers::new();
        let tracker = CommandTracker::new(registry.clone(), broker.clone());
        let router = UpdateRouter::new(
            registry.clone(),
            tracker.clone(),
            handlers.clone(),
            defaults.clone(),
        );

        Self {
            defaults,
            registry,
            broker,
            tracker,
            router,
            handlers,
        }
    }

    /// Build the agent from configuration: validate it, create the registry
    /// backend and the NGSI client.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let backend = create_backend(&config.device_registry)?;
        let registry = DeviceRegistry::new(config.catalog(), backend);
        let broker = NgsiClient::from_config(&config)?;

        tracing::info!(
            service = %config.service,
            subservice = %config.subservice,
            broker = %broker.base_url(),
            registry = registry.backend().backend_type(),
            types = registry.catalog().len(),
            "IoT agent initialized"
        );

        Ok(Self::new(config.default_scope(), registry, Arc::new(broker)))
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    pub fn router(&self) -> &UpdateRouter {
        &self.router
    }

    pub fn default_scope(&self) -> &ServiceScope {
        &self.defaults
    }

    fn scope(&self, service: &str, subservice: &str) -> ServiceScope {
        ServiceScope::resolve(service, subservice, &self.defaults)
    }

    fn device_key(&self, device_id: &str, service: &str, subservice: &str) -> DeviceKey {
        DeviceKey::scoped(device_id, &self.scope(service, subservice))
    }

    /// Store a device, register it with the context broker and create its
    /// entity.
    ///
    /// The device stays locked until all of it finishes. If any step after
    /// the insert fails, a registration made here is cancelled, the stored
    /// record is removed again and the error returned.
    pub async fn register(&self, device: Device) -> Result<Device> {
        let scope = self.scope(&device.service, &device.subservice);
        let mut device = self
            .registry
            .resolve(device.with_scope(scope.service, scope.subservice));

        let guard = self.registry.lock(&device.key()).await;
        self.registry.insert_locked(&guard, &device).await?;

        if let Err(e) = self.publish_new(&guard, &mut device).await {
            tracing::warn!(
                device_id = %device.id,
                error = %e,
                "Device registration failed, rolling back"
            );
            self.roll_back_new(&guard, &device).await;
            return Err(e);
        }

        tracing::info!(
            device_id = %device.id,
            device_type = %device.device_type,
            service = %device.service,
            subservice = %device.subservice,
            "Device registered"
        );
        Ok(device)
    }

    async fn publish_new(&self, guard: &DeviceGuard, device: &mut Device) -> Result<()> {
        device.registration_id = self.broker.register_device(device).await?;
        self.broker.create_entity(device).await?;
        self.registry.store_locked(guard, device).await
    }

    async fn roll_back_new(&self, guard: &DeviceGuard, device: &Device) {
        if device.registration_id.is_some() {
            if let Err(e) = self.broker.deregister_device(device).await {
                tracing::warn!(
                    device_id = %device.id,
                    error = %e,
                    "Failed to cancel registration of a rolled back device"
                );
            }
        }
        if let Err(e) = self.registry.remove_locked(guard).await {
            tracing::warn!(
                device_id = %device.id,
                error = %e,
                "Failed to remove device after registration failure"
            );
        }
    }

    /// Remove a device and cancel its broker registration.
    ///
    /// The removal is committed before the registration is cancelled.
    pub async fn unregister(
        &self,
        device_id: &str,
        service: &str,
        subservice: &str,
    ) -> Result<()> {
        let key = self.device_key(device_id, service, subservice);
        self.unregister_key(&key).await
    }

    async fn unregister_key(&self, key: &DeviceKey) -> Result<()> {
        let guard = self.registry.lock(key).await;
        let device = self.registry.remove_locked(&guard).await?;
        self.broker.deregister_device(&device).await?;
        tracing::info!(device = %key, "Device unregistered");
        Ok(())
    }

    pub async fn get_device(
        &self,
        device_id: &str,
        service: &str,
        subservice: &str,
    ) -> Result<Device> {
        self.registry
            .get(&self.device_key(device_id, service, subservice))
            .await
    }

    pub async fn find_device(
        &self,
        entity_name: &str,
        entity_type: &str,
        service: &str,
        subservice: &str,
    ) -> Result<Device> {
        let scope = self.scope(service, subservice);
        self.registry
            .find(&EntityKey {
                service: scope.service,
                subservice: scope.subservice,
                name: entity_name.to_string(),
                entity_type: entity_type.to_string(),
            })
            .await
    }

    pub async fn list_devices(
        &self,
        service: &str,
        subservice: &str,
        page: Page,
    ) -> Result<DevicePage> {
        self.registry
            .list(&self.scope(service, subservice), page)
            .await
    }

    /// Add attributes and commands to a registered device and re-register it
    /// under its existing registration with the full attribute list.
    ///
    /// Entries named like an existing one replace it. Only newly added active
    /// attributes are appended to the entity, so current values stay intact.
    /// If anything fails after the broker accepted the new registration, the
    /// previous one is restored and nothing is stored.
    pub async fn update_registration(
        &self,
        device_id: &str,
        service: &str,
        subservice: &str,
        update: RegistrationUpdate,
    ) -> Result<Device> {
        let key = self.device_key(device_id, service, subservice);
        let guard = self.registry.lock(&key).await;
        let previous = self.registry.get_locked(&guard).await?;

        let mut device = previous.clone();
        upsert(&mut device.active, update.active);
        upsert(&mut device.lazy, update.lazy);
        upsert(&mut device.commands, update.commands);

        let added: Vec<Attribute> = device
            .active
            .iter()
            .filter(|attr| !previous.active.iter().any(|p| p.name == attr.name))
            .map(Attribute::empty)
            .collect();

        device.registration_id = self.broker.register_device(&device).await?;
        if let Err(e) = self.complete_update(&guard, &device, &added).await {
            tracing::warn!(
                device = %key,
                error = %e,
                "Registration update failed, restoring previous registration"
            );
            self.restore_registration(&previous, &device).await;
            return Err(e);
        }

        tracing::info!(device = %key, "Device registration updated");
        Ok(device)
    }

    async fn complete_update(
        &self,
        guard: &DeviceGuard,
        device: &Device,
        added: &[Attribute],
    ) -> Result<()> {
        if !added.is_empty() {
            self.broker.push_update(&device.entity(), added).await?;
        }
        self.registry.store_locked(guard, device).await
    }

    async fn restore_registration(&self, previous: &Device, attempted: &Device) {
        let restored = if previous.registration_id.is_some() {
            self.broker.register_device(previous).await.map(|_| ())
        } else {
            self.broker.deregister_device(attempted).await
        };
        if let Err(e) = restored {
            tracing::warn!(
                device_id = %previous.id,
                error = %e,
                "Failed to restore previous registration"
            );
        }
    }

    /// Push values reported by a device to its entity.
    ///
    /// Attributes sent without a type take the type of the matching active
    /// attribute.
    pub async fn update_value(
        &self,
        device_id: &str,
        service: &str,
        subservice: &str,
        attributes: &[Attribute],
    ) -> Result<()> {
        let device = self.get_device(device_id, service, subservice).await?;

        let typed: Vec<Attribute> = attributes
            .iter()
            .map(|attr| {
                let mut attr = attr.clone();
                if attr.attr_type.is_empty() {
                    if let Some(definition) = device.active.iter().find(|a| a.name == attr.name) {
                        attr.attr_type = definition.attr_type.clone();
                    }
                }
                attr
            })
            .collect();

        self.broker.push_update(&device.entity(), &typed).await?;
        Ok(())
    }

    /// Record the result of a command and publish it. `status` must be
    /// `FINISHED` or `ERROR`.
    #[allow(clippy::too_many_arguments)]
    pub async fn report_command_result(
        &self,
        device_id: &str,
        device_type: &str,
        service: &str,
        subservice: &str,
        command: &str,
        value: &str,
        status: &str,
    ) -> Result<CommandInvocation> {
        let status: CommandStatus = status.parse()?;
        let key = self.device_key(device_id, service, subservice);
        self.tracker
            .report_result(&key, device_type, command, value, status)
            .await
    }

    /// Inbound update from the broker.
    pub async fn handle_update(&self, update: ContextUpdate) -> Result<ContextElement> {
        self.router.route(update).await
    }

    /// Inbound query from the broker.
    pub async fn handle_query(&self, query: ContextQuery) -> Result<ContextElement> {
        self.router.query(query).await
    }

    pub fn set_data_update_handler(&self, handler: Arc<dyn DataUpdateHandler>) {
        self.handlers.set_data_update_handler(handler);
    }

    pub fn set_command_handler(&self, handler: Arc<dyn CommandHandler>) {
        self.handlers.set_command_handler(handler);
    }

    pub fn set_data_query_handler(&self, handler: Arc<dyn DataQueryHandler>) {
        self.handlers.set_data_query_handler(handler);
    }

    pub fn clear_handlers(&self) {
        self.handlers.clear();
    }

    /// Unregister every device in every scope.
    ///
    /// Keeps going past failures and returns the first one, if any.
    /// Otherwise returns the number of devices unregistered.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut removed = 0;
        let mut first_error: Option<Error> = None;

        for key in self.registry.keys().await? {
            match self.unregister_key(&key).await {
                Ok(()) => removed += 1,
                // Removed concurrently.
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(device = %key, error = %e, "Failed to unregister device");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(removed, "All devices unregistered");
                Ok(removed)
            }
        }
    }
}

fn upsert(existing: &mut Vec<AttributeDefinition>, additions: Vec<AttributeDefinition>) {
    for attr in additions {
        match existing.iter_mut().find(|a| a.name == attr.name) {
            Some(slot) => *slot = attr,
            None => existing.push(attr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_replaces_by_name() {
        let mut attrs = vec![
            AttributeDefinition::new("pressure", "Hgmm"),
            AttributeDefinition::new("temperature", "centigrades"),
        ];
        upsert(
            &mut attrs,
            vec![
                AttributeDefinition::new("pressure", "Pa"),
                AttributeDefinition::new("humidity", "percentage"),
            ],
        );
        assert_eq!(
            attrs,
            vec![
                AttributeDefinition::new("pressure", "Pa"),
                AttributeDefinition::new("temperature", "centigrades"),
                AttributeDefinition::new("humidity", "percentage"),
            ]
        );
    }

    #[test]
    fn test_from_config_rejects_invalid_config() {
        let config = AgentConfig::default();
        assert!(matches!(IotAgent::from_config(config), Err(Error::Config(_))));
    }
}
