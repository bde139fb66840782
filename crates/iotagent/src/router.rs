//! Routing of inbound context updates and queries.

use serde::{Deserialize, Serialize};

use iotagent_commands::CommandTracker;
use iotagent_core::{Attribute, Device, EntityKey, Error, Result, ServiceScope};
use iotagent_devices::DeviceRegistry;
use iotagent_ngsi::ContextElement;

use crate::handlers::Handlers;

/// Attribute writes the broker forwarded to an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUpdate {
    pub entity_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub subservice: String,
    pub attributes: Vec<Attribute>,
}

impl ContextUpdate {
    pub fn new(
        entity_name: impl Into<String>,
        entity_type: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_type: entity_type.into(),
            service: String::new(),
            subservice: String::new(),
            attributes,
        }
    }

    pub fn with_scope(mut self, service: impl Into<String>, subservice: impl Into<String>) -> Self {
        self.service = service.into();
        self.subservice = subservice.into();
        self
    }

    fn entity_key(&self) -> EntityKey {
        EntityKey {
            service: self.service.clone(),
            subservice: self.subservice.clone(),
            name: self.entity_name.clone(),
            entity_type: self.entity_type.clone(),
        }
    }
}

/// Attribute reads the broker forwarded to an entity. An empty attribute
/// list asks for every lazy attribute of the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextQuery {
    pub entity_name: String,
    pub entity_type: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub subservice: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl ContextQuery {
    pub fn new(
        entity_name: impl Into<String>,
        entity_type: impl Into<String>,
        attributes: Vec<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_type: entity_type.into(),
            service: String::new(),
            subservice: String::new(),
            attributes,
        }
    }

    pub fn with_scope(mut self, service: impl Into<String>, subservice: impl Into<String>) -> Self {
        self.service = service.into();
        self.subservice = subservice.into();
        self
    }

    fn entity_key(&self) -> EntityKey {
        EntityKey {
            service: self.service.clone(),
            subservice: self.subservice.clone(),
            name: self.entity_name.clone(),
            entity_type: self.entity_type.clone(),
        }
    }
}

/// Splits inbound updates into data and command paths.
#[derive(Clone)]
pub struct UpdateRouter {
    registry: DeviceRegistry,
    tracker: CommandTracker,
    handlers: Handlers,
    defaults: ServiceScope,
}

impl UpdateRouter {
    pub fn new(
        registry: DeviceRegistry,
        tracker: CommandTracker,
        handlers: Handlers,
        defaults: ServiceScope,
    ) -> Self {
        Self {
            registry,
            tracker,
            handlers,
            defaults,
        }
    }

    /// Dispatch an update.
    ///
    /// Attributes named like one of the device's commands take the command
    /// path, the rest the data path. Both paths run even if the other fails;
    /// the first failure (data before command) is returned. On success the
    /// entity is echoed back with the received attributes; handler answers
    /// are not forwarded.
    pub async fn route(&self, mut update: ContextUpdate) -> Result<ContextElement> {
        let scope = ServiceScope::resolve(&update.service, &update.subservice, &self.defaults);
        update.service = scope.service;
        update.subservice = scope.subservice;

        let device = self.registry.find(&update.entity_key()).await?;
        let (commands, data): (Vec<Attribute>, Vec<Attribute>) = update
            .attributes
            .iter()
            .cloned()
            .partition(|attr| device.has_command(&attr.name));

        tracing::debug!(
            device_id = %device.id,
            entity = %device.name,
            data = data.len(),
            commands = commands.len(),
            "Routing context update"
        );

        let (data_result, command_result) = tokio::join!(
            self.dispatch_data(&device, &data),
            self.dispatch_commands(&device, &commands),
        );
        data_result?;
        command_result?;

        Ok(ContextElement::for_entity(&device.entity(), update.attributes))
    }

    /// Answer a query through the data-query handler.
    pub async fn query(&self, mut query: ContextQuery) -> Result<ContextElement> {
        let scope = ServiceScope::resolve(&query.service, &query.subservice, &self.defaults);
        query.service = scope.service;
        query.subservice = scope.subservice;

        let device = self.registry.find(&query.entity_key()).await?;
        let names = if query.attributes.is_empty() {
            device.lazy.iter().map(|a| a.name.clone()).collect()
        } else {
            query.attributes
        };

        let handler = self
            .handlers
            .data_query()
            .ok_or_else(|| Error::Handler("no data query handler installed".to_string()))?;
        let attributes = handler
            .handle_query(&device, &names)
            .await
            .map_err(handler_error)?;

        Ok(ContextElement::for_entity(&device.entity(), attributes))
    }

    async fn dispatch_data(&self, device: &Device, data: &[Attribute]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let handler = self
            .handlers
            .data_update()
            .ok_or_else(|| Error::Handler("no data update handler installed".to_string()))?;
        let acknowledged = handler
            .handle_update(device, data)
            .await
            .map_err(handler_error)?;
        tracing::debug!(
            device_id = %device.id,
            acknowledged = acknowledged.len(),
            "Data update handled"
        );
        Ok(())
    }

    async fn dispatch_commands(&self, device: &Device, commands: &[Attribute]) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let handler = self
            .handlers
            .command()
            .ok_or_else(|| Error::Handler("no command handler installed".to_string()))?;

        let device = self.tracker.record_pending(&device.key(), commands).await?;
        handler
            .handle_command(&device, commands)
            .await
            .map_err(handler_error)?;
        self.tracker.publish_pending(&device, commands).await
    }
}

fn handler_error(e: anyhow::Error) -> Error {
    Error::Handler(format!("{:#}", e))
}
