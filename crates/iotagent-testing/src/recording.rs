//! In-process fakes that record what the agent asks of them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use iotagent::{CommandHandler, DataQueryHandler, DataUpdateHandler};
use iotagent_core::{Attribute, ContextEntity, Device};
use iotagent_ngsi::{BrokerError, ContextBroker};

/// Context broker fake keeping everything in memory.
#[derive(Debug, Default)]
pub struct RecordingBroker {
    registered: Mutex<Vec<Device>>,
    deregistered: Mutex<Vec<Device>>,
    updates: Mutex<Vec<(ContextEntity, Vec<Attribute>)>>,
    fail_registrations: AtomicBool,
    fail_updates: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_registrations(&self, fail: bool) {
        self.fail_registrations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn registered(&self) -> Vec<Device> {
        self.registered.lock().clone()
    }

    pub fn deregistered(&self) -> Vec<Device> {
        self.deregistered.lock().clone()
    }

    pub fn updates(&self) -> Vec<(ContextEntity, Vec<Attribute>)> {
        self.updates.lock().clone()
    }

    /// Attribute lists pushed to one entity id, in order.
    pub fn updates_for(&self, entity_id: &str) -> Vec<Vec<Attribute>> {
        self.updates
            .lock()
            .iter()
            .filter(|(entity, _)| entity.id == entity_id)
            .map(|(_, attributes)| attributes.clone())
            .collect()
    }
}

#[async_trait]
impl ContextBroker for RecordingBroker {
    async fn register_device(&self, device: &Device) -> Result<Option<String>, BrokerError> {
        if self.fail_registrations.load(Ordering::SeqCst) {
            return Err(BrokerError::rejected("500", "Registration refused"));
        }
        self.registered.lock().push(device.clone());

        let id = device.registration_id.clone().unwrap_or_else(|| {
            format!(
                "recorded-registration-{}",
                self.next_id.fetch_add(1, Ordering::SeqCst)
            )
        });
        Ok(Some(id))
    }

    async fn deregister_device(&self, device: &Device) -> Result<(), BrokerError> {
        self.deregistered.lock().push(device.clone());
        Ok(())
    }

    async fn push_update(
        &self,
        entity: &ContextEntity,
        attributes: &[Attribute],
    ) -> Result<(), BrokerError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BrokerError::Timeout(std::time::Duration::from_millis(1)));
        }
        self.updates
            .lock()
            .push((entity.clone(), attributes.to_vec()));
        Ok(())
    }
}

/// One handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerCall {
    pub device_id: String,
    pub entity_name: String,
    pub attributes: Vec<Attribute>,
}

/// Handler fake usable for data updates, commands and queries.
///
/// Updates and commands are acknowledged by echoing their attributes.
/// Queries answer with the configured values, empty for unknown names.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<HandlerCall>>,
    values: Mutex<HashMap<String, String>>,
    fail: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail.
    pub fn failing() -> Self {
        let handler = Self::default();
        handler.fail.store(true, Ordering::SeqCst);
        handler
    }

    pub fn with_value(self, name: &str, value: &str) -> Self {
        self.values.lock().insert(name.to_string(), value.to_string());
        self
    }

    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn record(&self, device: &Device, attributes: &[Attribute]) -> anyhow::Result<()> {
        self.calls.lock().push(HandlerCall {
            device_id: device.id.clone(),
            entity_name: device.name.clone(),
            attributes: attributes.to_vec(),
        });
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("handler failure for device {}", device.id);
        }
        Ok(())
    }
}

#[async_trait]
impl DataUpdateHandler for RecordingHandler {
    async fn handle_update(
        &self,
        device: &Device,
        attributes: &[Attribute],
    ) -> anyhow::Result<Vec<Attribute>> {
        self.record(device, attributes)?;
        Ok(attributes.to_vec())
    }
}

#[async_trait]
impl CommandHandler for RecordingHandler {
    async fn handle_command(
        &self,
        device: &Device,
        commands: &[Attribute],
    ) -> anyhow::Result<Vec<Attribute>> {
        self.record(device, commands)?;
        Ok(commands.to_vec())
    }
}

#[async_trait]
impl DataQueryHandler for RecordingHandler {
    async fn handle_query(
        &self,
        device: &Device,
        attributes: &[String],
    ) -> anyhow::Result<Vec<Attribute>> {
        let values = self.values.lock().clone();
        let answer: Vec<Attribute> = attributes
            .iter()
            .map(|name| {
                let attr_type = device
                    .lazy
                    .iter()
                    .find(|a| &a.name == name)
                    .map(|a| a.attr_type.clone())
                    .unwrap_or_default();
                let value = values.get(name).cloned().unwrap_or_default();
                Attribute::new(name, attr_type, value)
            })
            .collect();
        self.record(device, &answer)?;
        Ok(answer)
    }
}
