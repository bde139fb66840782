//! Command tracker.

use std::sync::Arc;

use chrono::Utc;

use iotagent_core::{
    Attribute, CommandInvocation, CommandStatus, Device, DeviceKey, Error, Result,
};
use iotagent_devices::DeviceRegistry;
use iotagent_ngsi::{COMMAND_STATUS_TYPE, ContextBroker};

/// Name of the attribute carrying a command's status.
pub fn status_attribute_name(command: &str) -> String {
    format!("{}_status", command)
}

pub fn status_attribute(command: &str, status: CommandStatus) -> Attribute {
    Attribute::new(
        status_attribute_name(command),
        COMMAND_STATUS_TYPE,
        status.as_str(),
    )
}

/// Records command state on devices and publishes it north-bound.
#[derive(Clone)]
pub struct CommandTracker {
    registry: DeviceRegistry,
    broker: Arc<dyn ContextBroker>,
}

impl CommandTracker {
    pub fn new(registry: DeviceRegistry, broker: Arc<dyn ContextBroker>) -> Self {
        Self { registry, broker }
    }

    /// Mark every command as PENDING with its invocation value.
    ///
    /// Replaces any earlier invocation of the same command. Returns the
    /// updated device.
    pub async fn record_pending(&self, key: &DeviceKey, commands: &[Attribute]) -> Result<Device> {
        let (device, ()) = self
            .registry
            .modify(key, |device| {
                for command in commands {
                    if !device.has_command(&command.name) {
                        return Err(Error::InvalidCommand(command.name.clone()));
                    }
                    device.command_status.insert(
                        command.name.clone(),
                        CommandInvocation::pending(&command.name, &command.value),
                    );
                }
                Ok(())
            })
            .await?;

        tracing::debug!(
            device_id = %key.device_id,
            commands = commands.len(),
            "Commands recorded as pending"
        );
        Ok(device)
    }

    /// Publish `<command>_status = PENDING` for every command in one update.
    pub async fn publish_pending(&self, device: &Device, commands: &[Attribute]) -> Result<()> {
        let attributes: Vec<Attribute> = commands
            .iter()
            .map(|c| status_attribute(&c.name, CommandStatus::Pending))
            .collect();
        self.broker
            .push_update(&device.entity(), &attributes)
            .await?;
        Ok(())
    }

    /// Record the result a device reported for a command and publish it.
    ///
    /// `status` must be terminal. The device must be of `device_type` and
    /// declare `command`. The stored invocation is updated before the
    /// publication; a failed publication is returned to the caller.
    pub async fn report_result(
        &self,
        key: &DeviceKey,
        device_type: &str,
        command: &str,
        value: &str,
        status: CommandStatus,
    ) -> Result<CommandInvocation> {
        if !status.is_terminal() {
            return Err(Error::InvalidStatus(status.to_string()));
        }

        let (device, invocation) = self
            .registry
            .modify(key, |device| {
                if device.device_type != device_type {
                    return Err(Error::device_not_found(key));
                }
                if !device.has_command(command) {
                    return Err(Error::InvalidCommand(command.to_string()));
                }

                let invocation = device
                    .command_status
                    .entry(command.to_string())
                    .or_insert_with(|| CommandInvocation {
                        name: command.to_string(),
                        value: None,
                        status,
                        result: None,
                        updated_at: Utc::now(),
                    });
                invocation.status = status;
                invocation.result = Some(value.to_string());
                invocation.updated_at = Utc::now();
                Ok(invocation.clone())
            })
            .await?;

        let command_type = device
            .command(command)
            .map(|c| c.attr_type.clone())
            .unwrap_or_default();
        let attributes = [
            Attribute::new(command, command_type, value),
            status_attribute(command, status),
        ];
        self.broker
            .push_update(&device.entity(), &attributes)
            .await?;

        tracing::info!(
            device_id = %key.device_id,
            command,
            %status,
            "Command result reported"
        );
        Ok(invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_attribute() {
        let attr = status_attribute("position", CommandStatus::Finished);
        assert_eq!(attr.name, "position_status");
        assert_eq!(attr.attr_type, "commandStatus");
        assert_eq!(attr.value, "FINISHED");
    }
}
