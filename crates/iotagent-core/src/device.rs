//! Device records and command invocations.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeDefinition, StaticAttribute};
use crate::error::Error;

/// Tenant scope every device identity and registration lives in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ServiceScope {
    pub service: String,
    pub subservice: String,
}

impl ServiceScope {
    pub fn new(service: impl Into<String>, subservice: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            subservice: subservice.into(),
        }
    }

    /// Resolve a possibly partial scope, falling back to `defaults` for
    /// empty parts.
    pub fn resolve(service: &str, subservice: &str, defaults: &ServiceScope) -> Self {
        Self {
            service: if service.is_empty() {
                defaults.service.clone()
            } else {
                service.to_string()
            },
            subservice: if subservice.is_empty() {
                defaults.subservice.clone()
            } else {
                subservice.to_string()
            },
        }
    }
}

/// Primary registry key: device id within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub service: String,
    pub subservice: String,
    pub device_id: String,
}

impl DeviceKey {
    pub fn new(
        device_id: impl Into<String>,
        service: impl Into<String>,
        subservice: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            subservice: subservice.into(),
            device_id: device_id.into(),
        }
    }

    pub fn scoped(device_id: impl Into<String>, scope: &ServiceScope) -> Self {
        Self::new(device_id, &scope.service, &scope.subservice)
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}{})", self.device_id, self.service, self.subservice)
    }
}

/// Secondary registry key: north-bound identity within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub service: String,
    pub subservice: String,
    pub name: String,
    pub entity_type: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({}{})",
            self.name, self.entity_type, self.service, self.subservice
        )
    }
}

/// The north-bound entity a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntity {
    pub service: String,
    pub subservice: String,
    pub id: String,
    pub entity_type: String,
}

/// Command status as published in `<command>_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandStatus {
    Pending,
    Finished,
    Error,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Finished | CommandStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "PENDING",
            CommandStatus::Finished => "FINISHED",
            CommandStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(CommandStatus::Pending),
            "FINISHED" => Ok(CommandStatus::Finished),
            "ERROR" => Ok(CommandStatus::Error),
            other => Err(Error::InvalidStatus(other.to_string())),
        }
    }
}

/// Latest invocation of one command on one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandInvocation {
    pub name: String,
    /// Value the command was invoked with. Absent when the first thing seen
    /// for this command was a result report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CommandInvocation {
    pub fn pending(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            status: CommandStatus::Pending,
            result: None,
            updated_at: Utc::now(),
        }
    }
}

/// A device as stored in the registry.
///
/// The serialized form is the persisted document layout; it round-trips
/// through the registry unchanged except for fields explicitly mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub subservice: String,
    /// Entity name. Empty until resolved, then defaults to `<id>:<type>`.
    #[serde(default)]
    pub name: String,
    /// Entity type. Empty until resolved, then defaults to the device type.
    #[serde(default)]
    pub entity_type: String,

    // South-bound transport metadata, opaque to the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apikey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default)]
    pub active: Vec<AttributeDefinition>,
    #[serde(default)]
    pub lazy: Vec<AttributeDefinition>,
    #[serde(default)]
    pub commands: Vec<AttributeDefinition>,
    #[serde(default)]
    pub static_attributes: Vec<StaticAttribute>,
    #[serde(default)]
    pub internal_attributes: serde_json::Map<String, serde_json::Value>,

    /// Handle returned by the broker registration, needed to deregister.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub command_status: BTreeMap<String, CommandInvocation>,
}

impl Device {
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            ..Default::default()
        }
    }

    pub fn with_scope(mut self, service: impl Into<String>, subservice: impl Into<String>) -> Self {
        self.service = service.into();
        self.subservice = subservice.into();
        self
    }

    pub fn with_entity(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.name = name.into();
        self.entity_type = entity_type.into();
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_apikey(mut self, apikey: impl Into<String>) -> Self {
        self.apikey = Some(apikey.into());
        self
    }

    pub fn with_active(mut self, attr: AttributeDefinition) -> Self {
        self.active.push(attr);
        self
    }

    pub fn with_lazy(mut self, attr: AttributeDefinition) -> Self {
        self.lazy.push(attr);
        self
    }

    pub fn with_command(mut self, attr: AttributeDefinition) -> Self {
        self.commands.push(attr);
        self
    }

    pub fn with_static(mut self, attr: StaticAttribute) -> Self {
        self.static_attributes.push(attr);
        self
    }

    pub fn scope(&self) -> ServiceScope {
        ServiceScope::new(&self.service, &self.subservice)
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(&self.id, &self.service, &self.subservice)
    }

    pub fn entity_key(&self) -> EntityKey {
        EntityKey {
            service: self.service.clone(),
            subservice: self.subservice.clone(),
            name: self.name.clone(),
            entity_type: self.entity_type.clone(),
        }
    }

    pub fn entity(&self) -> ContextEntity {
        ContextEntity {
            service: self.service.clone(),
            subservice: self.subservice.clone(),
            id: self.name.clone(),
            entity_type: self.entity_type.clone(),
        }
    }

    /// Fill the entity name and type defaults where not overridden.
    pub fn resolve_entity(&mut self) {
        if self.name.is_empty() {
            self.name = format!("{}:{}", self.id, self.device_type);
        }
        if self.entity_type.is_empty() {
            self.entity_type = self.device_type.clone();
        }
    }

    pub fn command(&self, name: &str) -> Option<&AttributeDefinition> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.command(name).is_some()
    }
}
