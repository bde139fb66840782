//! Type catalog: device type schemas and schema/device merging.
//!
//! Schemas are loaded once from configuration and only looked up afterwards.
//! A schema may be bound to a service and/or subservice; unbound schemas
//! apply to every scope.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeDefinition, StaticAttribute};
use crate::device::Device;

/// Attribute schema for one device type.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subservice: Option<String>,
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
}

impl DeviceTypeSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_scope(mut self, service: impl Into<String>, subservice: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self.subservice = Some(subservice.into());
        self
    }

    pub fn with_active(mut self, name: &str, attr_type: &str) -> Self {
        self.active.push(AttributeDefinition::new(name, attr_type));
        self
    }

    pub fn with_lazy(mut self, name: &str, attr_type: &str) -> Self {
        self.lazy.push(AttributeDefinition::new(name, attr_type));
        self
    }

    pub fn with_command(mut self, name: &str, attr_type: &str) -> Self {
        self.commands.push(AttributeDefinition::new(name, attr_type));
        self
    }

    pub fn with_static(mut self, name: &str, attr_type: &str, value: &str) -> Self {
        self.static_attributes
            .push(StaticAttribute::new(name, attr_type, value));
        self
    }

    pub fn with_internal(mut self, key: &str, value: serde_json::Value) -> Self {
        self.internal_attributes.insert(key.to_string(), value);
        self
    }

    /// Match rank for a scope: 3 exact, 2 service-only, 1 subservice-only,
    /// 0 unbound.
    fn rank(&self, service: &str, subservice: &str) -> Option<u8> {
        match (&self.service, &self.subservice) {
            (Some(s), Some(ss)) if s == service && ss == subservice => Some(3),
            (Some(s), None) if s == service => Some(2),
            (None, Some(ss)) if ss == subservice => Some(1),
            (None, None) => Some(0),
            _ => None,
        }
    }
}

/// Read-only lookup of device type schemas.
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    types: HashMap<String, Vec<DeviceTypeSchema>>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a name → schema table, as found in configuration.
    pub fn from_types(types: &BTreeMap<String, DeviceTypeSchema>) -> Self {
        let mut catalog = Self::new();
        for (name, schema) in types {
            catalog.insert(name, schema.clone());
        }
        catalog
    }

    pub fn insert(&mut self, type_name: impl Into<String>, schema: DeviceTypeSchema) {
        self.types.entry(type_name.into()).or_default().push(schema);
    }

    /// Find the most specific schema for a type within a scope.
    pub fn lookup(
        &self,
        type_name: &str,
        service: &str,
        subservice: &str,
    ) -> Option<&DeviceTypeSchema> {
        self.types
            .get(type_name)?
            .iter()
            .filter_map(|schema| schema.rank(service, subservice).map(|rank| (rank, schema)))
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, schema)| schema)
    }

    /// Resolve a device against its type: merge the schema (if any) and fill
    /// entity defaults.
    pub fn resolve(&self, device: Device) -> Device {
        let mut resolved =
            match self.lookup(&device.device_type, &device.service, &device.subservice) {
                Some(schema) => merge_device(schema, device),
                None => {
                    tracing::debug!(
                        device_type = %device.device_type,
                        "No schema for device type, keeping device attributes only"
                    );
                    device
                }
            };
        resolved.resolve_entity();
        resolved
    }

    pub fn len(&self) -> usize {
        self.types.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Merge schema attributes with device-supplied ones.
///
/// Schema entries come first in schema order; a device entry with the same
/// name replaces the schema entry in place, other device entries are
/// appended. Internal attributes merge key by key with the device winning.
pub fn merge_device(schema: &DeviceTypeSchema, mut device: Device) -> Device {
    device.active = merge_named(&schema.active, std::mem::take(&mut device.active), |a| {
        a.name.as_str()
    });
    device.lazy = merge_named(&schema.lazy, std::mem::take(&mut device.lazy), |a| {
        a.name.as_str()
    });
    device.commands = merge_named(&schema.commands, std::mem::take(&mut device.commands), |a| {
        a.name.as_str()
    });
    device.static_attributes = merge_named(
        &schema.static_attributes,
        std::mem::take(&mut device.static_attributes),
        |a| a.name.as_str(),
    );

    let mut internal = schema.internal_attributes.clone();
    internal.extend(std::mem::take(&mut device.internal_attributes));
    device.internal_attributes = internal;

    device
}

fn merge_named<T: Clone>(base: &[T], overrides: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    let mut merged = base.to_vec();
    for item in overrides {
        match merged.iter().position(|existing| name(existing) == name(&item)) {
            Some(pos) => merged[pos] = item,
            None => merged.push(item),
        }
    }
    merged
}
