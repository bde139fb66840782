//! Core types for the IoT agent.
//!
//! Defines the device model, the type catalog, configuration and the error
//! taxonomy shared by every other crate.

pub mod attribute;
pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod telemetry;

pub use attribute::{Attribute, AttributeDefinition, StaticAttribute};
pub use catalog::{DeviceTypeSchema, TypeCatalog, merge_device};
pub use config::{
    AgentConfig, BrokerConfig, LogConfig, LogFormat, RegistryBackendKind, RegistryConfig,
};
pub use device::{
    CommandInvocation, CommandStatus, ContextEntity, Device, DeviceKey, EntityKey, ServiceScope,
};
pub use error::{Error, Result};
