//! IoT agent core.
//!
//! Bridges devices to an NGSI context broker: keeps the device registry,
//! registers each device as a context provider, routes inbound updates to
//! data or command handlers and tracks command results.
//!
//! ```no_run
//! use iotagent::{AgentConfig, Device, IotAgent};
//!
//! # async fn run() -> iotagent::Result<()> {
//! let config = AgentConfig::load("config/agent.toml")?;
//! let agent = IotAgent::from_config(config)?;
//! agent.register(Device::new("light1", "Light")).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod handlers;
pub mod router;

pub use agent::{IotAgent, RegistrationUpdate};
pub use handlers::{CommandHandler, DataQueryHandler, DataUpdateHandler, Handlers};
pub use router::{ContextQuery, ContextUpdate, UpdateRouter};

pub use iotagent_commands::CommandTracker;
pub use iotagent_core::{
    AgentConfig, Attribute, AttributeDefinition, CommandInvocation, CommandStatus, Device,
    DeviceKey, DeviceTypeSchema, EntityKey, Error, Result, ServiceScope, StaticAttribute,
    telemetry::init_tracing,
};
pub use iotagent_devices::{DevicePage, DeviceRegistry, MemoryBackend, Page, RegistryBackend};
pub use iotagent_ngsi::{ContextBroker, ContextElement, NgsiClient};
