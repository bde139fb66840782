//! North-bound context broker client (NGSIv1).
//!
//! Registers devices as context providers, creates their entities and pushes
//! attribute updates. Everything goes through the [`ContextBroker`] trait so
//! the agent can run against a real broker or an in-process fake.

pub mod client;
pub mod error;
pub mod messages;

pub use client::{ContextBroker, NgsiClient, headers, initial_attributes};
pub use error::{BrokerError, Result};
pub use messages::{
    COMMAND_STATUS_TYPE, ContextAttribute, ContextElement, ContextElementResponse,
    ContextRegistration, EntityId, RegisterContextRequest, RegisterContextResponse,
    RegistrationAttribute, StatusCode, UpdateAction, UpdateContextRequest,
    UpdateContextResponse,
};
