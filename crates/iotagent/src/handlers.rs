//! South-bound handlers supplied by the transport layer.
//!
//! The agent never talks to devices itself. Updates, commands and queries
//! arriving from the broker are handed to these handlers, which are set and
//! cleared explicitly on the agent.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use iotagent_core::{Attribute, Device};

/// Receives attribute writes addressed to a device.
///
/// The returned attributes are an acknowledgment only. The broker is always
/// answered with the attributes it sent.
#[async_trait]
pub trait DataUpdateHandler: Send + Sync {
    async fn handle_update(
        &self,
        device: &Device,
        attributes: &[Attribute],
    ) -> anyhow::Result<Vec<Attribute>>;
}

/// Forwards command invocations to a device.
///
/// The returned attributes are an acknowledgment only; the outcome arrives
/// later through a command result report.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(
        &self,
        device: &Device,
        commands: &[Attribute],
    ) -> anyhow::Result<Vec<Attribute>>;
}

/// Reads lazy attribute values from a device.
#[async_trait]
pub trait DataQueryHandler: Send + Sync {
    async fn handle_query(
        &self,
        device: &Device,
        attributes: &[String],
    ) -> anyhow::Result<Vec<Attribute>>;
}

type Slot<T> = Arc<RwLock<Option<Arc<T>>>>;

/// Currently installed handlers. Cloning shares the slots.
#[derive(Clone, Default)]
pub struct Handlers {
    data_update: Slot<dyn DataUpdateHandler>,
    command: Slot<dyn CommandHandler>,
    data_query: Slot<dyn DataQueryHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_data_update_handler(&self, handler: Arc<dyn DataUpdateHandler>) {
        *self.data_update.write() = Some(handler);
    }

    pub fn set_command_handler(&self, handler: Arc<dyn CommandHandler>) {
        *self.command.write() = Some(handler);
    }

    pub fn set_data_query_handler(&self, handler: Arc<dyn DataQueryHandler>) {
        *self.data_query.write() = Some(handler);
    }

    /// Remove every handler.
    pub fn clear(&self) {
        *self.data_update.write() = None;
        *self.command.write() = None;
        *self.data_query.write() = None;
    }

    pub fn data_update(&self) -> Option<Arc<dyn DataUpdateHandler>> {
        self.data_update.read().clone()
    }

    pub fn command(&self) -> Option<Arc<dyn CommandHandler>> {
        self.command.read().clone()
    }

    pub fn data_query(&self) -> Option<Arc<dyn DataQueryHandler>> {
        self.data_query.read().clone()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers")
            .field("data_update", &self.data_update.read().is_some())
            .field("command", &self.command.read().is_some())
            .field("data_query", &self.data_query.read().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl DataUpdateHandler for Echo {
        async fn handle_update(
            &self,
            _device: &Device,
            attributes: &[Attribute],
        ) -> anyhow::Result<Vec<Attribute>> {
            Ok(attributes.to_vec())
        }
    }

    #[test]
    fn test_set_and_clear() {
        let handlers = Handlers::new();
        assert!(handlers.data_update().is_none());

        handlers.set_data_update_handler(Arc::new(Echo));
        let shared = handlers.clone();
        assert!(shared.data_update().is_some());

        handlers.clear();
        assert!(shared.data_update().is_none());
    }
}
