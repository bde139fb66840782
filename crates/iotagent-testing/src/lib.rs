//! Test utilities for the IoT agent.
//!
//! Provides a mock NGSI context broker served over HTTP, in-process recording
//! fakes for the broker and the southbound handlers, and isolated temp
//! database helpers.

pub mod mock_broker;
pub mod recording;
pub mod test_utils;

pub use mock_broker::{MockContextBroker, RecordedRequest};
pub use recording::{HandlerCall, RecordingBroker, RecordingHandler};
pub use test_utils::{TestDbConfig, agent_config, test_id};
