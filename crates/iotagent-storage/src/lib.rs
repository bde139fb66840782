//! Persistent storage for the IoT agent.
//!
//! Devices are kept as JSON documents in an embedded redb database shared by
//! every agent instance pointed at the same file.

pub mod device_store;
pub mod error;

pub use device_store::{DeviceStore, StoredPage};
pub use error::{Error, Result};
