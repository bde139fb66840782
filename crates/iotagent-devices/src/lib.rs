//! Device registry for the IoT agent.
//!
//! The registry owns every device record. Records live in a pluggable
//! [`RegistryBackend`] (in-memory or redb) and are mutated under a per-device
//! lock so that concurrent updates never lose writes.

pub mod backends;
pub mod locks;
pub mod registry;

pub use backends::{
    DevicePage, MemoryBackend, Page, RedbBackend, RegistryBackend, available_backends,
    create_backend,
};
pub use locks::{DeviceGuard, KeyLocks};
pub use registry::DeviceRegistry;
