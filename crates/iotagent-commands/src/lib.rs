//! Command lifecycle tracking.
//!
//! A command invocation starts PENDING when it arrives from the broker and
//! ends FINISHED or ERROR when the device reports back. Every transition is
//! written to the device record and published as `<command>_status`.

pub mod tracker;

pub use tracker::{CommandTracker, status_attribute, status_attribute_name};
