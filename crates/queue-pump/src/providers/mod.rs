//! Receiver implementations bundled with the crate.

pub mod memory;

pub use memory::{InMemoryConfig, InMemoryQueue};
