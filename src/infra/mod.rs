//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod memory;
pub mod store;
pub mod telemetry;

pub use memory::MemoryKvStore;
pub use store::{KvStore, StoreError};
