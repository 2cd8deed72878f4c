//! Space-bounded probabilistic sets for uniqueness hints and view
//! deduplication.

mod config;
mod params;
mod store;

pub use config::{BloomConfig, BloomFamilyConfig, FailurePolicy, family_of};
pub use params::{BloomError, BloomParams};
pub use store::{BloomFilterStore, BloomInstance};
