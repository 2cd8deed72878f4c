//! Chirp cache system
//!
//! Adaptive read-through caching for the feed and aggregate APIs:
//!
//! - **CacheLayer**: get-or-compute over the shared key-value store with
//!   single-flight coalescing and activity-driven TTLs
//! - **Invalidation**: domain events are queued, merged into plans and
//!   applied by the [`InvalidationDispatcher`]
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `chirp.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! single_flight_wait_ms = 5000
//! consume_batch_limit = 100
//! # ... see config.rs for all options
//! ```

mod config;
mod consumer;
mod dispatch;
mod error;
mod events;
mod keys;
mod layer;
mod planner;
mod trigger;

pub use config::CacheConfig;
pub use consumer::CacheConsumer;
pub use dispatch::{DispatchState, InvalidationDispatcher, InvalidationReport, Resolution, resolve};
pub use error::CacheError;
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{CacheKey, KeyPattern, digest_ids};
pub use layer::{CacheLayer, Invalidator};
pub use planner::InvalidationPlan;
pub use trigger::CacheTrigger;
