//! Chirp cache core: adaptive TTLs driven by recent activity, Bloom filter
//! membership hints, a single-flight cache layer and event-driven
//! invalidation.

pub mod activity;
pub mod application;
pub mod bloom;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
