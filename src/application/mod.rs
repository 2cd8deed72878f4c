//! Application services layer: read-side facades and the composition root.

pub mod error;
pub mod feeds;
pub mod services;
pub mod usernames;
pub mod views;

pub use feeds::FeedCache;
pub use services::{CoreServices, PurgeStats};
pub use usernames::UsernameHints;
pub use views::ViewDeduplicator;
