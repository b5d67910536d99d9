//! Event Deduplicator
//!
//! Audit recording with duplicate suppression, plus the view counter
//! throttle. Both keep their state in an injected [`TtlCache`], in process
//! for a single instance or in Redis when several instances share traffic.

pub mod cache;
pub mod dedup;
pub mod views;

pub use cache::{MemoryTtlCache, RedisTtlCache, TtlCache};
pub use dedup::{dedup_key, EventDeduplicator};
pub use views::ViewThrottle;

/// Redis key prefix for audit dedup entries.
pub const AUDIT_KEY_PREFIX: &str = "audit:dedup";

/// Redis key prefix for view throttle entries.
pub const VIEW_KEY_PREFIX: &str = "views:seen";
