//! Key/value cache management for incremental decoding.
//!
//! The dispatcher writes each step's keys and values into a [`KvCache`] and
//! attends over its valid prefix.

pub mod cache;
pub mod layout;

pub use cache::KvCache;
pub use layout::CacheLayout;
