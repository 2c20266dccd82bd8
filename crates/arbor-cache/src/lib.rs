//! Bounded LRU cache for arbor.
//!
//! This crate provides:
//! - An LRU cache owning its values, with an intrusive recency list
//! - Pin/unpin support excluding entries from eviction
//! - An eviction observer invoked once per evicted value
//! - Pluggable access statistics (counting or no-op)

mod lru;
mod stats;

pub use lru::{EvictionObserver, LruCache, MruIter, NullObserver};
pub use stats::{Counters, NullStats, Statistics};
