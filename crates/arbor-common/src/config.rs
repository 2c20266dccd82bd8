//! Configuration structures for arbor.

use crate::error::{ArborError, Result};
use serde::{Deserialize, Serialize};

/// Minimum node cache capacity.
///
/// The root, head, and tail nodes are pinned for the lifetime of an open
/// tree, so at least one unpinned slot must remain for faulting.
pub const MIN_CACHE_CAPACITY: usize = 4;

/// Configuration for an on-disk B+ tree index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Maximum number of resident nodes held by the LRU cache.
    pub cache_capacity: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 512,
        }
    }
}

impl TreeConfig {
    /// Creates a configuration with the given cache capacity.
    pub fn with_cache_capacity(cache_capacity: usize) -> Self {
        Self { cache_capacity }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity < MIN_CACHE_CAPACITY {
            return Err(ArborError::InvalidParameter {
                name: "cache_capacity",
                value: self.cache_capacity.to_string(),
            });
        }
        Ok(())
    }
}
