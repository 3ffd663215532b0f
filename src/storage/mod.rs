//! Local owned cache.
//!
//! [`LocalCache`] is the contract the sync layer relies on; [`InMemoryCache`]
//! is the store used by default.

pub mod memory;
pub mod traits;

pub use memory::InMemoryCache;
pub use traits::{CacheError, CacheNotification, LocalCache, ReadMode, ReadOptions};
