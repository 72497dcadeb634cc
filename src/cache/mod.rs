//! Cache layers sitting in front of the upstream catalog API and the
//! per-user document store.

pub mod keys;
pub mod memory;
pub mod persistent;
pub mod store;

pub use memory::TtlCache;
pub use persistent::{CACHE_DURATION, CacheManager};
pub use store::{FileStore, KeyValueStore, MemoryStore, StorageError};
