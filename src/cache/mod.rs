//! Vitrine asset cache.
//!
//! Resolved assets (real origin bytes and placeholders alike) are kept in an
//! [`AssetStore`]. Two backends implement it:
//!
//! - **memory**: process-local LRU, fast, lost on restart
//! - **postgres**: shared table, survives restarts (see `infra::db`)
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "memory"
//! memory_entry_limit = 1024
//! success_ttl_seconds = 2592000
//! placeholder_ttl_seconds = 86400
//! ```

mod config;
mod lock;
mod store;

pub use config::{CacheConfig, StoreBackend, TtlPolicy};
pub use store::{AssetStore, CachedAsset, MemoryStore, StoreError};
