//! Recent-Value Cache
//!
//! Layered in-memory cache of the freshest reading per
//! (tenant, granularity, station, factor), backed by a read-through store.
//!
//! # Features
//!
//! - `sqlite-backend` (default): `SqliteStore` over sqlx
//!
//! # Example
//!
//! ```no_run
//! use envmon_cache::{CacheConfig, MemoryStore, RecentCache};
//! use envmon_model::{Granularity, Reading};
//! use std::sync::Arc;
//!
//! # async fn demo() -> envmon_cache::Result<()> {
//! let cache = RecentCache::new(Arc::new(MemoryStore::new()), CacheConfig::default());
//! cache.update("site-a", Reading::instant("site-a", 1001, 201, chrono::Utc::now(), 42.5));
//!
//! let latest = cache.get("site-a", Granularity::Realtime, &[1001]).await?;
//! assert!(latest[&1001].contains_key(&201));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod layer;
pub mod memory_store;
pub mod recent;
#[cfg(feature = "sqlite-backend")]
pub mod sqlite_store;
pub mod store;

pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use memory_store::MemoryStore;
pub use recent::{CacheStats, RecentCache, StationReadings};
#[cfg(feature = "sqlite-backend")]
pub use sqlite_store::SqliteStore;
pub use store::BackingStore;
