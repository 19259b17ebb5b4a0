//! Environmental Monitoring Data Model
//!
//! Core domain types shared by the recent-value cache and the flag engine.
//! This library is pure data: no I/O, no async.
//!
//! # Modules
//!
//! - `types`: identifiers and the `Granularity` sampling class
//! - `effect`: the `FlagEffect` bitmask attached to quality flags
//! - `reading`: the `Reading` observation and its statistics
//! - `time`: clock abstraction for deterministic tests
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use envmon_model::{FlagEffect, Granularity, Reading};
//!
//! let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
//! let reading = Reading::instant("site-a", 1001, 201, ts, 42.5);
//! assert_eq!(reading.granularity, Granularity::Realtime);
//! assert_eq!(reading.primary_value().unwrap(), 42.5);
//! assert!(reading.effect.is_empty());
//! assert!(FlagEffect::NORMAL.union(FlagEffect::EFFECTIVE).contains(FlagEffect::NORMAL));
//! ```

pub mod effect;
pub mod error;
pub mod reading;
pub mod time;
pub mod types;

// Re-exports for convenience
pub use effect::FlagEffect;
pub use error::{ModelError, Result};
pub use reading::{IntervalStats, Reading, Statistics};
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use types::{FactorId, Granularity, StationId, TenantId, PLACEHOLDER_FACTOR};
