//! Time provider abstraction
//!
//! Separates clock access from cache and engine logic so lookback windows
//! and placeholder timestamps are deterministic under test.

use chrono::{DateTime, Utc};

/// Time provider trait for generating timestamps
pub trait TimeProvider: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// System time provider using the local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed time provider for testing
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeProvider {
    now: DateTime<Utc>,
}

impl FixedTimeProvider {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl TimeProvider for FixedTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}
