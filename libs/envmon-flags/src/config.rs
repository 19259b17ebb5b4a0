//! Configuration source consumed by the flag engine

use crate::catalog::FlagCatalog;
use crate::error::Result;
use crate::rule::FlagRule;
use async_trait::async_trait;
use envmon_model::{FactorId, StationId};
use std::sync::Arc;

/// Tenant flag configuration lookup
///
/// Returned values are immutable snapshots; a reload publishes new ones
/// without affecting evaluations already holding the old.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load_flag_catalog(&self, tenant: &str) -> Result<Arc<FlagCatalog>>;

    /// Rule stored for exactly this station; no fallback
    async fn load_flag_rule(
        &self,
        tenant: &str,
        station: StationId,
        factor: FactorId,
        flag: &str,
    ) -> Result<Option<Arc<FlagRule>>>;
}
