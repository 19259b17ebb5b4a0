//! Region rules bound to (station, factor, flag)

use crate::catalog::FlagDefinition;
use crate::error::{FlagError, Result};
use crate::region::RegionSet;
use envmon_model::{FactorId, StationId};
use serde::Serialize;

/// Station id of tenant-wide default rules
pub const TENANT_WIDE_STATION: StationId = 0;

/// A region expression scoped to one station/factor/flag.
///
/// The parsed form always corresponds to `expression`; mutation re-parses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagRule {
    pub station: StationId,
    pub factor: FactorId,
    pub flag: String,
    expression: String,
    #[serde(skip)]
    region: RegionSet,
}

impl FlagRule {
    pub fn new(
        station: StationId,
        factor: FactorId,
        flag: impl Into<String>,
        expression: impl Into<String>,
    ) -> Result<Self> {
        let expression = expression.into();
        let region = RegionSet::parse(&expression)?;
        Ok(Self {
            station,
            factor,
            flag: flag.into(),
            expression,
            region,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn region(&self) -> &RegionSet {
        &self.region
    }

    pub fn is_tenant_wide(&self) -> bool {
        self.station == TENANT_WIDE_STATION
    }

    /// Replace the expression; the rule is left unchanged if it fails to parse
    pub fn set_expression(&mut self, expression: impl Into<String>) -> Result<()> {
        let expression = expression.into();
        self.region = RegionSet::parse(&expression)?;
        self.expression = expression;
        Ok(())
    }

    pub fn is_in_region(&self, value: f64) -> bool {
        self.region.is_in_region(value)
    }

    /// Invariance window in hours
    pub fn invariance_hours(&self) -> Result<f64> {
        self.region
            .invariance_hours()
            .map_err(|reason| FlagError::InvalidInvarianceRule {
                flag: self.flag.clone(),
                reason,
            })
    }

    /// Check the rule against the definition it belongs to
    pub fn validate_for(&self, definition: &FlagDefinition) -> Result<()> {
        if definition.name != self.flag {
            return Err(FlagError::Config(format!(
                "rule for flag '{}' checked against definition '{}'",
                self.flag, definition.name
            )));
        }
        if definition.is_invariance() {
            self.invariance_hours()?;
        }
        Ok(())
    }
}
