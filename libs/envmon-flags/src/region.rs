//! Region expression grammar
//!
//! ```text
//! expr  := group (";" group)*     OR of groups
//! group := cond ("," cond)*       AND of conditions
//! cond  := comparator number      comparator ∈ = != < <= > >=
//! ```
//!
//! `">=10,<=20;=0"` matches values in [10, 20] and exactly 0. An empty
//! expression matches nothing.

use crate::error::{FlagError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Comparison operator of one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    /// Two-character operators first so `<=` is never read as `<`
    const TOKENS: [(&'static str, Comparator); 6] = [
        ("!=", Comparator::Ne),
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("=", Comparator::Eq),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    pub fn compare(&self, left: f64, right: f64) -> bool {
        match self {
            Comparator::Eq => (left - right).abs() < f64::EPSILON,
            Comparator::Ne => (left - right).abs() >= f64::EPSILON,
            Comparator::Lt => left < right,
            Comparator::Le => left <= right,
            Comparator::Gt => left > right,
            Comparator::Ge => left >= right,
        }
    }

    /// Split a leading comparator off `s`
    fn split_prefix(s: &str) -> Option<(Comparator, &str)> {
        Self::TOKENS
            .iter()
            .find_map(|&(token, op)| s.strip_prefix(token).map(|rest| (op, rest)))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub comparator: Comparator,
    pub threshold: f64,
}

impl Condition {
    pub fn new(comparator: Comparator, threshold: f64) -> Self {
        Self {
            comparator,
            threshold,
        }
    }

    pub fn matches(&self, value: f64) -> bool {
        self.comparator.compare(value, self.threshold)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.comparator, self.threshold)
    }
}

/// Longest accepted invariance window: one leap year
pub const MAX_INVARIANCE_HOURS: f64 = 366.0 * 24.0;

/// Parsed region expression: OR of AND-groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionSet {
    groups: Vec<Vec<Condition>>,
}

impl RegionSet {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason: String| FlagError::InvalidRegion {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut groups = Vec::new();
        for (gi, group_text) in trimmed.split(';').enumerate() {
            let group_text = group_text.trim();
            if group_text.is_empty() {
                return Err(invalid(format!("group {} is empty", gi + 1)));
            }

            let mut group = Vec::new();
            for cond_text in group_text.split(',') {
                let cond_text = cond_text.trim();
                if cond_text.is_empty() {
                    return Err(invalid(format!("empty condition in group {}", gi + 1)));
                }
                let (comparator, number) = Comparator::split_prefix(cond_text)
                    .ok_or_else(|| invalid(format!("'{}' has no comparator", cond_text)))?;
                let number = number.trim();
                let threshold: f64 = number
                    .parse()
                    .map_err(|_| invalid(format!("'{}' is not a number", number)))?;
                if !threshold.is_finite() {
                    return Err(invalid(format!("'{}' is not a finite number", number)));
                }
                group.push(Condition::new(comparator, threshold));
            }
            groups.push(group);
        }

        Ok(Self { groups })
    }

    pub fn from_groups(groups: Vec<Vec<Condition>>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[Vec<Condition>] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// True iff some group has all of its conditions satisfied.
    ///
    /// Every group is evaluated; within a group evaluation stops at the first
    /// failing condition.
    pub fn is_in_region(&self, value: f64) -> bool {
        let mut matched = false;
        for group in &self.groups {
            if group.iter().all(|cond| cond.matches(value)) {
                matched = true;
            }
        }
        matched
    }

    /// Window length in hours of an invariance rule.
    ///
    /// Valid only as a single `=h` or `>=h` condition with
    /// `0 < h <= MAX_INVARIANCE_HOURS`.
    pub fn invariance_hours(&self) -> std::result::Result<f64, String> {
        let [group] = self.groups.as_slice() else {
            return Err(format!("expected exactly one group, found {}", self.groups.len()));
        };
        let [cond] = group.as_slice() else {
            return Err(format!("expected exactly one condition, found {}", group.len()));
        };
        if !matches!(cond.comparator, Comparator::Eq | Comparator::Ge) {
            return Err(format!("comparator '{}' not allowed, use '=' or '>='", cond.comparator));
        }
        if cond.threshold <= 0.0 {
            return Err(format!("window must be positive, got {}", cond.threshold));
        }
        if cond.threshold > MAX_INVARIANCE_HOURS {
            return Err(format!(
                "window of {} h exceeds the {} h limit",
                cond.threshold, MAX_INVARIANCE_HOURS
            ));
        }
        Ok(cond.threshold)
    }
}

impl fmt::Display for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (gi, group) in self.groups.iter().enumerate() {
            if gi > 0 {
                f.write_str(";")?;
            }
            for (ci, cond) in group.iter().enumerate() {
                if ci > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}", cond)?;
            }
        }
        Ok(())
    }
}

impl FromStr for RegionSet {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RegionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        Self::parse(&expr).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_or_of_ands() {
        let region = RegionSet::parse(">=10,<=20;=0").unwrap();
        assert_eq!(region.groups().len(), 2);
        assert_eq!(region.groups()[0].len(), 2);

        assert!(region.is_in_region(15.0));
        assert!(region.is_in_region(0.0));
        assert!(!region.is_in_region(25.0));
        assert!(!region.is_in_region(5.0));
    }

    #[test]
    fn test_greedy_comparators() {
        let region = RegionSet::parse("<=5").unwrap();
        assert_eq!(region.groups()[0][0], Condition::new(Comparator::Le, 5.0));

        let region = RegionSet::parse("!=3").unwrap();
        assert!(region.is_in_region(4.0));
        assert!(!region.is_in_region(3.0));
    }

    #[test]
    fn test_whitespace_and_decimals() {
        let region = RegionSet::parse(" > -1.5 , < 2e1 ").unwrap();
        assert!(region.is_in_region(0.0));
        assert!(!region.is_in_region(20.0));
        assert_eq!(region.to_string(), ">-1.5,<20");
    }

    #[test]
    fn test_empty_matches_nothing() {
        let region = RegionSet::parse("   ").unwrap();
        assert!(region.is_empty());
        assert!(!region.is_in_region(0.0));
    }

    #[test]
    fn test_syntax_errors() {
        for expr in ["10", ">", ">abc", ">>1", "=<1", ">1;", ">1,,<2", ">1x", ">NaN", ">inf"] {
            let err = RegionSet::parse(expr).unwrap_err();
            assert!(
                matches!(err, FlagError::InvalidRegion { .. }),
                "expected syntax error for {expr:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_display_reparses_to_same_set() {
        let region: RegionSet = ">=10,<=20;=0;!=7.25".parse().unwrap();
        let text = region.to_string();
        assert_eq!(text, ">=10,<=20;=0;!=7.25");
        assert_eq!(RegionSet::parse(&text).unwrap(), region);
    }

    #[test]
    fn test_invariance_hours() {
        assert_eq!(RegionSet::parse("=6").unwrap().invariance_hours(), Ok(6.0));
        assert_eq!(RegionSet::parse(">=2.5").unwrap().invariance_hours(), Ok(2.5));

        assert_eq!(
            RegionSet::parse("=8784").unwrap().invariance_hours(),
            Ok(MAX_INVARIANCE_HOURS)
        );

        for expr in ["", ">6", "=0", "=-1", "=1,=2", "=1;=2", "=8784.5", "=1e10"] {
            assert!(
                RegionSet::parse(expr).unwrap().invariance_hours().is_err(),
                "{expr:?} should not be a valid invariance rule"
            );
        }
    }
}
