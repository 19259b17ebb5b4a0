//! Flag effect bitmask
//!
//! Every quality flag carries a set of semantic effects. A reading stores the
//! union of the effects of the flags that contributed to it, so downstream
//! reporting can answer "is this value effective / overproof / stuck" without
//! knowing tenant-specific flag names.
//!
//! # Bit layout
//!
//! | Bit | Value | Effect |
//! |-----|-------|--------|
//! | 0 | 1 | EFFECTIVE |
//! | 1 | 2 | TRANSMISSION |
//! | 2 | 4 | NORMAL |
//! | 3 | 8 | OVERPROOF |
//! | 4 | 16 | DATA_INVARIANCE |
//! | 5 | 32 | TOP_LIMIT |
//! | 6 | 64 | LOW_LIMIT |
//! | 7 | 128 | MANUAL |
//! | 8 | 256 | PRIMARY_POLLUTANT |
//! | 9 | 512 | PUSH |

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;

/// Named bitmask of flag effects
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FlagEffect(u32);

impl FlagEffect {
    pub const EMPTY: FlagEffect = FlagEffect(0);
    pub const EFFECTIVE: FlagEffect = FlagEffect(1 << 0);
    pub const TRANSMISSION: FlagEffect = FlagEffect(1 << 1);
    pub const NORMAL: FlagEffect = FlagEffect(1 << 2);
    pub const OVERPROOF: FlagEffect = FlagEffect(1 << 3);
    pub const DATA_INVARIANCE: FlagEffect = FlagEffect(1 << 4);
    pub const TOP_LIMIT: FlagEffect = FlagEffect(1 << 5);
    pub const LOW_LIMIT: FlagEffect = FlagEffect(1 << 6);
    pub const MANUAL: FlagEffect = FlagEffect(1 << 7);
    pub const PRIMARY_POLLUTANT: FlagEffect = FlagEffect(1 << 8);
    pub const PUSH: FlagEffect = FlagEffect(1 << 9);

    /// Named effects in bit order
    pub const NAMED: [(&'static str, FlagEffect); 10] = [
        ("EFFECTIVE", Self::EFFECTIVE),
        ("TRANSMISSION", Self::TRANSMISSION),
        ("NORMAL", Self::NORMAL),
        ("OVERPROOF", Self::OVERPROOF),
        ("DATA_INVARIANCE", Self::DATA_INVARIANCE),
        ("TOP_LIMIT", Self::TOP_LIMIT),
        ("LOW_LIMIT", Self::LOW_LIMIT),
        ("MANUAL", Self::MANUAL),
        ("PRIMARY_POLLUTANT", Self::PRIMARY_POLLUTANT),
        ("PUSH", Self::PUSH),
    ];

    const KNOWN_BITS: u32 = (1 << 10) - 1;

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping any bit without an assigned effect
    pub const fn from_bits_truncate(bits: u32) -> Self {
        FlagEffect(bits & Self::KNOWN_BITS)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: FlagEffect) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: FlagEffect) -> Self {
        FlagEffect(self.0 | other.0)
    }

    pub const fn remove(self, other: FlagEffect) -> Self {
        FlagEffect(self.0 & !other.0)
    }

    /// Clear the bits of `previous`, then set the bits of `next`.
    ///
    /// This is the single transition used when a reading is reclassified.
    pub const fn replace(self, previous: FlagEffect, next: FlagEffect) -> Self {
        self.remove(previous).union(next)
    }

    /// Names of the effects set in this mask, in bit order
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMED
            .into_iter()
            .filter(move |(_, effect)| self.contains(*effect))
            .map(|(name, _)| name)
    }

    /// Look up a single effect by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, effect)| *effect)
    }

    /// Union of a list of effect names
    pub fn from_names<I, S>(names: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::EMPTY, |acc, name| {
            let name = name.as_ref();
            Self::from_name(name)
                .map(|effect| acc.union(effect))
                .ok_or_else(|| ModelError::InvalidEffect(name.to_string()))
        })
    }
}

impl TryFrom<u32> for FlagEffect {
    type Error = ModelError;

    /// Raw mask; bits without an assigned effect are rejected
    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        if bits & !Self::KNOWN_BITS != 0 {
            return Err(ModelError::InvalidEffect(bits.to_string()));
        }
        Ok(FlagEffect(bits))
    }
}

impl From<FlagEffect> for u32 {
    fn from(effect: FlagEffect) -> u32 {
        effect.0
    }
}

impl BitOr for FlagEffect {
    type Output = FlagEffect;

    fn bitor(self, rhs: FlagEffect) -> FlagEffect {
        self.union(rhs)
    }
}

impl fmt::Debug for FlagEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagEffect({:#x}: {})", self.0, self)
    }
}

impl fmt::Display for FlagEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("EMPTY");
        }
        let names: Vec<&str> = self.names().collect();
        f.write_str(&names.join("|"))
    }
}

impl std::str::FromStr for FlagEffect {
    type Err = ModelError;

    /// Parse either a raw integer mask or a `|`-separated list of names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("EMPTY") {
            return Ok(Self::EMPTY);
        }
        if let Ok(bits) = s.parse::<u32>() {
            return Self::try_from(bits);
        }
        Self::from_names(s.split('|'))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_bit_assignments() {
        assert_eq!(FlagEffect::EFFECTIVE.bits(), 1);
        assert_eq!(FlagEffect::NORMAL.bits(), 4);
        assert_eq!(FlagEffect::OVERPROOF.bits(), 8);
        assert_eq!(FlagEffect::MANUAL.bits(), 128);
        assert_eq!(FlagEffect::PUSH.bits(), 512);
    }

    #[test]
    fn test_replace_clears_previous_then_sets_next() {
        let mask = FlagEffect::EFFECTIVE | FlagEffect::OVERPROOF | FlagEffect::PUSH;
        let next = FlagEffect::EFFECTIVE | FlagEffect::NORMAL;
        let replaced = mask.replace(FlagEffect::EFFECTIVE | FlagEffect::OVERPROOF, next);

        // PUSH did not belong to the previous flag, so it survives
        assert_eq!(replaced, FlagEffect::EFFECTIVE | FlagEffect::NORMAL | FlagEffect::PUSH);
    }

    #[test]
    fn test_contains() {
        let mask = FlagEffect::NORMAL | FlagEffect::EFFECTIVE;
        assert!(mask.contains(FlagEffect::NORMAL));
        assert!(!mask.contains(FlagEffect::NORMAL | FlagEffect::MANUAL));
        assert!(mask.contains(FlagEffect::EMPTY));
    }

    #[test]
    fn test_parse_names_and_bits() {
        let parsed: FlagEffect = "normal|EFFECTIVE".parse().unwrap();
        assert_eq!(parsed, FlagEffect::NORMAL | FlagEffect::EFFECTIVE);

        let parsed: FlagEffect = "12".parse().unwrap();
        assert_eq!(parsed, FlagEffect::NORMAL | FlagEffect::OVERPROOF);

        assert!("BOGUS".parse::<FlagEffect>().is_err());
        assert!("4096".parse::<FlagEffect>().is_err());
        assert_eq!("".parse::<FlagEffect>().unwrap(), FlagEffect::EMPTY);
    }

    #[test]
    fn test_display_round_trip() {
        let mask = FlagEffect::OVERPROOF | FlagEffect::TOP_LIMIT;
        assert_eq!(mask.to_string(), "OVERPROOF|TOP_LIMIT");
        assert_eq!(mask.to_string().parse::<FlagEffect>().unwrap(), mask);
        assert_eq!(FlagEffect::EMPTY.to_string(), "EMPTY");
    }

    #[test]
    fn test_truncate_unknown_bits() {
        let mask = FlagEffect::from_bits_truncate(0xFFFF_FFFF);
        assert_eq!(mask.bits(), 1023);
    }
}
