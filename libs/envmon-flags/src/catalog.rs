//! Per-tenant flag catalog
//!
//! Declaration order is evaluation priority.

use crate::error::{FlagError, Result};
use envmon_model::FlagEffect;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub name: String,
    #[serde(default)]
    pub label: String,
    pub effect: FlagEffect,
}

impl FlagDefinition {
    pub fn new(name: impl Into<String>, label: impl Into<String>, effect: FlagEffect) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            effect,
        }
    }

    pub fn is_invariance(&self) -> bool {
        self.effect.contains(FlagEffect::DATA_INVARIANCE)
    }
}

/// Validated, ordered flag definitions of one tenant
#[derive(Debug, Clone, PartialEq)]
pub struct FlagCatalog {
    definitions: Vec<FlagDefinition>,
    by_name: FxHashMap<String, usize>,
    normal: usize,
}

impl FlagCatalog {
    /// Validate and index a catalog.
    ///
    /// Requires unique names, exactly one NORMAL flag and at least one
    /// OVERPROOF flag.
    pub fn new(definitions: Vec<FlagDefinition>) -> Result<Self> {
        let mut by_name = FxHashMap::default();
        for (idx, def) in definitions.iter().enumerate() {
            if by_name.insert(def.name.clone(), idx).is_some() {
                return Err(FlagError::DuplicateFlag(def.name.clone()));
            }
        }

        let normals: Vec<usize> = definitions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.effect.contains(FlagEffect::NORMAL))
            .map(|(idx, _)| idx)
            .collect();
        let normal = match normals.as_slice() {
            [] => return Err(FlagError::CatalogMissingNormal),
            [idx] => *idx,
            _ => {
                return Err(FlagError::CatalogMultipleNormal(
                    normals.iter().map(|i| definitions[*i].name.clone()).collect(),
                ))
            },
        };

        if !definitions
            .iter()
            .any(|d| d.effect.contains(FlagEffect::OVERPROOF))
        {
            return Err(FlagError::CatalogMissingOverproof);
        }

        Ok(Self {
            definitions,
            by_name,
            normal,
        })
    }

    pub fn definitions(&self) -> &[FlagDefinition] {
        &self.definitions
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlagDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FlagDefinition> {
        self.by_name.get(name).map(|idx| &self.definitions[*idx])
    }

    /// The single NORMAL-effect definition, selected when nothing else matches
    pub fn normal(&self) -> &FlagDefinition {
        &self.definitions[self.normal]
    }

    /// Effect mask of `name`; empty for unknown or unset flags
    pub fn effect_of(&self, name: &str) -> FlagEffect {
        self.get(name).map_or(FlagEffect::EMPTY, |d| d.effect)
    }
}
