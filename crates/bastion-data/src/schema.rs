//! Serde data file structs for settlement content.
//!
//! These structs define the on-disk format for resources and buildings. They
//! are deserialized from RON, JSON, or TOML data files and then resolved into
//! core types by the loader. TOML files hold each list under a
//! `[[resources]]` or `[[buildings]]` key.

use serde::Deserialize;

// ===========================================================================
// Resources
// ===========================================================================

/// A resource type referenced by build costs.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub name: String,
}

// ===========================================================================
// Buildings
// ===========================================================================

/// A cost entry, in short tuple form or with explicit fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CostData {
    /// Short form: `("stone", 40)`.
    Short(String, u32),
    Full { resource: String, amount: u32 },
}

impl CostData {
    pub fn resource(&self) -> &str {
        match self {
            CostData::Short(name, _) => name,
            CostData::Full { resource, .. } => resource,
        }
    }

    pub fn amount(&self) -> u32 {
        match self {
            CostData::Short(_, amount) => *amount,
            CostData::Full { amount, .. } => *amount,
        }
    }
}

/// One level of a building.
#[derive(Debug, Clone, Deserialize)]
pub struct LevelData {
    pub max_hit_points: u32,
    /// Seconds. Zero or omitted means instant.
    #[serde(default)]
    pub build_time: f64,
    #[serde(default)]
    pub cost: Vec<CostData>,
    /// Names of buildings that must exist first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

/// A building definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildingData {
    pub name: String,
    /// Falls back to the settlement's `default_requires_builder`.
    #[serde(default)]
    pub requires_builder: Option<bool>,
    #[serde(default)]
    pub construction_graphic: bool,
    #[serde(default)]
    pub upgrade_graphic: bool,
    pub levels: Vec<LevelData>,
}

// ===========================================================================
// Tests
// ===========================================================================
