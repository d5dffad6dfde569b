//! Settlement loading pipeline.
//!
//! Reads `settlement`, `resources`, and `buildings` from a directory,
//! resolves every name reference, and produces a ready [`BlueprintRegistry`].

use crate::error::DataLoadError;
use crate::format::{deserialize_file, deserialize_list, find_data_file, require_data_file};
use crate::schema::{BuildingData, LevelData, ResourceData};
use bastion_core::blueprint::{Blueprint, BlueprintRegistry, BlueprintRegistryBuilder};
use bastion_core::config::SettlementConfig;
use bastion_core::construction::{BuildLevel, BuildRequirement, GraphicsSetup};
use bastion_core::fixed::f64_to_seconds;
use bastion_core::id::{BlueprintId, ResourceId};
use bastion_core::settlement::Settlement;
use std::collections::HashMap;
use std::path::Path;

/// Name table for one kind of entry, in file order.
struct Names<'a, Id> {
    kind: &'static str,
    path: &'a Path,
    ids: HashMap<String, Id>,
}

impl<'a, Id: Copy> Names<'a, Id> {
    fn new(kind: &'static str, path: &'a Path, capacity: usize) -> Self {
        Self {
            kind,
            path,
            ids: HashMap::with_capacity(capacity),
        }
    }

    fn insert(&mut self, name: &str, id: Id) -> Result<(), DataLoadError> {
        if self.ids.insert(name.to_string(), id).is_some() {
            return Err(DataLoadError::DuplicateName {
                path: self.path.to_path_buf(),
                name: name.to_string(),
                kind: self.kind,
            });
        }
        Ok(())
    }
}

/// Look a name up, reporting `kind` and the referencing file on failure.
fn resolve<Id: Copy>(
    ids: &HashMap<String, Id>,
    name: &str,
    kind: &'static str,
    path: &Path,
) -> Result<Id, DataLoadError> {
    ids.get(name)
        .copied()
        .ok_or_else(|| DataLoadError::UnresolvedRef {
            path: path.to_path_buf(),
            name: name.to_string(),
            kind,
        })
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Everything needed to stand up a [`Settlement`].
#[derive(Debug)]
pub struct SettlementData {
    pub config: SettlementConfig,
    pub resources: HashMap<String, ResourceId>,
    pub blueprints: BlueprintRegistry,
}

impl SettlementData {
    pub fn into_settlement(self) -> Settlement {
        Settlement::new(self.config, self.blueprints)
    }
}

/// Load `settlement`, `resources`, and `buildings` from `dir`.
///
/// Only the buildings file is required.
pub fn load_settlement_data(dir: &Path) -> Result<SettlementData, DataLoadError> {
    let config = load_settlement_config(dir)?;
    let resources = load_resources(dir)?;
    let blueprints = load_blueprints(dir, &config, &resources)?;
    tracing::info!(
        dir = %dir.display(),
        blueprints = blueprints.len(),
        resources = resources.len(),
        "settlement data loaded"
    );
    Ok(SettlementData {
        config,
        resources,
        blueprints,
    })
}

/// Load `settlement.{ron,toml,json}`, or defaults if there is none.
pub fn load_settlement_config(dir: &Path) -> Result<SettlementConfig, DataLoadError> {
    match find_data_file(dir, "settlement")? {
        Some(path) => deserialize_file(&path),
        None => {
            tracing::debug!(dir = %dir.display(), "no settlement file, using defaults");
            Ok(SettlementConfig::default())
        }
    }
}

/// Load resource names. Ids follow file order; a missing file yields none.
pub fn load_resources(dir: &Path) -> Result<HashMap<String, ResourceId>, DataLoadError> {
    let Some(path) = find_data_file(dir, "resources")? else {
        return Ok(HashMap::new());
    };
    let data: Vec<ResourceData> = deserialize_list(&path, "resources")?;

    let mut names = Names::new("resource", &path, data.len());
    for (i, resource) in data.iter().enumerate() {
        names.insert(&resource.name, ResourceId(i as u32))?;
    }
    Ok(names.ids)
}

/// Load `buildings.{ron,toml,json}` into a blueprint registry.
///
/// Building ids follow file order, so prerequisites may name buildings
/// declared later in the file.
pub fn load_blueprints(
    dir: &Path,
    config: &SettlementConfig,
    resources: &HashMap<String, ResourceId>,
) -> Result<BlueprintRegistry, DataLoadError> {
    let path = require_data_file(dir, "buildings")?;
    let buildings: Vec<BuildingData> = deserialize_list(&path, "buildings")?;

    let mut names = Names::new("building", &path, buildings.len());
    for (i, building) in buildings.iter().enumerate() {
        names.insert(&building.name, BlueprintId(i as u32))?;
    }

    let invalid = |source| DataLoadError::Blueprint {
        path: path.clone(),
        source,
    };
    let mut registry = BlueprintRegistryBuilder::new();
    for building in &buildings {
        let levels = building
            .levels
            .iter()
            .map(|level| resolve_level(level, &building.name, resources, &names.ids, &path))
            .collect::<Result<Vec<_>, _>>()?;
        let requires_builder = building
            .requires_builder
            .unwrap_or(config.default_requires_builder);
        let blueprint = Blueprint::new(&building.name, requires_builder, levels).with_graphics(
            GraphicsSetup {
                construction_graphic: building.construction_graphic,
                upgrade_graphic: building.upgrade_graphic,
            },
        );
        registry.register(blueprint).map_err(invalid)?;
    }
    registry.build().map_err(invalid)
}

fn resolve_level(
    level: &LevelData,
    building: &str,
    resources: &HashMap<String, ResourceId>,
    buildings: &HashMap<String, BlueprintId>,
    path: &Path,
) -> Result<BuildLevel, DataLoadError> {
    if !level.build_time.is_finite() {
        tracing::warn!(
            building,
            build_time = level.build_time,
            "non-finite build time, building instantly"
        );
    }

    let mut cost = Vec::with_capacity(level.cost.len());
    for entry in &level.cost {
        let id = resolve(resources, entry.resource(), "resource", path)?;
        cost.push((id, entry.amount()));
    }
    let prerequisites = level
        .prerequisites
        .iter()
        .map(|name| resolve(buildings, name, "building", path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BuildLevel {
        max_hit_points: level.max_hit_points,
        build_cost: BuildRequirement {
            resources: cost,
            prerequisites,
            build_time: f64_to_seconds(level.build_time),
        },
    })
}

// ===========================================================================
// Tests
// ===========================================================================
