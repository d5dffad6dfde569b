use crate::construction::{BuildLevel, GraphicsSetup};
use crate::id::BlueprintId;
use std::collections::HashMap;

/// A structure kind: its per-level data and lifecycle policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub name: String,
    pub requires_builder: bool,
    pub graphics: GraphicsSetup,
    /// Level 0 first. Upgrading walks this list.
    pub levels: Vec<BuildLevel>,
}

impl Blueprint {
    pub fn new(name: &str, requires_builder: bool, levels: Vec<BuildLevel>) -> Self {
        Self {
            name: name.to_string(),
            requires_builder,
            graphics: GraphicsSetup::default(),
            levels,
        }
    }

    pub fn with_graphics(mut self, graphics: GraphicsSetup) -> Self {
        self.graphics = graphics;
        self
    }

    /// Highest level index.
    pub fn max_level(&self) -> u32 {
        self.levels.len().saturating_sub(1) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlueprintError {
    #[error("duplicate blueprint: {0}")]
    Duplicate(String),
    #[error("blueprint {0} has no levels")]
    NoLevels(String),
    #[error("blueprint {name} requires unknown blueprint {prerequisite:?}")]
    UnknownPrerequisite {
        name: String,
        prerequisite: BlueprintId,
    },
}

/// Builder for constructing an immutable [`BlueprintRegistry`].
#[derive(Debug, Default)]
pub struct BlueprintRegistryBuilder {
    blueprints: Vec<Blueprint>,
    name_to_id: HashMap<String, BlueprintId>,
}

impl BlueprintRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a blueprint. Returns its ID.
    pub fn register(&mut self, blueprint: Blueprint) -> Result<BlueprintId, BlueprintError> {
        if self.name_to_id.contains_key(&blueprint.name) {
            return Err(BlueprintError::Duplicate(blueprint.name));
        }
        if blueprint.levels.is_empty() {
            return Err(BlueprintError::NoLevels(blueprint.name));
        }
        let id = BlueprintId(self.blueprints.len() as u32);
        self.name_to_id.insert(blueprint.name.clone(), id);
        self.blueprints.push(blueprint);
        Ok(id)
    }

    /// Lookup blueprint ID by name.
    pub fn id_of(&self, name: &str) -> Option<BlueprintId> {
        self.name_to_id.get(name).copied()
    }

    /// Finalize. Every prerequisite named by a level must be registered.
    pub fn build(self) -> Result<BlueprintRegistry, BlueprintError> {
        let count = self.blueprints.len();
        for blueprint in &self.blueprints {
            for level in &blueprint.levels {
                if let Some(&missing) = level
                    .build_cost
                    .prerequisites
                    .iter()
                    .find(|p| p.0 as usize >= count)
                {
                    return Err(BlueprintError::UnknownPrerequisite {
                        name: blueprint.name.clone(),
                        prerequisite: missing,
                    });
                }
            }
        }

        Ok(BlueprintRegistry {
            blueprints: self.blueprints,
            name_to_id: self.name_to_id,
        })
    }
}

/// Immutable blueprint registry. Frozen after build().
#[derive(Debug, Default)]
pub struct BlueprintRegistry {
    blueprints: Vec<Blueprint>,
    name_to_id: HashMap<String, BlueprintId>,
}

impl BlueprintRegistry {
    pub fn get(&self, id: BlueprintId) -> Option<&Blueprint> {
        self.blueprints.get(id.0 as usize)
    }

    pub fn id_of(&self, name: &str) -> Option<BlueprintId> {
        self.name_to_id.get(name).copied()
    }

    /// Level `n` of a blueprint, if both exist.
    pub fn level(&self, id: BlueprintId, n: u32) -> Option<&BuildLevel> {
        self.get(id)?.levels.get(n as usize)
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }

    /// Iterate blueprints in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (BlueprintId, &Blueprint)> {
        self.blueprints
            .iter()
            .enumerate()
            .map(|(i, b)| (BlueprintId(i as u32), b))
    }
}
