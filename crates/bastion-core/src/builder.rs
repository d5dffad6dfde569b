//! Builder units: the scarce workers a timed build may need to reserve.

use crate::id::{BuilderId, StructureId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Errors returned when a builder cannot be assigned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuilderError {
    #[error("no idle builder available (pool of {capacity})")]
    Exhausted { capacity: usize },

    #[error("structure {structure} already holds builder {builder:?}")]
    AlreadyAssigned {
        structure: StructureId,
        builder: BuilderId,
    },
}

/// Limited-resource pool consumed by the construction lifecycle.
pub trait BuilderAllocator {
    /// Reserve one builder for `structure`.
    fn assign(&mut self, structure: StructureId) -> Result<BuilderId, BuilderError>;

    /// Return the builder held by `structure`, if any. Holding nothing is
    /// not an error.
    fn release(&mut self, structure: StructureId) -> Option<BuilderId>;

    /// The builder currently held by `structure`.
    fn assigned(&self, structure: StructureId) -> Option<BuilderId>;
}

/// Fixed roster of builders handed out first-come first-served.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderPool {
    roster: Vec<BuilderId>,
    idle: VecDeque<BuilderId>,
    assignments: BTreeMap<StructureId, BuilderId>,
}

impl BuilderPool {
    /// Create a pool of `count` idle builders.
    pub fn new(count: usize) -> Self {
        let mut pool = Self::default();
        pool.hire(count);
        pool
    }

    /// Add `count` idle builders to the roster.
    pub fn hire(&mut self, count: usize) {
        for _ in 0..count {
            let id = BuilderId(self.roster.len() as u32);
            self.roster.push(id);
            self.idle.push_back(id);
        }
    }

    /// Total builders in the roster.
    pub fn capacity(&self) -> usize {
        self.roster.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn busy_count(&self) -> usize {
        self.assignments.len()
    }

    /// Structures currently holding a builder, in id order.
    pub fn assignments(&self) -> impl Iterator<Item = (StructureId, BuilderId)> + '_ {
        self.assignments.iter().map(|(s, b)| (*s, *b))
    }
}

impl BuilderAllocator for BuilderPool {
    fn assign(&mut self, structure: StructureId) -> Result<BuilderId, BuilderError> {
        if let Some(&builder) = self.assignments.get(&structure) {
            return Err(BuilderError::AlreadyAssigned { structure, builder });
        }
        let builder = self.idle.pop_front().ok_or(BuilderError::Exhausted {
            capacity: self.capacity(),
        })?;
        self.assignments.insert(structure, builder);
        Ok(builder)
    }

    fn release(&mut self, structure: StructureId) -> Option<BuilderId> {
        let builder = self.assignments.remove(&structure)?;
        self.idle.push_back(builder);
        Some(builder)
    }

    fn assigned(&self, structure: StructureId) -> Option<BuilderId> {
        self.assignments.get(&structure).copied()
    }
}
