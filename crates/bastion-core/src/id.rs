use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Identifies one keyed subscription in the timer registry.
    pub struct SubscriptionId;
}

/// Identifies a structure placed in a settlement. Unique per entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StructureId(pub u64);

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a structure kind in the blueprint registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlueprintId(pub u32);

/// Identifies one builder unit in the builder pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuilderId(pub u32);

/// Identifies a resource type referenced by build costs. Opaque to the
/// construction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

/// What a timer is counting down for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerPurpose {
    /// The construction (or upgrade) of a structure.
    Build,
    /// Host-defined timer channel. Opaque to the engine.
    Custom(u32),
}

/// Key of a timer in the registry: the owning structure plus the purpose.
///
/// Two structures can never share a key, so one entity cannot cancel or
/// query another's timer by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerKey {
    pub owner: StructureId,
    pub purpose: TimerPurpose,
}

impl TimerKey {
    /// The build key of a structure.
    pub fn build(owner: StructureId) -> Self {
        Self {
            owner,
            purpose: TimerPurpose::Build,
        }
    }

    /// A host-defined key for a structure.
    pub fn custom(owner: StructureId, channel: u32) -> Self {
        Self {
            owner,
            purpose: TimerPurpose::Custom(channel),
        }
    }

    /// Render the key for display using the owner's textual uid, e.g.
    /// `"castle1_build"`. Never used for lookups.
    pub fn label(&self, uid: &str) -> String {
        match self.purpose {
            TimerPurpose::Build => format!("{uid}_build"),
            TimerPurpose::Custom(channel) => format!("{uid}_custom{channel}"),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.purpose {
            TimerPurpose::Build => write!(f, "{}_build", self.owner),
            TimerPurpose::Custom(channel) => write!(f, "{}_custom{channel}", self.owner),
        }
    }
}
