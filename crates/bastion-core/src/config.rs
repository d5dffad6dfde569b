use serde::{Deserialize, Serialize};

/// Settlement-wide settings. Every field has a default, so partial config
/// files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Builders available at startup.
    pub builder_count: usize,
    /// Ring buffer capacity per notification kind.
    pub event_buffer_capacity: usize,
    /// Offset of build-timer panels above a structure.
    pub ui_timer_offset: [f32; 3],
    /// Used by loaders when a building entry omits `requires_builder`.
    pub default_requires_builder: bool,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            builder_count: 1,
            event_buffer_capacity: 256,
            ui_timer_offset: [0.0, 2.0, 0.0],
            default_requires_builder: true,
        }
    }
}
