//! Data-driven settlement content: blueprints, resources, and settlement
//! settings loaded from RON, TOML, or JSON files.

pub mod error;
pub mod format;
pub mod loader;
pub mod schema;

pub use error::DataLoadError;
pub use loader::{
    load_blueprints, load_resources, load_settlement_config, load_settlement_data,
    SettlementData,
};
