pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{SnapshotError, load_app_config, parse_snapshot, snapshot_to_string};
pub use models::*;
pub use validation::{
    AppConfigValidator, ShadowedRule, SnapshotValidator, ValidationError, ValidationResult,
};
