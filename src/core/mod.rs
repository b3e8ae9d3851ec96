pub mod editor;
pub mod matcher;
pub mod resolver;
pub mod snapshot;
pub mod synthesizer;

pub use editor::{DraftError, RuleDraft, apply_draft, delete_rule, toggle_rule};
pub use matcher::{CompiledPattern, PrefillSource, matches, path_and_query, suggest_pattern};
pub use resolver::{CompiledTable, ResolvedRule, resolve};
pub use snapshot::{RuleState, SnapshotStore};
pub use synthesizer::{MOCK_MARKER_HEADER, SyntheticResponse, synthesize};
