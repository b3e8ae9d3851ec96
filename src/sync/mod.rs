//! Snapshot propagation between the authoring side and page contexts.
pub mod authority;
pub mod page;

pub use authority::{
    AuthoringClient, AuthoringService, AuthorityError, Command, CommandResponse, PublishReport,
};
pub use page::{DebugHandle, PageContext, ReloadOutcome, SlotSubscriber};
