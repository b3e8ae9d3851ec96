pub mod rule_store;
pub mod snapshot_slot;
pub mod subscriber;
pub mod transport;

pub use rule_store::{RuleStore, StoreError, StoreResult};
pub use snapshot_slot::{SlotError, SlotResult, SnapshotSlot, StorageChange};
pub use subscriber::{DeliveryError, PageSubscriber};
pub use transport::{OutboundRequest, Transport, TransportError, TransportResponse, TransportResult};
