//! Persistence
//!
//! Snapshots of a competition between rounds and the stores that keep them.

pub mod snapshot;
pub mod store;

pub use snapshot::{CompetitionSnapshot, LaneRecord, RosterRecord, RoundRecord, SpectatorRecord, SNAPSHOT_VERSION};
pub use store::{FileStore, MemoryStore, SnapshotStore, StoreError};
