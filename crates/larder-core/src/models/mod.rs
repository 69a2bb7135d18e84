//! Data models for Larder

mod conflict;
mod item;
mod mutation;
mod snapshot;
mod status;

pub use conflict::{ConflictRecord, ConflictResolution};
pub(crate) use item::default_quantity;
pub use item::{Item, ItemDraft, ItemId, ParseItemIdError};
pub use mutation::{MutationKind, MutationRecord};
pub use snapshot::{BackupMeta, BackupSnapshot, BackupTrigger, SnapshotId};
pub use status::{SyncPhase, SyncStatus};
