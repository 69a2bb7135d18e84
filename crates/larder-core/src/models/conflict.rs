//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::ItemId;

/// Which side a recorded conflict was resolved toward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Remote copy kept (server-wins, or remote was newer)
    KeptRemote,
    /// Local copy kept (client-wins, or local was newer)
    KeptLocal,
    /// Field-by-field merge of both copies
    Merged,
}

impl ConflictResolution {
    /// Short label for logs and listings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeptRemote => "kept-remote",
            Self::KeptLocal => "kept-local",
            Self::Merged => "merged",
        }
    }
}

/// Recorded sync conflict resolved by last-writer-wins.
///
/// Recorded only when the two timestamps differ by more than the
/// reconciler's clock-skew tolerance; resolution itself is unaffected by
/// the window. Kept for observability, capped and newest-first in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Item involved in the conflict
    pub item_id: ItemId,
    /// Item name at resolution time, for readable listings
    pub item_name: String,
    /// Local copy's timestamp when the conflict was detected
    pub local_updated_at: i64,
    /// Remote copy's timestamp when the conflict was detected
    pub remote_updated_at: i64,
    /// Which side won
    pub resolution: ConflictResolution,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}
