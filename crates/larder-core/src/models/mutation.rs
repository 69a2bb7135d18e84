//! Queued mutation model

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Item, ItemId};

/// The kind of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

/// One durable entry in the offline mutation queue.
///
/// `item` holds the full snapshot the mutation should write for `Add` and
/// `Update`, and is `None` for `Delete`. Replay order is by `seq`, strictly
/// ascending, across the queue as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Queue-assigned sequence number, strictly increasing
    pub seq: u64,
    /// What to replay
    pub kind: MutationKind,
    /// Item the mutation applies to
    pub item_id: ItemId,
    /// Snapshot to write (`Add`/`Update` only)
    pub item: Option<Item>,
    /// When the mutation was queued (Unix ms)
    pub queued_at: i64,
    /// Failed replay attempts so far
    #[serde(default)]
    pub attempts: u32,
    /// Earliest time the next replay may run (Unix ms, 0 = immediately)
    #[serde(default)]
    pub next_attempt_at: i64,
    /// Message from the most recent failed attempt
    #[serde(default)]
    pub last_error: Option<String>,
}

impl MutationRecord {
    /// Create a fresh record, immediately eligible for replay
    #[must_use]
    pub fn new(seq: u64, kind: MutationKind, item_id: ItemId, item: Option<Item>, now: i64) -> Self {
        Self {
            seq,
            kind,
            item_id,
            item,
            queued_at: now,
            attempts: 0,
            next_attempt_at: 0,
            last_error: None,
        }
    }

    /// Whether the record's backoff window has elapsed
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at <= now
    }
}
