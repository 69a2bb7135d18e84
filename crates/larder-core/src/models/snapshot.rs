//! Backup snapshot model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Item;

/// A unique identifier for a backup snapshot, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    /// Create a new unique snapshot ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// What caused a snapshot to be taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupTrigger {
    /// Explicit user request
    Manual,
    /// Automatic interval backup
    Scheduled,
    /// Safety snapshot taken just before a restore
    PreRestore,
}

impl BackupTrigger {
    /// Short label for logs and listings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::PreRestore => "pre-restore",
        }
    }
}

/// A full point-in-time copy of the item collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    /// Unique identifier, shared between the local and remote copy
    pub id: SnapshotId,
    /// When the snapshot was taken (Unix ms)
    pub created_at: i64,
    /// What caused it
    pub trigger: BackupTrigger,
    /// The items at snapshot time
    pub items: Vec<Item>,
}

impl BackupSnapshot {
    /// Snapshot the given items now
    #[must_use]
    pub fn new(trigger: BackupTrigger, items: Vec<Item>) -> Self {
        Self {
            id: SnapshotId::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
            trigger,
            items,
        }
    }

    /// The listing form of this snapshot (no item bodies)
    #[must_use]
    pub fn meta(&self) -> BackupMeta {
        BackupMeta {
            id: self.id,
            created_at: self.created_at,
            trigger: self.trigger,
            item_count: self.items.len(),
        }
    }
}

/// Listing form of a snapshot: everything but the items themselves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMeta {
    pub id: SnapshotId,
    pub created_at: i64,
    pub trigger: BackupTrigger,
    pub item_count: usize,
}
