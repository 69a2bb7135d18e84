//! Sync status types

use serde::{Deserialize, Serialize};

/// Where the sync orchestrator currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Nothing in flight; last pass (if any) succeeded
    Idle,
    /// A pass is running
    Syncing,
    /// Remote unreachable; mutations keep queueing
    Offline,
    /// Last pass failed after the remote had been reached
    Error,
}

impl SyncPhase {
    /// Short label for logs and listings
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Offline => "offline",
            Self::Error => "error",
        }
    }
}

/// Point-in-time view of sync health, for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Completion time of the last successful pass (Unix ms), if any
    pub last_sync_at: Option<i64>,
    /// Mutations still waiting for replay
    pub pending_mutations: usize,
    /// Mutations parked after repeated failure
    pub dead_letters: usize,
    /// Message from the last failed pass
    pub last_error: Option<String>,
}
