//! Backup snapshots: local files first, remote copies best-effort.
//!
//! Every snapshot is written under `backups/` before any upload is
//! attempted, so backups keep working with no connectivity. Both sides are
//! pruned to a bounded number of snapshots, newest kept.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::models::{BackupMeta, BackupSnapshot, BackupTrigger, SnapshotId};
use crate::remote::{RemoteBackups, RemoteError};
use crate::store::LocalStore;

/// Snapshots kept per side before the oldest are pruned
pub const DEFAULT_RETAINED_SNAPSHOTS: usize = 5;

/// Cadence for scheduled backups
pub const DEFAULT_BACKUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Tunables for the backup service
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// How many snapshots to keep on each side
    pub retain: usize,
    /// Minimum gap between scheduled backups
    pub every: Duration,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            retain: DEFAULT_RETAINED_SNAPSHOTS,
            every: DEFAULT_BACKUP_INTERVAL,
        }
    }
}

/// One row of a backup listing, with where the snapshot lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub meta: BackupMeta,
    pub local: bool,
    pub remote: bool,
}

/// What a completed restore did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreReport {
    /// Items now in the collection
    pub item_count: usize,
    /// The snapshot of the pre-restore state, in case the restore was a
    /// mistake
    pub safety_snapshot: SnapshotId,
}

/// Takes, lists, restores, and prunes backup snapshots
pub struct BackupService {
    store: Arc<LocalStore>,
    remote: Option<Arc<dyn RemoteBackups>>,
    options: BackupOptions,
}

impl BackupService {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, options: BackupOptions) -> Self {
        Self {
            store,
            remote: None,
            options,
        }
    }

    /// Also keep copies on the remote backup store
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteBackups>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Snapshot the current collection.
    ///
    /// The local copy is the source of truth; a failed upload degrades to
    /// local-only with a warning instead of failing the backup.
    pub async fn create(&self, trigger: BackupTrigger) -> Result<BackupMeta> {
        let items = self.store.load_items();
        let snapshot = BackupSnapshot::new(trigger, items);
        self.store.save_snapshot(&snapshot)?;
        tracing::info!(
            "Backup {} created ({}, {} item(s))",
            snapshot.id,
            trigger.as_str(),
            snapshot.items.len()
        );

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.upload(&snapshot).await {
                tracing::warn!(
                    "Backup {} not uploaded, keeping local copy only: {}",
                    snapshot.id,
                    e
                );
            }
        }

        self.trim_local();
        self.trim_remote().await;

        // Pre-restore safety snapshots don't count as a backup round;
        // the scheduled cadence keys off user-visible backups
        if trigger != BackupTrigger::PreRestore {
            self.store.mark_backed_up(snapshot.created_at)?;
        }
        Ok(snapshot.meta())
    }

    /// Take a scheduled backup if the interval has elapsed; returns whether
    /// one was taken
    pub async fn auto_backup_if_due(&self, now: i64) -> Result<bool> {
        let meta = self.store.load_sync_meta();
        let due = match meta.last_backup_at {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.interval_ms(),
        };
        if !due {
            return Ok(false);
        }
        self.create(BackupTrigger::Scheduled).await?;
        Ok(true)
    }

    /// All known snapshots, local and remote merged by id, newest first.
    ///
    /// An unreachable remote degrades to the local listing.
    pub async fn list(&self) -> Vec<BackupEntry> {
        let mut entries: Vec<BackupEntry> = self
            .store
            .list_snapshots()
            .into_iter()
            .map(|meta| BackupEntry {
                meta,
                local: true,
                remote: false,
            })
            .collect();

        if let Some(remote) = &self.remote {
            match remote.list().await {
                Ok(metas) => {
                    for meta in metas {
                        if let Some(entry) = entries.iter_mut().find(|e| e.meta.id == meta.id) {
                            entry.remote = true;
                        } else {
                            entries.push(BackupEntry {
                                meta,
                                local: false,
                                remote: true,
                            });
                        }
                    }
                }
                Err(e) => tracing::warn!("Remote backup listing unavailable: {}", e),
            }
        }

        entries.sort_by(|a, b| b.meta.created_at.cmp(&a.meta.created_at));
        entries
    }

    /// Replace the item collection with a snapshot's contents.
    ///
    /// The snapshot is read locally when present, fetched from the remote
    /// otherwise. A pre-restore snapshot of the current state is taken
    /// before anything is replaced. Queue, conflicts, and sync bookkeeping
    /// are left untouched.
    pub async fn restore(&self, id: SnapshotId) -> Result<RestoreReport> {
        let snapshot = match self.store.load_snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(Error::NotFound(_)) => self.fetch_remote(id).await?,
            Err(e) => return Err(e),
        };

        let safety = self.create(BackupTrigger::PreRestore).await?;
        self.store.save_items(&snapshot.items)?;
        tracing::info!("Restored {} item(s) from backup {}", snapshot.items.len(), id);
        Ok(RestoreReport {
            item_count: snapshot.items.len(),
            safety_snapshot: safety.id,
        })
    }

    /// Delete a snapshot from both sides; returns whether any copy existed.
    ///
    /// A remote copy that can't be deleted right now is logged and left
    /// behind rather than failing the local delete.
    pub async fn delete(&self, id: SnapshotId) -> Result<bool> {
        let mut removed = self.store.delete_snapshot(id)?;
        if let Some(remote) = &self.remote {
            match remote.delete(id).await {
                Ok(()) => removed = true,
                Err(RemoteError::NotFound) => {}
                Err(e) => tracing::warn!("Remote copy of backup {} not deleted: {}", id, e),
            }
        }
        Ok(removed)
    }

    fn trim_local(&self) {
        let stale: Vec<SnapshotId> = self
            .store
            .list_snapshots()
            .into_iter()
            .skip(self.options.retain)
            .map(|meta| meta.id)
            .collect();
        for id in stale {
            match self.store.delete_snapshot(id) {
                Ok(_) => tracing::debug!("Pruned local backup {}", id),
                Err(e) => tracing::warn!("Failed to prune local backup {}: {}", id, e),
            }
        }
    }

    async fn trim_remote(&self) {
        let Some(remote) = &self.remote else {
            return;
        };
        let metas = match remote.list().await {
            Ok(metas) => metas,
            Err(e) => {
                tracing::warn!("Skipping remote backup pruning: {}", e);
                return;
            }
        };
        for meta in metas.into_iter().skip(self.options.retain) {
            match remote.delete(meta.id).await {
                Ok(()) | Err(RemoteError::NotFound) => {
                    tracing::debug!("Pruned remote backup {}", meta.id);
                }
                Err(e) => tracing::warn!("Failed to prune remote backup {}: {}", meta.id, e),
            }
        }
    }

    async fn fetch_remote(&self, id: SnapshotId) -> Result<BackupSnapshot> {
        let Some(remote) = &self.remote else {
            return Err(Error::NotFound(format!("backup {id}")));
        };
        Ok(remote.fetch(id).await?)
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.options.every.as_millis()).unwrap_or(i64::MAX)
    }
}
