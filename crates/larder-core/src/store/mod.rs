//! Local persistence: a directory of JSON documents.
//!
//! Each concern gets one document (`items.json`, `queue.json`, ...), written
//! atomically by writing a sibling temp file and renaming it into place.
//! Reads never fail: a missing document is an empty collection, and a corrupt
//! one is logged and treated as empty so a damaged file can't take the whole
//! app down. The queued mutations still carry the user's intent in that case.
//!
//! Single-process use only; a `Mutex` serializes file access between threads
//! of the same process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{BackupMeta, BackupSnapshot, ConflictRecord, Item, MutationRecord, SnapshotId};

const ITEMS_FILE: &str = "items.json";
const QUEUE_FILE: &str = "queue.json";
const DEAD_LETTER_FILE: &str = "dead_letter.json";
const CONFLICTS_FILE: &str = "conflicts.json";
const SYNC_META_FILE: &str = "sync_meta.json";
const BACKUPS_DIR: &str = "backups";

/// Most recent conflicts kept for the conflicts listing; older ones are dropped
const MAX_CONFLICT_RECORDS: usize = 100;

/// Persisted sync bookkeeping, separate from the item collection so a
/// failed item write can never masquerade as a completed sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    /// Completion time of the last successful sync pass (Unix ms)
    pub last_sync_at: Option<i64>,
    /// When the last backup snapshot was taken (Unix ms)
    pub last_backup_at: Option<i64>,
    /// Message from the last failed pass, cleared on success
    pub last_error: Option<String>,
}

/// The shape of `queue.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDocument {
    /// Next sequence number to hand out
    pub next_seq: u64,
    /// Pending mutations in replay order
    pub entries: Vec<MutationRecord>,
}

impl Default for QueueDocument {
    fn default() -> Self {
        Self {
            next_seq: 1,
            entries: Vec::new(),
        }
    }
}

/// Directory-backed local store for items, sync bookkeeping, and backups
pub struct LocalStore {
    root: PathBuf,
    io: Mutex<()>,
}

impl LocalStore {
    /// Open (creating if needed) a store rooted at the given directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(BACKUPS_DIR))?;
        Ok(Self {
            root,
            io: Mutex::new(()),
        })
    }

    /// The store's root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the item collection; missing or corrupt files read as empty
    #[must_use]
    pub fn load_items(&self) -> Vec<Item> {
        let _guard = self.lock();
        read_json_or_default(&self.root.join(ITEMS_FILE))
    }

    /// Replace the item collection.
    ///
    /// Never touches sync bookkeeping; use [`Self::mark_synced`] for that.
    pub fn save_items(&self, items: &[Item]) -> Result<()> {
        let _guard = self.lock();
        write_json_atomic(&self.root.join(ITEMS_FILE), &items)
    }

    /// Load the pending mutation queue document
    #[must_use]
    pub fn load_queue(&self) -> QueueDocument {
        let _guard = self.lock();
        read_json_or_default(&self.root.join(QUEUE_FILE))
    }

    /// Persist the pending mutation queue document
    pub fn save_queue(&self, doc: &QueueDocument) -> Result<()> {
        let _guard = self.lock();
        write_json_atomic(&self.root.join(QUEUE_FILE), doc)
    }

    /// Load mutations parked after repeated failure
    #[must_use]
    pub fn load_dead_letters(&self) -> Vec<MutationRecord> {
        let _guard = self.lock();
        read_json_or_default(&self.root.join(DEAD_LETTER_FILE))
    }

    /// Persist the dead letter list
    pub fn save_dead_letters(&self, entries: &[MutationRecord]) -> Result<()> {
        let _guard = self.lock();
        write_json_atomic(&self.root.join(DEAD_LETTER_FILE), &entries)
    }

    /// Load recorded conflicts, newest first
    #[must_use]
    pub fn load_conflicts(&self) -> Vec<ConflictRecord> {
        let _guard = self.lock();
        read_json_or_default(&self.root.join(CONFLICTS_FILE))
    }

    /// Prepend fresh conflicts and trim the log to its cap
    pub fn append_conflicts(&self, fresh: &[ConflictRecord]) -> Result<()> {
        if fresh.is_empty() {
            return Ok(());
        }
        let _guard = self.lock();
        let path = self.root.join(CONFLICTS_FILE);
        let mut log: Vec<ConflictRecord> = read_json_or_default(&path);
        log.splice(0..0, fresh.iter().cloned());
        log.truncate(MAX_CONFLICT_RECORDS);
        write_json_atomic(&path, &log)
    }

    /// Load sync bookkeeping
    #[must_use]
    pub fn load_sync_meta(&self) -> SyncMeta {
        let _guard = self.lock();
        read_json_or_default(&self.root.join(SYNC_META_FILE))
    }

    /// Record a completed sync pass and clear any previous error
    pub fn mark_synced(&self, now: i64) -> Result<()> {
        let _guard = self.lock();
        let path = self.root.join(SYNC_META_FILE);
        let mut meta: SyncMeta = read_json_or_default(&path);
        meta.last_sync_at = Some(now);
        meta.last_error = None;
        write_json_atomic(&path, &meta)
    }

    /// Record a failed sync pass
    pub fn record_sync_error(&self, message: &str) -> Result<()> {
        let _guard = self.lock();
        let path = self.root.join(SYNC_META_FILE);
        let mut meta: SyncMeta = read_json_or_default(&path);
        meta.last_error = Some(message.to_string());
        write_json_atomic(&path, &meta)
    }

    /// Record a completed backup
    pub fn mark_backed_up(&self, now: i64) -> Result<()> {
        let _guard = self.lock();
        let path = self.root.join(SYNC_META_FILE);
        let mut meta: SyncMeta = read_json_or_default(&path);
        meta.last_backup_at = Some(now);
        write_json_atomic(&path, &meta)
    }

    /// Persist one backup snapshot under `backups/<id>.json`
    pub fn save_snapshot(&self, snapshot: &BackupSnapshot) -> Result<()> {
        let _guard = self.lock();
        write_json_atomic(&self.snapshot_path(snapshot.id), snapshot)
    }

    /// Load one backup snapshot
    pub fn load_snapshot(&self, id: SnapshotId) -> Result<BackupSnapshot> {
        let _guard = self.lock();
        let path = self.snapshot_path(id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::NotFound(format!("backup {id}"))
            } else {
                Error::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// List local snapshot metadata, newest first
    #[must_use]
    pub fn list_snapshots(&self) -> Vec<BackupMeta> {
        let _guard = self.lock();
        let dir = self.root.join(BACKUPS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to read backup directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };
        let mut metas: Vec<BackupMeta> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|entry| {
                let path = entry.path();
                match fs::read(&path).map_err(Error::Io).and_then(|bytes| {
                    serde_json::from_slice::<BackupSnapshot>(&bytes).map_err(Error::Serialization)
                }) {
                    Ok(snapshot) => Some(snapshot.meta()),
                    Err(e) => {
                        tracing::warn!("Skipping unreadable backup {}: {}", path.display(), e);
                        None
                    }
                }
            })
            .collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        metas
    }

    /// Delete one local snapshot; returns whether it existed
    pub fn delete_snapshot(&self, id: SnapshotId) -> Result<bool> {
        let _guard = self.lock();
        match fs::remove_file(self.snapshot_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn snapshot_path(&self, id: SnapshotId) -> PathBuf {
        self.root.join(BACKUPS_DIR).join(format!("{id}.json"))
    }
}

/// Read a JSON document, degrading to the default value on any failure
fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(e) => {
            tracing::warn!(
                "Failed to read store document {}, treating as empty: {}",
                path.display(),
                e
            );
            return T::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Corrupt store document {}, treating as empty: {}",
                path.display(),
                e
            );
            T::default()
        }
    }
}

/// Write a JSON document via temp file + rename so readers never observe
/// a half-written document
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
