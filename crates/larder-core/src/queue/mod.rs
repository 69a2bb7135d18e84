//! Durable offline mutation queue.
//!
//! Mutations are replayed strictly in enqueue order across the queue as a
//! whole; nothing is coalesced or deduplicated, and the drain never skips
//! past an entry that is still retryable. Entries that keep failing are
//! parked in a dead letter file instead of blocking the queue forever.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::models::{Item, ItemId, MutationKind, MutationRecord};
use crate::store::{LocalStore, QueueDocument};

/// Failed replays per entry before it is parked in the dead letter file
pub const MAX_ATTEMPTS: u32 = 8;

/// Ceiling for the exponential backoff delay
const MAX_BACKOFF_SECS: i64 = 300;

/// What a transient failure did with the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Entry stays queued; replay no earlier than the contained time (Unix ms)
    Backoff { next_attempt_at: i64 },
    /// Attempt limit reached; entry moved to the dead letter file
    DeadLettered,
}

struct QueueState {
    doc: QueueDocument,
    dead: Vec<MutationRecord>,
}

/// FIFO queue of local mutations awaiting replay against the remote store.
///
/// State is loaded once from the store and kept in memory; every change is
/// written back before the call returns, so the queue survives process
/// restarts. All operations are synchronous read-modify-write under one lock.
pub struct MutationQueue {
    store: std::sync::Arc<LocalStore>,
    state: Mutex<QueueState>,
}

impl MutationQueue {
    /// Load the queue from the store
    #[must_use]
    pub fn load(store: std::sync::Arc<LocalStore>) -> Self {
        let doc = store.load_queue();
        let dead = store.load_dead_letters();
        Self {
            store,
            state: Mutex::new(QueueState { doc, dead }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a mutation and persist; returns the assigned sequence number.
    ///
    /// `Add` and `Update` must carry the full item snapshot to write;
    /// `Delete` must not.
    pub fn enqueue(
        &self,
        kind: MutationKind,
        item_id: ItemId,
        item: Option<Item>,
    ) -> Result<u64> {
        match (kind, item.is_some()) {
            (MutationKind::Add | MutationKind::Update, false) => {
                return Err(Error::InvalidInput(format!(
                    "{kind} mutation requires an item snapshot"
                )));
            }
            (MutationKind::Delete, true) => {
                return Err(Error::InvalidInput(
                    "delete mutation must not carry an item snapshot".to_string(),
                ));
            }
            _ => {}
        }
        let now = crate::util::unix_timestamp_ms();
        let mut state = self.lock();
        let seq = state.doc.next_seq;
        state.doc.next_seq += 1;
        state
            .doc
            .entries
            .push(MutationRecord::new(seq, kind, item_id, item, now));
        self.store.save_queue(&state.doc)?;
        tracing::debug!("Queued {} mutation #{}", kind, seq);
        Ok(seq)
    }

    /// The head entry, but only once its backoff window has elapsed.
    ///
    /// An un-due head blocks the whole queue: later entries may depend on
    /// earlier ones, so the drain must wait rather than skip ahead.
    #[must_use]
    pub fn peek_ready(&self, now: i64) -> Option<MutationRecord> {
        let state = self.lock();
        state.doc.entries.first().filter(|e| e.is_due(now)).cloned()
    }

    /// Remove a successfully replayed entry
    pub fn complete(&self, seq: u64) -> Result<()> {
        let mut state = self.lock();
        let before = state.doc.entries.len();
        state.doc.entries.retain(|e| e.seq != seq);
        if state.doc.entries.len() == before {
            return Ok(());
        }
        self.store.save_queue(&state.doc)
    }

    /// Record a transient failure: bump the attempt count and either back
    /// the entry off or, past the attempt limit, dead letter it
    pub fn fail_transient(&self, seq: u64, message: &str, now: i64) -> Result<RetryDisposition> {
        let mut state = self.lock();
        let Some(pos) = state.doc.entries.iter().position(|e| e.seq == seq) else {
            return Err(Error::NotFound(format!("queue entry #{seq}")));
        };
        let attempts = state.doc.entries[pos].attempts + 1;
        state.doc.entries[pos].attempts = attempts;
        state.doc.entries[pos].last_error = Some(message.to_string());
        if attempts >= MAX_ATTEMPTS {
            let entry = state.doc.entries.remove(pos);
            tracing::warn!(
                "Dead lettering {} mutation #{} after {} attempts: {}",
                entry.kind,
                entry.seq,
                attempts,
                message
            );
            state.dead.push(entry);
            self.store.save_queue(&state.doc)?;
            self.store.save_dead_letters(&state.dead)?;
            return Ok(RetryDisposition::DeadLettered);
        }
        let delay_secs = 2_i64.saturating_pow(attempts).min(MAX_BACKOFF_SECS);
        let next_attempt_at = now + delay_secs * 1000;
        state.doc.entries[pos].next_attempt_at = next_attempt_at;
        self.store.save_queue(&state.doc)?;
        Ok(RetryDisposition::Backoff { next_attempt_at })
    }

    /// Park an entry the remote rejected outright; the drain moves on
    pub fn fail_permanent(&self, seq: u64, message: &str) -> Result<()> {
        let mut state = self.lock();
        let Some(pos) = state.doc.entries.iter().position(|e| e.seq == seq) else {
            return Err(Error::NotFound(format!("queue entry #{seq}")));
        };
        let mut entry = state.doc.entries.remove(pos);
        entry.attempts += 1;
        entry.last_error = Some(message.to_string());
        tracing::warn!(
            "Dead lettering {} mutation #{}, rejected by remote: {}",
            entry.kind,
            entry.seq,
            message
        );
        state.dead.push(entry);
        self.store.save_queue(&state.doc)?;
        self.store.save_dead_letters(&state.dead)
    }

    /// Ids with a queued or dead-lettered `Add`.
    ///
    /// Dead-lettered adds still count: the item never reached the remote,
    /// so its absence there must not read as a deletion elsewhere.
    #[must_use]
    pub fn pending_add_ids(&self) -> HashSet<ItemId> {
        let state = self.lock();
        state
            .doc
            .entries
            .iter()
            .chain(state.dead.iter())
            .filter(|e| e.kind == MutationKind::Add)
            .map(|e| e.item_id.clone())
            .collect()
    }

    /// Ids with any live (non-dead-lettered) queued mutation
    #[must_use]
    pub fn queued_item_ids(&self) -> HashSet<ItemId> {
        let state = self.lock();
        state
            .doc
            .entries
            .iter()
            .map(|e| e.item_id.clone())
            .collect()
    }

    /// Rewrite an item id across queued and dead-lettered entries, used
    /// after the remote assigns its own key on create.
    ///
    /// Returns how many entries changed.
    pub fn remap_item_id(&self, old: &ItemId, new: &ItemId) -> Result<usize> {
        let mut state = self.lock();
        let mut live_changed = 0;
        for entry in &mut state.doc.entries {
            if entry.item_id == *old {
                entry.item_id = new.clone();
                if let Some(item) = entry.item.as_mut() {
                    item.id = new.clone();
                }
                live_changed += 1;
            }
        }
        let mut dead_changed = 0;
        for entry in &mut state.dead {
            if entry.item_id == *old {
                entry.item_id = new.clone();
                if let Some(item) = entry.item.as_mut() {
                    item.id = new.clone();
                }
                dead_changed += 1;
            }
        }
        if live_changed > 0 {
            self.store.save_queue(&state.doc)?;
        }
        if dead_changed > 0 {
            self.store.save_dead_letters(&state.dead)?;
        }
        Ok(live_changed + dead_changed)
    }

    /// Pending entries in replay order
    #[must_use]
    pub fn entries(&self) -> Vec<MutationRecord> {
        self.lock().doc.entries.clone()
    }

    /// Dead-lettered entries, oldest first
    #[must_use]
    pub fn dead_letters(&self) -> Vec<MutationRecord> {
        self.lock().dead.clone()
    }

    /// Pending entry count
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().doc.entries.len()
    }

    /// Whether no mutations are pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dead letter count
    #[must_use]
    pub fn dead_letter_len(&self) -> usize {
        self.lock().dead.len()
    }

    /// Move all dead letters back into the queue with fresh sequence
    /// numbers and reset attempt state; returns how many moved
    pub fn requeue_dead_letters(&self) -> Result<usize> {
        let mut state = self.lock();
        if state.dead.is_empty() {
            return Ok(0);
        }
        let moved = state.dead.len();
        let dead = std::mem::take(&mut state.dead);
        for mut entry in dead {
            entry.seq = state.doc.next_seq;
            state.doc.next_seq += 1;
            entry.attempts = 0;
            entry.next_attempt_at = 0;
            entry.last_error = None;
            state.doc.entries.push(entry);
        }
        self.store.save_queue(&state.doc)?;
        self.store.save_dead_letters(&state.dead)?;
        tracing::info!("Requeued {} dead lettered mutation(s)", moved);
        Ok(moved)
    }

    /// Drop all dead letters; returns how many were dropped
    pub fn clear_dead_letters(&self) -> Result<usize> {
        let mut state = self.lock();
        let dropped = state.dead.len();
        state.dead.clear();
        self.store.save_dead_letters(&state.dead)?;
        Ok(dropped)
    }
}
