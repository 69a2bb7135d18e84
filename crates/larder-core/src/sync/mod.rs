//! Sync orchestration: one serialized pass over drain, fetch, merge, push.
//!
//! A pass runs probe -> drain queue -> fetch -> reconcile -> persist ->
//! push-back. Triggers arriving while a pass is in flight are dropped, not
//! queued; the next periodic tick catches up. Failures never surface as
//! panics or lost mutations: the pass degrades to an `Offline`/`Error`
//! phase and the queue keeps whatever it could not replay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::backup::BackupService;
use crate::error::Result;
use crate::models::{Item, ItemId, MutationKind, MutationRecord, SyncPhase, SyncStatus};
use crate::queue::{MutationQueue, RetryDisposition};
use crate::reconcile::Reconciler;
use crate::remote::{ItemPayload, RemoteError, RemoteItems};
use crate::store::LocalStore;
use crate::util::unix_timestamp_ms;

/// Default periodic sync cadence
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// What caused a sync pass to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit user request
    Manual,
    /// Periodic timer tick
    Interval,
    /// Network connectivity came back
    Online,
    /// The app came to the foreground (for a CLI, each invocation)
    Foreground,
}

impl SyncTrigger {
    /// Short label for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Interval => "interval",
            Self::Online => "online",
            Self::Foreground => "foreground",
        }
    }
}

/// Counters from one completed pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Queue entries replayed successfully
    pub drained: usize,
    /// Queue entries parked in the dead letter file this pass
    pub dead_lettered: usize,
    /// Items fetched from the remote
    pub fetched: usize,
    /// Conflicts recorded by the merge
    pub conflicts: usize,
    /// Locally-newer items pushed back to the remote
    pub pushed: usize,
    /// Remote-only items adopted locally
    pub adopted: usize,
    /// Local items dropped as deleted elsewhere
    pub dropped: usize,
}

/// How a sync call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The pass ran to completion
    Completed(SyncReport),
    /// Another pass was in flight; this trigger was dropped
    SkippedInFlight,
    /// The remote was unreachable before any work happened
    Offline,
    /// The pass failed partway; partial progress is retained, nothing is
    /// rolled back
    Failed(String),
}

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Cadence for [`SyncService::spawn_periodic`]
    pub interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Owns one sync state machine: `idle -> syncing -> {idle, error, offline}`.
///
/// Explicitly constructed with its collaborators injected; nothing global.
/// Shared as `Arc<SyncService>` between frontends and the periodic task.
pub struct SyncService {
    store: Arc<LocalStore>,
    queue: Arc<MutationQueue>,
    remote: Arc<dyn RemoteItems>,
    reconciler: Reconciler,
    options: SyncOptions,
    backups: Option<Arc<BackupService>>,
    in_flight: AtomicBool,
    phase: Mutex<SyncPhase>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncService")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Wire up an orchestrator
    #[must_use]
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<MutationQueue>,
        remote: Arc<dyn RemoteItems>,
        reconciler: Reconciler,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            queue,
            remote,
            reconciler,
            options,
            backups: None,
            in_flight: AtomicBool::new(false),
            phase: Mutex::new(SyncPhase::Idle),
        }
    }

    /// Let successful passes take scheduled backups when one is due
    #[must_use]
    pub fn with_backups(mut self, backups: Arc<BackupService>) -> Self {
        self.backups = Some(backups);
        self
    }

    /// Current status for displays; cheap enough to poll
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let meta = self.store.load_sync_meta();
        SyncStatus {
            phase: self.phase(),
            last_sync_at: meta.last_sync_at,
            pending_mutations: self.queue.len(),
            dead_letters: self.queue.dead_letter_len(),
            last_error: meta.last_error,
        }
    }

    /// The current phase
    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Run one sync pass, or drop the trigger if a pass is already running.
    ///
    /// Never returns an `Err`: failures are folded into the outcome and the
    /// persisted status so callers poll state instead of catching errors.
    pub async fn sync(&self, trigger: SyncTrigger) -> SyncOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(
                "Sync trigger '{}' dropped, a pass is already in flight",
                trigger.as_str()
            );
            return SyncOutcome::SkippedInFlight;
        }
        let outcome = self.run_pass(trigger).await;
        self.in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Spawn the periodic trigger loop; the in-flight guard makes overlap
    /// with other triggers harmless
    pub fn spawn_periodic(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.options.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; the caller decides whether to run
            // an initial pass, so swallow the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.sync(SyncTrigger::Interval).await;
            }
        })
    }

    async fn run_pass(&self, trigger: SyncTrigger) -> SyncOutcome {
        self.set_phase(SyncPhase::Syncing);
        tracing::info!("Sync pass started ({})", trigger.as_str());

        if let Err(e) = self.remote.probe().await {
            tracing::info!("Remote unreachable, staying offline: {}", e);
            self.set_phase(SyncPhase::Offline);
            return SyncOutcome::Offline;
        }

        let mut report = SyncReport::default();

        if let Err(e) = self.drain_queue(&mut report).await {
            return self.fail_pass(format!("queue drain failed: {e}"), SyncPhase::Error);
        }

        let remote_items = match self.remote.list().await {
            Ok(items) => items,
            Err(e) => {
                let phase = classify_remote_failure(&e);
                return self.fail_pass(format!("remote fetch failed: {e}"), phase);
            }
        };
        report.fetched = remote_items.len();

        let local_items = self.store.load_items();
        let pending_adds = self.queue.pending_add_ids();
        let now = unix_timestamp_ms();
        let merge = self
            .reconciler
            .merge(&local_items, &remote_items, &pending_adds, now);
        report.conflicts = merge.conflicts.len();
        report.adopted = merge.adopted.len();
        report.dropped = merge.dropped.len();

        for conflict in &merge.conflicts {
            tracing::warn!(
                "Conflict on '{}' ({}): local {} vs remote {}, {}",
                conflict.item_name,
                conflict.item_id,
                conflict.local_updated_at,
                conflict.remote_updated_at,
                conflict.resolution.as_str()
            );
        }

        if let Err(e) = self.store.save_items(&merge.merged) {
            return self.fail_pass(format!("persisting merged items failed: {e}"), SyncPhase::Error);
        }
        if let Err(e) = self.store.append_conflicts(&merge.conflicts) {
            tracing::warn!("Failed to persist conflict log: {}", e);
        }

        // Bring stale remote slots up to date. Ids with live queue entries
        // are skipped: their queued mutation carries the newer state and
        // pushing here would race it.
        let queued_ids = self.queue.queued_item_ids();
        let merged_by_id: HashMap<&ItemId, &Item> =
            merge.merged.iter().map(|item| (&item.id, item)).collect();
        for id in &merge.to_push {
            if queued_ids.contains(id) {
                tracing::debug!("Skipping push-back for {}, a queued mutation covers it", id);
                continue;
            }
            let Some(item) = merged_by_id.get(id) else {
                continue;
            };
            match self.remote.update(id, &ItemPayload::from(*item)).await {
                Ok(()) => report.pushed += 1,
                Err(e) if e.is_transient() => {
                    let phase = classify_remote_failure(&e);
                    return self.fail_pass(format!("push-back for {id} failed: {e}"), phase);
                }
                Err(e) => {
                    tracing::warn!("Push-back for {} rejected: {}", id, e);
                }
            }
        }

        let completed_at = unix_timestamp_ms();
        if let Err(e) = self.store.mark_synced(completed_at) {
            return self.fail_pass(format!("recording sync completion failed: {e}"), SyncPhase::Error);
        }
        self.set_phase(SyncPhase::Idle);
        tracing::info!(
            "Sync pass completed: {} drained, {} dead lettered, {} fetched, {} conflict(s), {} pushed, {} adopted, {} dropped",
            report.drained,
            report.dead_lettered,
            report.fetched,
            report.conflicts,
            report.pushed,
            report.adopted,
            report.dropped
        );

        if let Some(backups) = &self.backups {
            match backups.auto_backup_if_due(completed_at).await {
                Ok(true) => tracing::info!("Scheduled backup created"),
                Ok(false) => {}
                Err(e) => tracing::warn!("Scheduled backup failed: {}", e),
            }
        }

        SyncOutcome::Completed(report)
    }

    /// Replay queued mutations strictly in order.
    ///
    /// Stops without error when the queue is empty, the head is backing
    /// off, or a transient failure says the remote is struggling; the rest
    /// of the pass still runs so pull-only progress is never blocked.
    /// Returns `Err` only for local store failures.
    async fn drain_queue(&self, report: &mut SyncReport) -> Result<()> {
        loop {
            let now = unix_timestamp_ms();
            let Some(entry) = self.queue.peek_ready(now) else {
                let deferred = self.queue.len();
                if deferred > 0 {
                    tracing::debug!("Queue head backing off, {} mutation(s) deferred", deferred);
                }
                return Ok(());
            };
            match self.replay(&entry).await {
                Ok(()) => {
                    report.drained += 1;
                }
                Err(e) if e.is_transient() => {
                    match self.queue.fail_transient(entry.seq, &e.to_string(), now)? {
                        RetryDisposition::Backoff { next_attempt_at } => {
                            tracing::info!(
                                "Transient failure on {} mutation #{}, retrying after {}: {}",
                                entry.kind,
                                entry.seq,
                                next_attempt_at,
                                e
                            );
                        }
                        RetryDisposition::DeadLettered => {
                            report.dead_lettered += 1;
                        }
                    }
                    // Preserve ordering: never skip ahead past a retryable
                    // entry. The fetch/merge stages still run.
                    return Ok(());
                }
                Err(e) => {
                    self.queue.fail_permanent(entry.seq, &e.to_string())?;
                    report.dead_lettered += 1;
                }
            }
        }
    }

    /// Replay one entry against the remote; `Ok` means the entry is done
    /// and has been removed from the queue
    async fn replay(&self, entry: &MutationRecord) -> std::result::Result<(), RemoteError> {
        match entry.kind {
            MutationKind::Add => {
                let Some(item) = entry.item.as_ref() else {
                    // Unreplayable record, e.g. from a hand-edited queue file
                    return Err(RemoteError::InvalidPayload(
                        "add mutation without an item snapshot".to_string(),
                    ));
                };
                let remote_id = self.remote.create(&ItemPayload::from(item)).await?;
                self.complete_entry(entry)?;
                if remote_id != entry.item_id {
                    self.rekey_local(&entry.item_id, &remote_id)?;
                }
                Ok(())
            }
            MutationKind::Update => {
                let Some(item) = entry.item.as_ref() else {
                    return Err(RemoteError::InvalidPayload(
                        "update mutation without an item snapshot".to_string(),
                    ));
                };
                match self.remote.update(&entry.item_id, &ItemPayload::from(item)).await {
                    Ok(()) => {}
                    Err(RemoteError::NotFound) => {
                        // Deleted remotely; replaying the update would
                        // resurrect it
                        return Err(RemoteError::NotFound);
                    }
                    Err(e) => return Err(e),
                }
                self.complete_entry(entry)?;
                Ok(())
            }
            MutationKind::Delete => {
                match self.remote.delete(&entry.item_id).await {
                    Ok(()) | Err(RemoteError::NotFound) => {}
                    Err(RemoteError::PermissionDenied(reason)) => {
                        tracing::debug!(
                            "Delete of {} denied ({}), retrying with elevated credentials",
                            entry.item_id,
                            reason
                        );
                        match self.remote.delete_privileged(&entry.item_id).await {
                            Ok(()) | Err(RemoteError::NotFound) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(e) => return Err(e),
                }
                self.complete_entry(entry)?;
                Ok(())
            }
        }
    }

    fn complete_entry(&self, entry: &MutationRecord) -> std::result::Result<(), RemoteError> {
        // A store failure here must not look permanent to the caller: the
        // remote call already succeeded, so retrying the replay is the
        // lesser evil compared to dead lettering a done mutation.
        self.queue
            .complete(entry.seq)
            .map_err(|e| RemoteError::Unreachable(format!("queue persistence failed: {e}")))
    }

    /// Re-key the stored item and any later queue entries after the remote
    /// assigned its own id on create
    fn rekey_local(&self, old: &ItemId, new: &ItemId) -> std::result::Result<(), RemoteError> {
        let remapped = self
            .queue
            .remap_item_id(old, new)
            .map_err(|e| RemoteError::Unreachable(format!("queue persistence failed: {e}")))?;
        let mut items = self.store.load_items();
        let mut changed = false;
        for item in &mut items {
            if item.id == *old {
                item.id = new.clone();
                changed = true;
            }
        }
        if changed {
            self.store
                .save_items(&items)
                .map_err(|e| RemoteError::Unreachable(format!("store persistence failed: {e}")))?;
        }
        tracing::debug!(
            "Re-keyed item {} -> {} ({} queued entr{} rewritten)",
            old,
            new,
            remapped,
            if remapped == 1 { "y" } else { "ies" }
        );
        Ok(())
    }

    fn fail_pass(&self, message: String, phase: SyncPhase) -> SyncOutcome {
        tracing::warn!("Sync pass failed: {}", message);
        if let Err(e) = self.store.record_sync_error(&message) {
            tracing::warn!("Failed to persist sync error: {}", e);
        }
        self.set_phase(phase);
        SyncOutcome::Failed(message)
    }
}

/// A mid-pass transient failure means the network dropped out from under
/// us; anything else is an error with the remote still reachable
const fn classify_remote_failure(e: &RemoteError) -> SyncPhase {
    if e.is_transient() {
        SyncPhase::Offline
    } else {
        SyncPhase::Error
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64};

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::models::ItemDraft;

    /// In-memory stand-in for the hosted store with scriptable failures
    #[derive(Default)]
    struct FakeRemote {
        items: Mutex<HashMap<ItemId, Item>>,
        next_key: AtomicU64,
        clock: AtomicI64,
        unreachable: AtomicBool,
        slow_probe: AtomicBool,
        update_unreachable: Mutex<HashSet<ItemId>>,
        update_missing: Mutex<HashSet<ItemId>>,
        deny_delete: Mutex<HashSet<ItemId>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn with_clock(start: i64) -> Self {
            let fake = Self::default();
            fake.clock.store(start, Ordering::SeqCst);
            fake
        }

        fn seed(&self, item: Item) {
            self.items.lock().unwrap().insert(item.id.clone(), item);
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn tick(&self) -> i64 {
            self.clock.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn check_reachable(&self) -> std::result::Result<(), RemoteError> {
            if self.unreachable.load(Ordering::SeqCst) {
                Err(RemoteError::Unreachable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }

        fn apply_payload(item: &mut Item, payload: &ItemPayload, stamp: i64) {
            item.name = payload.name.clone();
            item.category = payload.category.clone();
            item.brand = payload.brand.clone();
            item.location = payload.location.clone();
            item.notes = payload.notes.clone();
            item.quantity = payload.quantity;
            item.expiry_date = payload.expiry_date;
            item.production_date = payload.production_date;
            item.medicine_tags = payload.medicine_tags.clone();
            item.updated_at = stamp;
        }
    }

    #[async_trait]
    impl RemoteItems for FakeRemote {
        async fn list(&self) -> std::result::Result<Vec<Item>, RemoteError> {
            self.check_reachable()?;
            self.record("list");
            let mut items: Vec<Item> = self.items.lock().unwrap().values().cloned().collect();
            items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(items)
        }

        async fn create(&self, payload: &ItemPayload) -> std::result::Result<ItemId, RemoteError> {
            self.check_reachable()?;
            let key = self.next_key.fetch_add(1, Ordering::SeqCst) + 1;
            let id: ItemId = format!("srv{key}").parse().unwrap();
            self.record(format!("create {}", payload.name));
            let stamp = self.tick();
            let mut item = Item::new(ItemDraft::new(payload.name.clone()));
            item.id = id.clone();
            item.created_at = stamp;
            Self::apply_payload(&mut item, payload, stamp);
            self.items.lock().unwrap().insert(id.clone(), item);
            Ok(id)
        }

        async fn update(
            &self,
            id: &ItemId,
            payload: &ItemPayload,
        ) -> std::result::Result<(), RemoteError> {
            self.check_reachable()?;
            if self.update_unreachable.lock().unwrap().contains(id) {
                return Err(RemoteError::Unreachable("timeout".to_string()));
            }
            self.record(format!("update {id}"));
            if self.update_missing.lock().unwrap().contains(id) {
                return Err(RemoteError::NotFound);
            }
            let stamp = self.tick();
            let mut items = self.items.lock().unwrap();
            let Some(item) = items.get_mut(id) else {
                return Err(RemoteError::NotFound);
            };
            Self::apply_payload(item, payload, stamp);
            Ok(())
        }

        async fn delete(&self, id: &ItemId) -> std::result::Result<(), RemoteError> {
            self.check_reachable()?;
            self.record(format!("delete {id}"));
            if self.deny_delete.lock().unwrap().contains(id) {
                return Err(RemoteError::PermissionDenied("acl".to_string()));
            }
            if self.items.lock().unwrap().remove(id).is_none() {
                return Err(RemoteError::NotFound);
            }
            Ok(())
        }

        async fn delete_privileged(&self, id: &ItemId) -> std::result::Result<(), RemoteError> {
            self.check_reachable()?;
            self.record(format!("delete_privileged {id}"));
            self.items.lock().unwrap().remove(id);
            Ok(())
        }

        async fn probe(&self) -> std::result::Result<(), RemoteError> {
            if self.slow_probe.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.check_reachable()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<LocalStore>,
        queue: Arc<MutationQueue>,
        remote: Arc<FakeRemote>,
        service: Arc<SyncService>,
    }

    fn harness(remote: FakeRemote) -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let queue = Arc::new(MutationQueue::load(Arc::clone(&store)));
        let remote = Arc::new(remote);
        let service = Arc::new(SyncService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&remote) as Arc<dyn RemoteItems>,
            Reconciler::default(),
            SyncOptions::default(),
        ));
        Harness {
            _dir: dir,
            store,
            queue,
            remote,
            service,
        }
    }

    /// Item with deterministic stamps below the fake server clock
    fn stamped(name: &str, stamp: i64) -> Item {
        let mut item = Item::new(ItemDraft::new(name));
        item.created_at = stamp;
        item.updated_at = stamp;
        item
    }

    fn report(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("expected completed pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_drain_replays_in_enqueue_order() {
        let h = harness(FakeRemote::with_clock(100_000));
        let mut item = stamped("Milk", 99_000);
        h.store.save_items(std::slice::from_ref(&item)).unwrap();
        h.queue
            .enqueue(MutationKind::Add, item.id.clone(), Some(item.clone()))
            .unwrap();
        item.quantity = 2;
        h.queue
            .enqueue(MutationKind::Update, item.id.clone(), Some(item.clone()))
            .unwrap();
        item.quantity = 3;
        h.queue
            .enqueue(MutationKind::Update, item.id.clone(), Some(item.clone()))
            .unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);
        assert_eq!(report.drained, 3);
        assert!(h.queue.is_empty());

        let calls = h.remote.calls();
        assert_eq!(calls[0], "create Milk");
        assert!(calls[1].starts_with("update srv1"));
        assert!(calls[2].starts_with("update srv1"));

        // Final remote state reflects the last update
        let remote_items = h.remote.items.lock().unwrap();
        assert_eq!(remote_items.len(), 1);
        assert_eq!(remote_items.values().next().unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn test_create_rekeys_stored_item_and_queue() {
        let h = harness(FakeRemote::with_clock(100_000));
        let item = stamped("Milk", 99_000);
        let old_id = item.id.clone();
        h.store.save_items(std::slice::from_ref(&item)).unwrap();
        h.queue
            .enqueue(MutationKind::Add, old_id.clone(), Some(item))
            .unwrap();

        report(h.service.sync(SyncTrigger::Manual).await);

        let items = h.store.load_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_str(), "srv1");
        assert!(!items.iter().any(|i| i.id == old_id));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_aborts_drain_but_pass_continues() {
        let h = harness(FakeRemote::with_clock(100_000));
        let a = stamped("A", 99_000);
        let b = stamped("B", 99_000);
        h.remote.seed(stamped("Remote only", 98_000));
        h.remote.update_unreachable.lock().unwrap().insert(a.id.clone());
        h.store.save_items(&[a.clone(), b.clone()]).unwrap();
        h.queue
            .enqueue(MutationKind::Update, a.id.clone(), Some(a.clone()))
            .unwrap();
        h.queue.enqueue(MutationKind::Delete, b.id.clone(), None).unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);

        // Nothing drained, nothing skipped past the failing head
        assert_eq!(report.drained, 0);
        assert_eq!(h.queue.len(), 2);
        let entries = h.queue.entries();
        assert_eq!(entries[0].attempts, 1);
        assert!(entries[0].next_attempt_at > 0);
        assert_eq!(entries[1].attempts, 0);

        // The pull still happened
        assert_eq!(report.fetched, 1);
        assert!(h.remote.calls().contains(&"list".to_string()));
    }

    #[tokio::test]
    async fn test_update_of_remotely_deleted_item_dead_letters() {
        let h = harness(FakeRemote::with_clock(100_000));
        let a = stamped("A", 99_000);
        let b = stamped("B", 99_000);
        h.remote.seed(b.clone());
        h.remote.update_missing.lock().unwrap().insert(a.id.clone());
        h.store.save_items(&[a.clone(), b.clone()]).unwrap();
        h.queue
            .enqueue(MutationKind::Update, a.id.clone(), Some(a.clone()))
            .unwrap();
        let mut b_edit = b.clone();
        b_edit.quantity = 7;
        h.queue
            .enqueue(MutationKind::Update, b.id.clone(), Some(b_edit))
            .unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);

        // The rejected update is parked, the drain moved on
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.drained, 1);
        assert!(h.queue.is_empty());
        assert_eq!(h.queue.dead_letter_len(), 1);
        assert_eq!(h.remote.items.lock().unwrap()[&b.id].quantity, 7);
    }

    #[tokio::test]
    async fn test_denied_delete_falls_back_to_privileged() {
        let h = harness(FakeRemote::with_clock(100_000));
        let a = stamped("A", 99_000);
        h.remote.seed(a.clone());
        h.remote.deny_delete.lock().unwrap().insert(a.id.clone());
        h.queue.enqueue(MutationKind::Delete, a.id.clone(), None).unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);
        assert_eq!(report.drained, 1);
        assert!(h.remote.items.lock().unwrap().is_empty());
        let calls = h.remote.calls();
        assert!(calls.contains(&format!("delete {}", a.id)));
        assert!(calls.contains(&format!("delete_privileged {}", a.id)));
    }

    #[tokio::test]
    async fn test_delete_of_already_missing_item_succeeds() {
        let h = harness(FakeRemote::with_clock(100_000));
        let a = stamped("A", 99_000);
        h.queue.enqueue(MutationKind::Delete, a.id.clone(), None).unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);
        assert_eq!(report.drained, 1);
        assert_eq!(report.dead_lettered, 0);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_pass_still_pulls() {
        let h = harness(FakeRemote::with_clock(100_000));
        h.remote.seed(stamped("Soy sauce", 98_000));

        let report = report(h.service.sync(SyncTrigger::Manual).await);
        assert_eq!(report.fetched, 1);
        assert_eq!(report.adopted, 1);
        let items = h.store.load_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Soy sauce");
    }

    #[tokio::test]
    async fn test_remote_deletion_drops_local_copy() {
        let h = harness(FakeRemote::with_clock(100_000));
        // Synced previously (no pending add), now gone remotely
        let a = stamped("A", 99_000);
        h.store.save_items(std::slice::from_ref(&a)).unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);
        assert_eq!(report.dropped, 1);
        assert!(h.store.load_items().is_empty());
    }

    #[tokio::test]
    async fn test_push_back_updates_stale_remote_and_skips_queued_ids() {
        let h = harness(FakeRemote::with_clock(100_000));
        let mut a = stamped("A", 10_000);
        let mut b = stamped("B", 10_000);
        h.remote.seed(a.clone());
        h.remote.seed(b.clone());
        // Both locally newer; B also has a queued update that keeps failing
        a.updated_at = 50_000;
        a.quantity = 5;
        b.updated_at = 50_000;
        h.store.save_items(&[a.clone(), b.clone()]).unwrap();
        h.remote.update_unreachable.lock().unwrap().insert(b.id.clone());
        h.queue
            .enqueue(MutationKind::Update, b.id.clone(), Some(b.clone()))
            .unwrap();

        let report = report(h.service.sync(SyncTrigger::Manual).await);

        assert_eq!(report.pushed, 1);
        assert_eq!(h.remote.items.lock().unwrap()[&a.id].quantity, 5);
        // B's push was left to its queued mutation
        assert_eq!(h.queue.len(), 1);
        let update_calls: Vec<_> = h
            .remote
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("update"))
            .collect();
        assert_eq!(update_calls, vec![format!("update {}", a.id)]);
    }

    #[tokio::test]
    async fn test_probe_failure_goes_offline_and_keeps_queue() {
        let h = harness(FakeRemote::with_clock(100_000));
        h.remote.unreachable.store(true, Ordering::SeqCst);
        let a = stamped("A", 99_000);
        h.queue
            .enqueue(MutationKind::Add, a.id.clone(), Some(a))
            .unwrap();

        let outcome = h.service.sync(SyncTrigger::Online).await;
        assert_eq!(outcome, SyncOutcome::Offline);
        assert_eq!(h.service.phase(), SyncPhase::Offline);
        assert_eq!(h.queue.len(), 1);
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_trigger_is_dropped() {
        let h = harness(FakeRemote::with_clock(100_000));
        h.remote.slow_probe.store(true, Ordering::SeqCst);
        let a = stamped("A", 99_000);
        h.queue
            .enqueue(MutationKind::Add, a.id.clone(), Some(a))
            .unwrap();

        let first = h.service.sync(SyncTrigger::Manual);
        let second = h.service.sync(SyncTrigger::Interval);
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, SyncOutcome::Completed(_)));
        assert_eq!(second, SyncOutcome::SkippedInFlight);
        // Exactly one drain happened
        let creates: Vec<_> = h
            .remote
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("create"))
            .collect();
        assert_eq!(creates.len(), 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_status_reflects_successful_pass() {
        let h = harness(FakeRemote::with_clock(100_000));
        assert_eq!(h.service.status().last_sync_at, None);

        report(h.service.sync(SyncTrigger::Manual).await);

        let status = h.service.status();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert!(status.last_sync_at.is_some());
        assert_eq!(status.pending_mutations, 0);
        assert_eq!(status.last_error, None);
    }
}
