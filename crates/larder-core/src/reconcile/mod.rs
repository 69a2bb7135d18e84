//! Reconciliation: merge a local and a remote item collection into one.
//!
//! Last-writer-wins by `updated_at`. A strictly newer copy wins no matter
//! which side it came from; the configured policy only breaks exact ties.
//! Conflicts are recorded for observability when the two timestamps differ
//! by more than a small clock-skew tolerance window; the window never
//! changes which side wins, only whether the disagreement is logged.
//!
//! Deletions carry no tombstones. A local item missing from the remote was
//! either deleted elsewhere or not uploaded yet, and the pending-add set
//! from the mutation queue is what disambiguates: pending items are kept,
//! everything else missing remotely is dropped.
//!
//! `merge` is a pure function of its inputs plus an injected clock; running
//! it twice over the same inputs produces identical output.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use crate::models::{ConflictRecord, ConflictResolution, Item, ItemId};

/// Default clock-skew tolerance before a disagreement is logged as a conflict
pub const DEFAULT_SKEW_TOLERANCE_MS: i64 = 2_000;

/// How exact-tie disagreements are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Keep the remote copy (the default)
    #[default]
    ServerWins,
    /// Keep the local copy
    ClientWins,
    /// Blend: take each field from whichever side has one, remote winning
    /// any field both sides set
    FieldMerge,
}

impl MergePolicy {
    /// Short label for logs and config files
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ServerWins => "server-wins",
            Self::ClientWins => "client-wins",
            Self::FieldMerge => "field-merge",
        }
    }
}

impl FromStr for MergePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "server-wins" | "server" => Ok(Self::ServerWins),
            "client-wins" | "client" => Ok(Self::ClientWins),
            "field-merge" | "merge" => Ok(Self::FieldMerge),
            other => Err(format!(
                "unknown merge policy '{other}' (expected server-wins, client-wins or field-merge)"
            )),
        }
    }
}

/// Everything one merge pass decided
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The merged collection, sorted by creation time then id
    pub merged: Vec<Item>,
    /// Disagreements beyond the skew window, in remote iteration order
    pub conflicts: Vec<ConflictRecord>,
    /// Ids where the local copy won against a stale remote copy and the
    /// remote should be brought up to date
    pub to_push: Vec<ItemId>,
    /// Remote-only ids adopted into the merged collection
    pub adopted: Vec<ItemId>,
    /// Local-only ids dropped because nothing pending explains their
    /// absence from the remote (deleted elsewhere)
    pub dropped: Vec<ItemId>,
}

/// Merges local and remote collections under one policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciler {
    policy: MergePolicy,
    skew_tolerance_ms: i64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self {
            policy: MergePolicy::default(),
            skew_tolerance_ms: DEFAULT_SKEW_TOLERANCE_MS,
        }
    }
}

impl Reconciler {
    /// Reconciler with the given tie policy and the default skew tolerance
    #[must_use]
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Override the skew tolerance window
    #[must_use]
    pub const fn with_skew_tolerance(mut self, tolerance_ms: i64) -> Self {
        self.skew_tolerance_ms = tolerance_ms;
        self
    }

    /// The configured tie policy
    #[must_use]
    pub const fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Merge `local` and `remote` into one collection.
    ///
    /// `pending_adds` holds ids whose create has not reached the remote
    /// yet; `now` stamps any recorded conflicts.
    #[must_use]
    pub fn merge(
        &self,
        local: &[Item],
        remote: &[Item],
        pending_adds: &HashSet<ItemId>,
        now: i64,
    ) -> ReconcileOutcome {
        let local_by_id: HashMap<&ItemId, &Item> =
            local.iter().map(|item| (&item.id, item)).collect();
        let remote_ids: HashSet<&ItemId> = remote.iter().map(|item| &item.id).collect();

        let mut outcome = ReconcileOutcome::default();

        for remote_item in remote {
            match local_by_id.get(&remote_item.id) {
                None => {
                    outcome.adopted.push(remote_item.id.clone());
                    outcome.merged.push(remote_item.clone());
                }
                Some(local_item) => {
                    let (winner, resolution) = self.resolve(local_item, remote_item);
                    if resolution == ConflictResolution::KeptLocal
                        && local_item.updated_at > remote_item.updated_at
                    {
                        outcome.to_push.push(local_item.id.clone());
                    }
                    let delta = (local_item.updated_at - remote_item.updated_at).abs();
                    if delta > self.skew_tolerance_ms {
                        outcome.conflicts.push(ConflictRecord {
                            item_id: remote_item.id.clone(),
                            item_name: winner.name.clone(),
                            local_updated_at: local_item.updated_at,
                            remote_updated_at: remote_item.updated_at,
                            resolution,
                            detected_at: now,
                        });
                    }
                    outcome.merged.push(winner);
                }
            }
        }

        for local_item in local {
            if remote_ids.contains(&local_item.id) {
                continue;
            }
            if pending_adds.contains(&local_item.id) {
                outcome.merged.push(local_item.clone());
            } else {
                outcome.dropped.push(local_item.id.clone());
            }
        }

        outcome
            .merged
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        outcome.to_push.sort();
        outcome.adopted.sort();
        outcome.dropped.sort();
        outcome
    }

    /// Pick the winning copy for one id present on both sides
    fn resolve(&self, local: &Item, remote: &Item) -> (Item, ConflictResolution) {
        if remote.updated_at > local.updated_at {
            return (remote.clone(), ConflictResolution::KeptRemote);
        }
        if local.updated_at > remote.updated_at {
            return (local.clone(), ConflictResolution::KeptLocal);
        }
        match self.policy {
            MergePolicy::ServerWins => (remote.clone(), ConflictResolution::KeptRemote),
            MergePolicy::ClientWins => (local.clone(), ConflictResolution::KeptLocal),
            MergePolicy::FieldMerge => (field_merge(local, remote), ConflictResolution::Merged),
        }
    }
}

/// Blend two copies with equal timestamps: any field only one side has
/// comes from that side, and the remote wins fields both sides set.
fn field_merge(local: &Item, remote: &Item) -> Item {
    Item {
        id: remote.id.clone(),
        name: remote.name.clone(),
        category: remote.category.clone().or_else(|| local.category.clone()),
        brand: remote.brand.clone().or_else(|| local.brand.clone()),
        location: remote.location.clone().or_else(|| local.location.clone()),
        notes: remote.notes.clone().or_else(|| local.notes.clone()),
        quantity: remote.quantity,
        expiry_date: remote.expiry_date.or(local.expiry_date),
        production_date: remote.production_date.or(local.production_date),
        medicine_tags: if remote.medicine_tags.is_empty() {
            local.medicine_tags.clone()
        } else {
            remote.medicine_tags.clone()
        },
        created_at: remote.created_at,
        updated_at: remote.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::ItemDraft;

    fn item(id: &str, name: &str, quantity: u32, updated_at: i64) -> Item {
        let mut item = Item::new(ItemDraft::new(name));
        item.id = id.parse().unwrap();
        item.quantity = quantity;
        item.created_at = 1_000;
        item.updated_at = updated_at;
        item
    }

    fn no_pending() -> HashSet<ItemId> {
        HashSet::new()
    }

    #[test]
    fn test_remote_only_items_are_adopted() {
        let remote = vec![item("r1", "Soy sauce", 1, 5_000)];
        let outcome = Reconciler::default().merge(&[], &remote, &no_pending(), 0);
        assert_eq!(outcome.merged, remote);
        assert_eq!(outcome.adopted, vec!["r1".parse().unwrap()]);
        assert!(outcome.conflicts.is_empty());
        assert!(outcome.dropped.is_empty());
    }

    #[test]
    fn test_local_only_pending_add_is_kept() {
        let local = vec![item("l1", "Rice", 1, 5_000)];
        let pending: HashSet<ItemId> = [local[0].id.clone()].into();
        let outcome = Reconciler::default().merge(&local, &[], &pending, 0);
        assert_eq!(outcome.merged, local);
        assert!(outcome.dropped.is_empty());
        assert!(outcome.to_push.is_empty());
    }

    #[test]
    fn test_local_only_without_pending_add_is_dropped() {
        let local = vec![item("l1", "Rice", 1, 5_000)];
        let outcome = Reconciler::default().merge(&local, &[], &no_pending(), 0);
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.dropped, vec![local[0].id.clone()]);
    }

    #[test]
    fn test_strictly_newer_remote_wins_under_every_policy() {
        let local = vec![item("x1", "Milk", 2, 10_000)];
        let remote = vec![item("x1", "Milk", 1, 20_000)];
        for policy in [
            MergePolicy::ServerWins,
            MergePolicy::ClientWins,
            MergePolicy::FieldMerge,
        ] {
            let outcome = Reconciler::new(policy).merge(&local, &remote, &no_pending(), 0);
            assert_eq!(outcome.merged[0].quantity, 1, "policy {policy:?}");
            assert!(outcome.to_push.is_empty(), "policy {policy:?}");
        }
    }

    #[test]
    fn test_strictly_newer_local_wins_and_is_pushed() {
        let local = vec![item("x1", "Milk", 2, 20_000)];
        let remote = vec![item("x1", "Milk", 1, 10_000)];
        for policy in [
            MergePolicy::ServerWins,
            MergePolicy::ClientWins,
            MergePolicy::FieldMerge,
        ] {
            let outcome = Reconciler::new(policy).merge(&local, &remote, &no_pending(), 0);
            assert_eq!(outcome.merged[0].quantity, 2, "policy {policy:?}");
            assert_eq!(outcome.to_push, vec![local[0].id.clone()], "policy {policy:?}");
        }
    }

    #[test]
    fn test_exact_tie_follows_policy() {
        let mut local = item("x1", "Milk", 2, 10_000);
        local.location = Some("fridge".to_string());
        let mut remote = item("x1", "Milk", 1, 10_000);
        remote.brand = Some("Acme".to_string());

        let server = Reconciler::new(MergePolicy::ServerWins)
            .merge(&[local.clone()], &[remote.clone()], &no_pending(), 0);
        assert_eq!(server.merged[0], remote);

        let client = Reconciler::new(MergePolicy::ClientWins)
            .merge(&[local.clone()], &[remote.clone()], &no_pending(), 0);
        assert_eq!(client.merged[0], local);

        let blended = Reconciler::new(MergePolicy::FieldMerge)
            .merge(&[local.clone()], &[remote.clone()], &no_pending(), 0);
        let merged = &blended.merged[0];
        // Remote wins fields both sides set, local fills the gaps
        assert_eq!(merged.quantity, 1);
        assert_eq!(merged.brand, Some("Acme".to_string()));
        assert_eq!(merged.location, Some("fridge".to_string()));
        // Ties never push
        assert!(server.to_push.is_empty());
        assert!(client.to_push.is_empty());
        assert!(blended.to_push.is_empty());
    }

    #[test]
    fn test_conflict_recorded_only_beyond_skew_window() {
        let reconciler = Reconciler::default().with_skew_tolerance(2_000);
        let local = vec![item("x1", "Milk", 2, 10_000)];

        // Inside the window: silently resolved
        let remote = vec![item("x1", "Milk", 1, 12_000)];
        let outcome = reconciler.merge(&local, &remote, &no_pending(), 99);
        assert_eq!(outcome.merged[0].quantity, 1);
        assert!(outcome.conflicts.is_empty());

        // Just beyond the window: same resolution, one recorded conflict
        let remote = vec![item("x1", "Milk", 1, 12_001)];
        let outcome = reconciler.merge(&local, &remote, &no_pending(), 99);
        assert_eq!(outcome.merged[0].quantity, 1);
        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert_eq!(conflict.item_id, local[0].id);
        assert_eq!(conflict.local_updated_at, 10_000);
        assert_eq!(conflict.remote_updated_at, 12_001);
        assert_eq!(conflict.resolution, ConflictResolution::KeptRemote);
        assert_eq!(conflict.detected_at, 99);
    }

    #[test]
    fn test_conflict_resolution_tracks_local_winner() {
        let local = vec![item("x1", "Milk", 2, 50_000)];
        let remote = vec![item("x1", "Milk", 1, 10_000)];
        let outcome = Reconciler::default().merge(&local, &remote, &no_pending(), 0);
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].resolution, ConflictResolution::KeptLocal);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let local = vec![
            item("a", "Rice", 1, 10_000),
            item("b", "Milk", 2, 30_000),
            item("c", "Beans", 1, 10_000),
        ];
        let remote = vec![
            item("a", "Rice", 5, 40_000),
            item("b", "Milk", 9, 20_000),
            item("d", "Tea", 1, 10_000),
        ];
        let pending: HashSet<ItemId> = ["c".parse().unwrap()].into();

        let first = Reconciler::default().merge(&local, &remote, &pending, 7);
        let second = Reconciler::default().merge(&first.merged, &remote, &pending, 7);
        assert_eq!(second.merged, first.merged);
        // No duplicates
        let mut ids: Vec<_> = first.merged.iter().map(|i| i.id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), first.merged.len());
        // Slots the remote won are settled; only the local-newer slot
        // still disagrees with the unchanged remote
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].item_id, "b".parse::<ItemId>().unwrap());
    }

    #[test]
    fn test_merge_output_order_is_input_order_independent() {
        let a = item("a", "Rice", 1, 10_000);
        let b = item("b", "Milk", 2, 30_000);
        let c = item("c", "Tea", 1, 20_000);
        let pending = no_pending();

        let forward =
            Reconciler::default().merge(&[a.clone(), b.clone()], &[c.clone(), b.clone()], &pending, 0);
        let backward =
            Reconciler::default().merge(&[b.clone(), a.clone()], &[b.clone(), c.clone()], &pending, 0);
        assert_eq!(forward.merged, backward.merged);
        assert_eq!(forward.adopted, backward.adopted);
        assert_eq!(forward.dropped, backward.dropped);
    }

    #[test]
    fn test_two_device_edit_newer_quantity_wins() {
        // local: Milk qty 2 updated Jan 1; remote: Milk qty 1 updated Jan 2
        let local = vec![item("x1", "Milk", 2, 1_735_689_600_000)];
        let remote = vec![item("x1", "Milk", 1, 1_735_776_000_000)];
        let outcome = Reconciler::default().merge(&local, &remote, &no_pending(), 0);
        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.merged[0].quantity, 1);
        assert_eq!(outcome.conflicts.len(), 1);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("server-wins".parse::<MergePolicy>(), Ok(MergePolicy::ServerWins));
        assert_eq!("CLIENT-WINS".parse::<MergePolicy>(), Ok(MergePolicy::ClientWins));
        assert_eq!("merge".parse::<MergePolicy>(), Ok(MergePolicy::FieldMerge));
        assert!("ours".parse::<MergePolicy>().is_err());
    }
}
