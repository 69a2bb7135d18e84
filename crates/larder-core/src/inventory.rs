//! Local-first item operations.
//!
//! Every mutation lands in the local store and the mutation queue in the
//! same call; nothing here talks to the network. The queue entry is written
//! first: a mutation whose item write failed can still be replayed from its
//! queued snapshot, while the reverse would leave an item no sync pass ever
//! pushes.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::{Item, ItemDraft, ItemId, MutationKind};
use crate::queue::MutationQueue;
use crate::store::LocalStore;
use crate::util::unix_timestamp_ms;

/// Listing filter; every set criterion must match
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Category, compared case-insensitively
    pub category: Option<String>,
    /// Storage location, compared case-insensitively
    pub location: Option<String>,
    /// Only items carrying medicine tags
    pub medicine_only: bool,
    /// Only items expiring within this many days (including already expired)
    pub expiring_within_days: Option<i64>,
    /// Substring match against name, brand, and notes
    pub search: Option<String>,
}

impl ItemFilter {
    fn matches(&self, item: &Item, now: i64) -> bool {
        if let Some(category) = &self.category {
            if !item
                .category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
            {
                return false;
            }
        }
        if let Some(location) = &self.location {
            if !item
                .location
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(location))
            {
                return false;
            }
        }
        if self.medicine_only && !item.is_medicine() {
            return false;
        }
        if let Some(days) = self.expiring_within_days {
            if !item.expires_within_days(days, now) {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let hit = |s: &str| s.to_lowercase().contains(&needle);
            if !(hit(&item.name)
                || item.brand.as_deref().is_some_and(hit)
                || item.notes.as_deref().is_some_and(hit))
            {
                return false;
            }
        }
        true
    }
}

/// The item collection as frontends see it
pub struct Inventory {
    store: Arc<LocalStore>,
    queue: Arc<MutationQueue>,
}

impl Inventory {
    #[must_use]
    pub fn new(store: Arc<LocalStore>, queue: Arc<MutationQueue>) -> Self {
        Self { store, queue }
    }

    /// Add an item and queue its creation
    pub fn add(&self, draft: ItemDraft) -> Result<Item> {
        validate_name(&draft.name)?;
        let item = Item::new(draft);
        self.queue
            .enqueue(MutationKind::Add, item.id.clone(), Some(item.clone()))?;
        let mut items = self.store.load_items();
        items.push(item.clone());
        self.store.save_items(&items)?;
        tracing::debug!("Added item '{}' ({})", item.name, item.id);
        Ok(item)
    }

    /// Overwrite an item's user-editable fields and queue the update
    pub fn update(&self, id: &ItemId, draft: ItemDraft) -> Result<Item> {
        validate_name(&draft.name)?;
        let mut items = self.store.load_items();
        let Some(item) = items.iter_mut().find(|i| i.id == *id) else {
            return Err(Error::NotFound(format!("item {id}")));
        };
        item.apply(draft);
        let updated = item.clone();
        self.queue
            .enqueue(MutationKind::Update, updated.id.clone(), Some(updated.clone()))?;
        self.store.save_items(&items)?;
        tracing::debug!("Updated item '{}' ({})", updated.name, updated.id);
        Ok(updated)
    }

    /// Remove an item and queue its deletion; returns the removed item
    pub fn remove(&self, id: &ItemId) -> Result<Item> {
        let mut items = self.store.load_items();
        let Some(pos) = items.iter().position(|i| i.id == *id) else {
            return Err(Error::NotFound(format!("item {id}")));
        };
        let removed = items.remove(pos);
        self.queue
            .enqueue(MutationKind::Delete, removed.id.clone(), None)?;
        self.store.save_items(&items)?;
        tracing::debug!("Removed item '{}' ({})", removed.name, removed.id);
        Ok(removed)
    }

    /// Look up one item by exact id
    #[must_use]
    pub fn get(&self, id: &ItemId) -> Option<Item> {
        self.store.load_items().into_iter().find(|i| i.id == *id)
    }

    /// Filtered listing, sorted by name then age
    #[must_use]
    pub fn list(&self, filter: &ItemFilter) -> Vec<Item> {
        let now = unix_timestamp_ms();
        let mut items: Vec<Item> = self
            .store
            .load_items()
            .into_iter()
            .filter(|item| filter.matches(item, now))
            .collect();
        items.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then(a.created_at.cmp(&b.created_at))
        });
        items
    }

    /// Resolve user input to an item id: an exact id, a unique id prefix,
    /// or a unique case-insensitive name
    pub fn resolve_id(&self, input: &str) -> Result<ItemId> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::InvalidInput("item reference cannot be empty".to_string()));
        }
        let items = self.store.load_items();

        if let Some(item) = items.iter().find(|i| i.id.as_str() == input) {
            return Ok(item.id.clone());
        }

        let prefix_matches: Vec<&Item> = items
            .iter()
            .filter(|i| i.id.as_str().starts_with(input))
            .collect();
        match prefix_matches.as_slice() {
            [item] => return Ok(item.id.clone()),
            [] => {}
            many => {
                return Err(Error::InvalidInput(format!(
                    "id prefix '{input}' matches {} items",
                    many.len()
                )));
            }
        }

        let name_matches: Vec<&Item> = items
            .iter()
            .filter(|i| i.name.eq_ignore_ascii_case(input))
            .collect();
        match name_matches.as_slice() {
            [item] => Ok(item.id.clone()),
            [] => Err(Error::NotFound(format!("item '{input}'"))),
            many => Err(Error::InvalidInput(format!(
                "name '{input}' matches {} items, use an id",
                many.len()
            ))),
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("item name cannot be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<LocalStore>,
        queue: Arc<MutationQueue>,
        inventory: Inventory,
    }

    fn harness() -> Harness {
        let dir = tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path()).unwrap());
        let queue = Arc::new(MutationQueue::load(Arc::clone(&store)));
        let inventory = Inventory::new(Arc::clone(&store), Arc::clone(&queue));
        Harness {
            _dir: dir,
            store,
            queue,
            inventory,
        }
    }

    #[test]
    fn test_add_persists_and_queues() {
        let h = harness();
        let item = h.inventory.add(ItemDraft::new("  Milk  ")).unwrap();
        assert_eq!(item.name, "Milk");

        let listed = h.inventory.list(&ItemFilter::default());
        assert_eq!(listed, vec![item.clone()]);

        let entries = h.queue.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, MutationKind::Add);
        assert_eq!(entries[0].item_id, item.id);
        assert_eq!(entries[0].item, Some(item));
    }

    #[test]
    fn test_add_rejects_blank_name() {
        let h = harness();
        let result = h.inventory.add(ItemDraft::new("   "));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(h.inventory.list(&ItemFilter::default()).is_empty());
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_update_applies_draft_and_queues() {
        let h = harness();
        let item = h.inventory.add(ItemDraft::new("Milk")).unwrap();

        let mut draft = ItemDraft::from(&item);
        draft.quantity = 4;
        draft.location = Some("fridge".to_string());
        let updated = h.inventory.update(&item.id, draft).unwrap();
        assert_eq!(updated.quantity, 4);
        assert_eq!(updated.location.as_deref(), Some("fridge"));
        assert!(updated.updated_at >= item.updated_at);

        assert_eq!(h.inventory.get(&item.id), Some(updated.clone()));
        let entries = h.queue.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, MutationKind::Update);
        assert_eq!(entries[1].item, Some(updated));
    }

    #[test]
    fn test_update_unknown_item_fails() {
        let h = harness();
        let missing = ItemId::new();
        let result = h.inventory.update(&missing, ItemDraft::new("Ghost"));
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(h.queue.is_empty());
    }

    #[test]
    fn test_remove_deletes_and_queues() {
        let h = harness();
        let item = h.inventory.add(ItemDraft::new("Milk")).unwrap();
        let removed = h.inventory.remove(&item.id).unwrap();
        assert_eq!(removed.id, item.id);

        assert_eq!(h.inventory.get(&item.id), None);
        let entries = h.queue.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].kind, MutationKind::Delete);
        assert_eq!(entries[1].item, None);
    }

    #[test]
    fn test_list_filters_and_sorts() {
        let h = harness();
        let mut milk = ItemDraft::new("milk");
        milk.category = Some("Dairy".to_string());
        milk.location = Some("Fridge".to_string());
        h.inventory.add(milk).unwrap();

        let mut aspirin = ItemDraft::new("Aspirin");
        aspirin.medicine_tags = vec!["painkiller".to_string()];
        aspirin.brand = Some("Bayer".to_string());
        h.inventory.add(aspirin).unwrap();

        let all = h.inventory.list(&ItemFilter::default());
        assert_eq!(all.len(), 2);
        // Case-insensitive name order
        assert_eq!(all[0].name, "Aspirin");
        assert_eq!(all[1].name, "milk");

        let dairy = h.inventory.list(&ItemFilter {
            category: Some("dairy".to_string()),
            ..ItemFilter::default()
        });
        assert_eq!(dairy.len(), 1);
        assert_eq!(dairy[0].name, "milk");

        let medicine = h.inventory.list(&ItemFilter {
            medicine_only: true,
            ..ItemFilter::default()
        });
        assert_eq!(medicine.len(), 1);
        assert_eq!(medicine[0].name, "Aspirin");

        let by_brand = h.inventory.list(&ItemFilter {
            search: Some("bayer".to_string()),
            ..ItemFilter::default()
        });
        assert_eq!(by_brand.len(), 1);
        assert_eq!(by_brand[0].name, "Aspirin");
    }

    #[test]
    fn test_list_expiring_within_days() {
        let h = harness();
        let now = unix_timestamp_ms();
        let day = 86_400_000;

        let mut soon = ItemDraft::new("Yogurt");
        soon.expiry_date = Some(now + day);
        h.inventory.add(soon).unwrap();

        let mut later = ItemDraft::new("Honey");
        later.expiry_date = Some(now + 30 * day);
        h.inventory.add(later).unwrap();

        let expiring = h.inventory.list(&ItemFilter {
            expiring_within_days: Some(2),
            ..ItemFilter::default()
        });
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].name, "Yogurt");
    }

    #[test]
    fn test_resolve_id_by_prefix_and_name() {
        let h = harness();
        // Server-assigned style keys make prefix behavior deterministic
        let with_id = |key: &str, name: &str| {
            let mut item = Item::new(ItemDraft::new(name));
            item.id = key.parse().unwrap();
            item
        };
        let items = vec![
            with_id("srv100", "Milk"),
            with_id("srv101", "Milk"),
            with_id("xyz9", "Bread"),
        ];
        h.store.save_items(&items).unwrap();

        // Exact id, unique prefix, unique name
        assert_eq!(h.inventory.resolve_id("srv100").unwrap(), items[0].id);
        assert_eq!(h.inventory.resolve_id("xy").unwrap(), items[2].id);
        assert_eq!(h.inventory.resolve_id("bread").unwrap(), items[2].id);

        // Ambiguous prefix and ambiguous name both refuse to guess
        assert!(matches!(
            h.inventory.resolve_id("srv1"),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.inventory.resolve_id("milk"),
            Err(Error::InvalidInput(_))
        ));

        assert!(matches!(
            h.inventory.resolve_id("nope"),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(h.inventory.resolve_id(" "), Err(Error::InvalidInput(_))));
    }
}
