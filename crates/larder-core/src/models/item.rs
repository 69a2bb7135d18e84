//! Inventory item model

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when parsing an empty item id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("item id cannot be empty")]
pub struct ParseItemIdError;

/// A unique identifier for an inventory item.
///
/// Generated client-side as a UUID v7 (time-sortable) when the item is
/// created locally. The remote store assigns its own key on first upload,
/// after which the local item is re-keyed to match, so a synced item's id
/// is always the remote key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create a new provisional item ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = ParseItemIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseItemIdError);
        }
        Ok(Self(s.to_string()))
    }
}

pub(crate) fn default_quantity() -> u32 {
    1
}

/// A household inventory item.
///
/// Serialized in camelCase so the stored document and the remote class
/// schema share one representation. `created_at`/`updated_at` on a synced
/// item are the remote store's stamps, not local clock reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Unique identifier
    pub id: ItemId,
    /// Item name (required)
    pub name: String,
    /// Free-form category, e.g. "canned", "dairy"
    #[serde(default)]
    pub category: Option<String>,
    /// Brand name
    #[serde(default)]
    pub brand: Option<String>,
    /// Storage location, e.g. "pantry shelf B"
    #[serde(default)]
    pub location: Option<String>,
    /// Free-form notes
    #[serde(default)]
    pub notes: Option<String>,
    /// Count on hand
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Expiry date (Unix ms)
    #[serde(default)]
    pub expiry_date: Option<i64>,
    /// Production date (Unix ms)
    #[serde(default)]
    pub production_date: Option<i64>,
    /// Medicine classification tags (lowercase); empty for non-medicines
    #[serde(default)]
    pub medicine_tags: Vec<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Item {
    /// Create a new item from a draft
    #[must_use]
    pub fn new(draft: ItemDraft) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: ItemId::new(),
            name: draft.name.trim().to_string(),
            category: crate::util::normalize_text_option(draft.category),
            brand: crate::util::normalize_text_option(draft.brand),
            location: crate::util::normalize_text_option(draft.location),
            notes: crate::util::normalize_text_option(draft.notes),
            quantity: draft.quantity,
            expiry_date: draft.expiry_date,
            production_date: draft.production_date,
            medicine_tags: normalize_tags(draft.medicine_tags),
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the user-editable fields from a draft and touch `updated_at`
    pub fn apply(&mut self, draft: ItemDraft) {
        self.name = draft.name.trim().to_string();
        self.category = crate::util::normalize_text_option(draft.category);
        self.brand = crate::util::normalize_text_option(draft.brand);
        self.location = crate::util::normalize_text_option(draft.location);
        self.notes = crate::util::normalize_text_option(draft.notes);
        self.quantity = draft.quantity;
        self.expiry_date = draft.expiry_date;
        self.production_date = draft.production_date;
        self.medicine_tags = normalize_tags(draft.medicine_tags);
        self.touch();
    }

    /// Bump `updated_at` to now
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    /// Whether this item carries any medicine tags
    #[must_use]
    pub fn is_medicine(&self) -> bool {
        !self.medicine_tags.is_empty()
    }

    /// Whether the expiry date has passed
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_date.is_some_and(|d| d < now)
    }

    /// Whether the item expires within the next `days` days (or already has)
    #[must_use]
    pub fn expires_within_days(&self, days: i64, now: i64) -> bool {
        self.expiry_date
            .is_some_and(|d| d <= now + days * 86_400_000)
    }
}

/// User-editable fields of an item, used for create and edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemDraft {
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub quantity: u32,
    pub expiry_date: Option<i64>,
    pub production_date: Option<i64>,
    pub medicine_tags: Vec<String>,
}

impl ItemDraft {
    /// Create a draft with the given name and quantity 1
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: 1,
            ..Self::default()
        }
    }
}

impl From<&Item> for ItemDraft {
    fn from(item: &Item) -> Self {
        Self {
            name: item.name.clone(),
            category: item.category.clone(),
            brand: item.brand.clone(),
            location: item.location.clone(),
            notes: item.notes.clone(),
            quantity: item.quantity,
            expiry_date: item.expiry_date,
            production_date: item.production_date,
            medicine_tags: item.medicine_tags.clone(),
        }
    }
}

/// Lowercase, trim, and deduplicate tags, preserving first-seen order
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter_map(|tag| {
            let tag = tag.trim().to_lowercase();
            if tag.is_empty() || !seen.insert(tag.clone()) {
                None
            } else {
                Some(tag)
            }
        })
        .collect()
}
