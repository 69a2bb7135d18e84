//! Remote item store contract.
//!
//! The remote is an opaque class-style REST collection. Everything above
//! this module talks to the [`RemoteItems`] / [`RemoteBackups`] traits so
//! the sync engine can be exercised against an in-memory fake and the
//! backend can be swapped without touching the orchestrator.

mod http;

pub use http::{HttpRemote, RemoteConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BackupMeta, BackupSnapshot, Item, ItemId, SnapshotId};

/// Transport and API failures from the remote store.
///
/// The transient/permanent split drives the queue: transient failures back
/// off and retry, everything else is rejected for good.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network-level failure or server-side error; worth retrying
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The credentials in use may not perform this operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The addressed object does not exist remotely
    #[error("Not found")]
    NotFound,

    /// Any other API rejection
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the promised shape
    #[error("Invalid response payload: {0}")]
    InvalidPayload(String),

    /// The client is misconfigured; no request was attempted
    #[error("Invalid remote configuration: {0}")]
    Config(String),
}

impl RemoteError {
    /// Whether retrying the same call later could succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Write form of an item: the user-editable fields only.
///
/// The remote store manages `id`, `createdAt` and `updatedAt` itself and
/// rejects payloads carrying them, so this type simply does not have those
/// fields; a payload that would be rejected cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub expiry_date: Option<i64>,
    #[serde(default)]
    pub production_date: Option<i64>,
    #[serde(default)]
    pub medicine_tags: Vec<String>,
}

impl From<&Item> for ItemPayload {
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

/// Remote CRUD over the item collection
#[async_trait]
pub trait RemoteItems: Send + Sync {
    /// Fetch the full remote collection, newest created first
    async fn list(&self) -> Result<Vec<Item>, RemoteError>;

    /// Create an item; returns the server-assigned id
    async fn create(&self, payload: &ItemPayload) -> Result<ItemId, RemoteError>;

    /// Replace an item's user fields
    async fn update(&self, id: &ItemId, payload: &ItemPayload) -> Result<(), RemoteError>;

    /// Delete an item with the session credentials
    async fn delete(&self, id: &ItemId) -> Result<(), RemoteError>;

    /// Delete an item with elevated credentials; fallback for rows the
    /// session key may not remove
    async fn delete_privileged(&self, id: &ItemId) -> Result<(), RemoteError>;

    /// Cheap reachability check; any HTTP response counts as reachable
    async fn probe(&self) -> Result<(), RemoteError>;
}

/// Remote storage for backup snapshots
#[async_trait]
pub trait RemoteBackups: Send + Sync {
    /// Snapshot listings, newest first
    async fn list(&self) -> Result<Vec<BackupMeta>, RemoteError>;

    /// Upload a full snapshot
    async fn upload(&self, snapshot: &BackupSnapshot) -> Result<(), RemoteError>;

    /// Download a full snapshot
    async fn fetch(&self, id: SnapshotId) -> Result<BackupSnapshot, RemoteError>;

    /// Remove a snapshot
    async fn delete(&self, id: SnapshotId) -> Result<(), RemoteError>;
}
