//! larder-core - Core library for Larder
//!
//! This crate contains the shared models, local store, mutation queue, and
//! sync engine used by all Larder interfaces.

pub mod backup;
pub mod error;
pub mod export;
pub mod inventory;
pub mod models;
pub mod queue;
pub mod reconcile;
pub mod remote;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Item, ItemDraft, ItemId};
