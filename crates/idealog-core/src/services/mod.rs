//! Shared services used across clients.

mod engine;
mod locks;
mod store;

pub use engine::SyncEngine;
pub use locks::{OwnerGuard, OwnerLocks};
pub use store::{CachedQuery, IntegrityReport, RecordStore};
