//! idealog-core - Core library for Idealog
//!
//! This crate contains the record models, the local SQLite store, and the
//! local-first sync engine used by every Idealog interface. Ideas and drafts
//! are written locally first and reconciled with the remote store only when
//! the user asks for a push or a sync.

pub mod batch;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod session;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    Collection, DraftFields, IdeaFields, LocalId, OwnerId, Record, RecordFields, RecordPatch,
    RecordQuery, RemoteId, SyncState,
};
pub use services::{RecordStore, SyncEngine};
