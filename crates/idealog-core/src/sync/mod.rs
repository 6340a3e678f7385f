//! Sync with the remote store: push pending changes, pull and merge snapshots.

mod http;
mod memory;
mod merge;
mod push;
mod remote;

pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;
pub use merge::{Conflict, ConflictPolicy, MergeMode, MergeOutcome};
pub use push::{FailedPush, PushAction, PushReport, PushedItem};
pub use remote::{fetch_snapshot, RemoteRecord, RemoteSnapshot, RemoteStore};

pub(crate) use merge::{reconcile, replace_all};
pub(crate) use push::push_pending;
