//! Data models for Idealog

mod query;
mod record;
mod sync_conflict;
mod timestamp;

pub use query::{PendingSync, RecordPage, RecordQuery, Sort, SortDirection, SortField};
pub use record::{
    Collection, DraftFields, IdeaFields, LocalId, OwnerId, Record, RecordFields, RecordPatch,
    RemoteId, SyncState,
};
pub use sync_conflict::SyncConflict;
pub use timestamp::{parse_text_timestamp, RawTimestamp};
