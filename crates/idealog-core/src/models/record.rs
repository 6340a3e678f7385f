//! Record model shared by ideas and drafts

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Locally assigned record identifier.
///
/// Assigned monotonically by the local store and never reused, even after the
/// record is hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub i64);

impl LocalId {
    /// Raw integer value
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| Error::Validation(format!("invalid local id '{s}'")))
    }
}

/// Identifier of the user owning a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Create an owner id, rejecting empty values.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("owner id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(value: OwnerId) -> Self {
        value.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned by the remote store when it first accepts a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a remote id, rejecting empty values.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("remote id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RemoteId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RemoteId> for String {
    fn from(value: RemoteId) -> Self {
        value.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two logical collections of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Short structured notes
    Ideas,
    /// Longer markdown documents
    Drafts,
}

impl Collection {
    /// Every collection, in sync order.
    pub const ALL: [Self; 2] = [Self::Ideas, Self::Drafts];

    /// Collection (and table) name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ideas => "ideas",
            Self::Drafts => "drafts",
        }
    }

    /// Singular label for messages
    pub const fn singular(self) -> &'static str {
        match self {
            Self::Ideas => "idea",
            Self::Drafts => "draft",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ideas" | "idea" => Ok(Self::Ideas),
            "drafts" | "draft" => Ok(Self::Drafts),
            other => Err(Error::Validation(format!("unknown collection '{other}'"))),
        }
    }
}

/// Per-record reconciliation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Created, modified or deleted locally and not yet reconciled
    #[default]
    Local,
    /// Local and remote copies agree
    Synced,
}

impl SyncState {
    /// Stored representation
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Synced => "synced",
        }
    }
}

impl FromStr for SyncState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Self::Local),
            "synced" => Ok(Self::Synced),
            other => Err(Error::Validation(format!("unknown sync state '{other}'"))),
        }
    }
}

/// Domain fields of an idea.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeaFields {
    /// Required headline
    pub title: String,
    #[serde(default)]
    pub content_idea: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub discovery: String,
    #[serde(default)]
    pub teaching_angle: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub hook: String,
}

impl IdeaFields {
    /// Idea with only a title set
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Domain fields of a draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftFields {
    /// Markdown body (required)
    pub content: String,
    /// Local id of the idea this draft grew out of
    #[serde(default)]
    pub idea_id: Option<LocalId>,
}

impl DraftFields {
    /// Draft with the given markdown content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            idea_id: None,
        }
    }
}

/// Variant-specific fields of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RecordFields {
    /// Idea fields
    Idea(IdeaFields),
    /// Draft fields
    Draft(DraftFields),
}

impl RecordFields {
    /// Collection the fields belong to
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Idea(_) => Collection::Ideas,
            Self::Draft(_) => Collection::Drafts,
        }
    }

    /// Reject missing required fields.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Idea(idea) if idea.title.trim().is_empty() => {
                Err(Error::Validation("idea title cannot be empty".into()))
            }
            Self::Draft(draft) if draft.content.trim().is_empty() => {
                Err(Error::Validation("draft content cannot be empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// Short single-line label for listings
    pub fn headline(&self) -> &str {
        match self {
            Self::Idea(idea) => idea.title.as_str(),
            Self::Draft(draft) => draft.content.lines().next().unwrap_or(""),
        }
    }
}

/// A stored idea or draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub local_id: LocalId,
    pub owner_id: OwnerId,
    pub remote_id: Option<RemoteId>,
    /// Creation time (Unix ms)
    pub created_at: i64,
    /// Last modification time (Unix ms), absent until first edit
    pub updated_at: Option<i64>,
    /// Tombstone flag
    pub deleted: bool,
    /// Tombstone time (Unix ms)
    pub deleted_at: Option<i64>,
    pub sync_state: SyncState,
    pub fields: RecordFields,
}

impl Record {
    /// Collection this record lives in
    pub const fn collection(&self) -> Collection {
        self.fields.collection()
    }

    /// Timestamp used for newest-wins comparisons.
    pub fn effective_updated_at(&self) -> i64 {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Whether the record awaits a push
    pub fn is_pending(&self) -> bool {
        self.sync_state == SyncState::Local
    }

    /// Borrow idea fields, if this is an idea
    pub const fn as_idea(&self) -> Option<&IdeaFields> {
        match &self.fields {
            RecordFields::Idea(idea) => Some(idea),
            RecordFields::Draft(_) => None,
        }
    }

    /// Borrow draft fields, if this is a draft
    pub const fn as_draft(&self) -> Option<&DraftFields> {
        match &self.fields {
            RecordFields::Draft(draft) => Some(draft),
            RecordFields::Idea(_) => None,
        }
    }
}

/// Partial update applied by [`crate::RecordStore::update`].
///
/// When `sync_state` is `None` the update is a user edit: the record is marked
/// `local` and its `updated_at` is bumped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub fields: Option<RecordFields>,
    pub remote_id: Option<RemoteId>,
    pub sync_state: Option<SyncState>,
}

impl RecordPatch {
    /// User edit replacing the domain fields
    pub const fn fields(fields: RecordFields) -> Self {
        Self {
            fields: Some(fields),
            remote_id: None,
            sync_state: None,
        }
    }

    /// Reconciliation after the remote store accepted the record
    pub const fn mark_synced(remote_id: RemoteId) -> Self {
        Self {
            fields: None,
            remote_id: Some(remote_id),
            sync_state: Some(SyncState::Synced),
        }
    }

    /// Whether this patch comes from sync reconciliation rather than a user
    pub const fn is_reconciliation(&self) -> bool {
        self.sync_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_id_rejects_blank() {
        assert!(OwnerId::new("   ").is_err());
        assert_eq!(OwnerId::new(" user-1 ").unwrap().as_str(), "user-1");
    }

    #[test]
    fn remote_id_deserialization_validates() {
        let parsed: std::result::Result<RemoteId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn collection_parses_singular_and_plural() {
        assert_eq!("idea".parse::<Collection>().unwrap(), Collection::Ideas);
        assert_eq!("Drafts".parse::<Collection>().unwrap(), Collection::Drafts);
        assert!("notes".parse::<Collection>().is_err());
    }

    #[test]
    fn validation_requires_title_and_content() {
        assert!(RecordFields::Idea(IdeaFields::titled(" ")).validate().is_err());
        assert!(RecordFields::Draft(DraftFields::new("")).validate().is_err());
        assert!(RecordFields::Idea(IdeaFields::titled("Hook")).validate().is_ok());
    }

    #[test]
    fn idea_fields_use_camel_case_on_the_wire() {
        let idea = IdeaFields {
            title: "T".into(),
            teaching_angle: "angle".into(),
            ..IdeaFields::default()
        };
        let json = serde_json::to_value(&idea).unwrap();
        assert_eq!(json["teachingAngle"], "angle");
    }

    #[test]
    fn effective_updated_at_falls_back_to_created_at() {
        let record = Record {
            local_id: LocalId(1),
            owner_id: OwnerId::new("u").unwrap(),
            remote_id: None,
            created_at: 10,
            updated_at: None,
            deleted: false,
            deleted_at: None,
            sync_state: SyncState::Local,
            fields: RecordFields::Draft(DraftFields::new("x")),
        };
        assert_eq!(record.effective_updated_at(), 10);
    }
}
