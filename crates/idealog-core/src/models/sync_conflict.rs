//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::{Collection, LocalId, OwnerId, RemoteId};

/// Conflict flagged by a merge and recorded in the conflict log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    pub owner_id: OwnerId,
    pub collection: Collection,
    /// Local record involved in the conflict
    pub local_id: LocalId,
    pub remote_id: RemoteId,
    /// Local timestamp when the conflict was detected
    pub local_updated_at: i64,
    /// Remote timestamp when the conflict was detected
    pub remote_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Policy that decided the winner (`remote-wins` or `local-wins`)
    pub policy: String,
}
