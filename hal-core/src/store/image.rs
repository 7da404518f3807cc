//! Golden image bookkeeping
//!
//! Image building itself happens outside this process; the store only
//! remembers which provider snapshots exist so slots can reference them.

use serde::{Deserialize, Serialize};

/// A provider snapshot usable as a slot's source image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Provider-assigned snapshot id
    pub id: String,
    /// Slot/provider this snapshot belongs to
    pub provider: String,
    pub label: String,
    pub status: String,
    /// Unix millis
    pub created_at: i64,
}

/// Fields for registering an image
#[derive(Debug, Clone)]
pub struct NewImage {
    pub id: String,
    pub provider: String,
    pub label: String,
    pub status: String,
}
