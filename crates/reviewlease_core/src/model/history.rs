//! Append-only review audit records.

use crate::model::decision::ReviewAction;
use crate::model::item::{ItemId, ItemStatus, ReviewerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type HistoryId = Uuid;

/// One committed decision. Written once, never mutated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub history_id: HistoryId,
    pub reviewer_id: ReviewerId,
    pub item_id: ItemId,
    pub action: ReviewAction,
    pub reason: Option<String>,
    pub comment: Option<String>,
    pub previous_status: ItemStatus,
    pub new_status: ItemStatus,
    /// Epoch ms.
    pub created_at: i64,
}
