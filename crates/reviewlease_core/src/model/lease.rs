//! Review lease domain model.
//!
//! # Responsibility
//! - Represent an exclusive, time-bounded claim of one reviewer on one item.
//! - Name the review queues a lease can be drawn from.
//!
//! # Invariants
//! - At most one lease exists per `item_id` at any instant.
//! - A lease with `expiry <= now` is stale: eligible for theft, but still the
//!   holder's until somebody actually steals it.
//! - `lease_id` changes on creation and theft, never on renewal.

use crate::model::item::{ItemId, ItemStatus, ReviewerId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one lease acquisition.
pub type LeaseId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub item_id: ItemId,
    pub lease_id: LeaseId,
    pub holder_id: ReviewerId,
    /// Epoch ms after which the lease may be stolen.
    pub expiry: i64,
    /// Epoch ms of the acquisition (creation or theft) that minted `lease_id`.
    pub acquired_at: i64,
}

impl Lease {
    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.expiry <= now_ms
    }

    pub fn is_held_by(&self, reviewer: ReviewerId) -> bool {
        self.holder_id == reviewer
    }

    /// Milliseconds until the lease becomes stale, zero once it is.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expiry - now_ms).max(0)
    }
}

/// Pool of items a reviewer draws work from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewQueue {
    /// Regular queue of pending submissions.
    Pending,
    /// Senior-reviewer queue of flagged submissions.
    Flagged,
    /// Re-uploaded items, selected by queue membership whatever their status.
    Rereview,
}

impl ReviewQueue {
    /// Item status that puts an item into this queue, `None` for the
    /// membership-based rereview queue.
    pub fn status(self) -> Option<ItemStatus> {
        match self {
            Self::Pending => Some(ItemStatus::Pending),
            Self::Flagged => Some(ItemStatus::Flagged),
            Self::Rereview => None,
        }
    }

    /// Status-based queue an item in `status` belongs to.
    pub fn for_status(status: ItemStatus) -> Option<Self> {
        match status {
            ItemStatus::Pending => Some(Self::Pending),
            ItemStatus::Flagged => Some(Self::Flagged),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Flagged => "flagged",
            Self::Rereview => "rereview",
        }
    }
}
