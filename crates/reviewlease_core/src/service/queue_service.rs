//! Queue presentation: what a reviewer sees when opening or extending a queue.
//!
//! # Responsibility
//! - Size checkouts from configured quotas.
//! - Join leases with their items for display.
//!
//! # Invariants
//! - `more` never lets a reviewer hold more than `max_quota` leases in one
//!   queue: counting and topping up share one write unit.
//! - `more` only reports items the reviewer did not already hold, and its
//!   `held_count` is read back from the store.

use crate::clock::Clock;
use crate::model::item::{Item, ItemId, ReviewerId};
use crate::model::lease::{Lease, ReviewQueue};
use crate::repo::{ItemPool, LeaseStore};
use crate::service::lease_manager::{LeaseError, LeaseManager, SingleCheckout, TopUp};
use log::{debug, info};

/// One leased item as shown on a queue page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub item: Item,
    pub lease: Lease,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuePage {
    pub queue: ReviewQueue,
    pub entries: Vec<QueueEntry>,
    pub max_quota: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoreStatus {
    Added,
    /// Nothing left to hand out in the queue.
    PoolEmpty,
    /// Reviewer already holds the maximum.
    QuotaReached,
}

impl MoreStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::PoolEmpty => "pool_empty",
            Self::QuotaReached => "quota_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoreWork {
    pub status: MoreStatus,
    /// Newly acquired items only.
    pub entries: Vec<QueueEntry>,
    /// Leases held in the queue after the call.
    pub held_count: usize,
}

/// Items waiting per queue, leased or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: u64,
    pub flagged: u64,
    pub rereview: u64,
}

pub struct QueueService<'m, L: LeaseStore, P: ItemPool, C: Clock> {
    manager: &'m LeaseManager<L, P, C>,
}

impl<'m, L: LeaseStore, P: ItemPool, C: Clock> QueueService<'m, L, P, C> {
    pub fn new(manager: &'m LeaseManager<L, P, C>) -> Self {
        Self { manager }
    }

    /// Opens `queue` for `reviewer`, topping their leases off to the
    /// initial quota.
    pub fn queue_page(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
    ) -> Result<QueuePage, LeaseError> {
        let config = self.manager.config();
        let leases =
            self.manager
                .checkout_queue(reviewer, queue, config.initial_quota as usize)?;
        Ok(QueuePage {
            queue,
            entries: self.join_items(leases)?,
            max_quota: config.max_quota,
        })
    }

    /// Asks for another batch of work, bounded by the maximum quota.
    pub fn more(&self, reviewer: ReviewerId, queue: ReviewQueue) -> Result<MoreWork, LeaseError> {
        let max_quota = self.manager.config().max_quota as usize;
        let (top_up, held_count) = self.manager.lease_store().in_write_unit(
            || -> Result<(TopUp, usize), LeaseError> {
                let held = self.manager.held_leases(reviewer, queue)?.len();
                let top_up = self.manager.top_up(reviewer, queue, held, max_quota)?;
                let held_after = self.manager.held_leases(reviewer, queue)?.len();
                Ok((top_up, held_after))
            },
        )?;

        let work = match top_up {
            TopUp::QuotaReached => MoreWork {
                status: MoreStatus::QuotaReached,
                entries: Vec::new(),
                held_count,
            },
            TopUp::Acquired(leases) if leases.is_empty() => MoreWork {
                status: MoreStatus::PoolEmpty,
                entries: Vec::new(),
                held_count,
            },
            TopUp::Acquired(leases) => MoreWork {
                status: MoreStatus::Added,
                entries: self.join_items(leases)?,
                held_count,
            },
        };

        info!(
            "event=queue_more module=queue status={} reviewer={reviewer} queue={} held={}",
            work.status.as_str(),
            queue.as_str(),
            work.held_count
        );
        Ok(work)
    }

    /// Opens one specific item for review.
    pub fn single(&self, reviewer: ReviewerId, item_id: ItemId) -> Result<SingleCheckout, LeaseError> {
        self.manager.checkout_single(reviewer, item_id)
    }

    pub fn queue_counts(&self) -> Result<QueueCounts, LeaseError> {
        let items = self.manager.item_pool();
        Ok(QueueCounts {
            pending: items.count_in_queue(ReviewQueue::Pending)?,
            flagged: items.count_in_queue(ReviewQueue::Flagged)?,
            rereview: items.count_in_queue(ReviewQueue::Rereview)?,
        })
    }

    fn join_items(&self, leases: Vec<Lease>) -> Result<Vec<QueueEntry>, LeaseError> {
        let items = self.manager.item_pool();
        let mut entries = Vec::with_capacity(leases.len());
        for lease in leases {
            match items.get_item(lease.item_id)? {
                Some(item) => entries.push(QueueEntry { item, lease }),
                None => debug!(
                    "event=queue_join module=queue status=skipped item={}",
                    lease.item_id
                ),
            }
        }
        Ok(entries)
    }
}
