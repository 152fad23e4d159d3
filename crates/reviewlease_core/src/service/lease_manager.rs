//! Lease allocation: top-off checkout, single checkout, release and top-up.
//!
//! # Responsibility
//! - Decide which items a reviewer holds and for how long.
//! - Reclaim abandoned work lazily by stealing stale leases.
//!
//! # Invariants
//! - Every operation that writes runs inside one store write unit, and each
//!   per-item acquisition is itself a conditional write. Two concurrent
//!   checkouts never both win an item.
//! - Renewal only moves expiry forward and keeps the lease id.
//! - Acquisition order is deterministic: free items by
//!   `submitted_at ASC, uuid ASC`, then stale leases (own first, oldest
//!   expiry first). Top-up never re-acquires the reviewer's own stale leases.
//! - A checkout never returns stale leases and never more than the desired
//!   count unless the reviewer already holds more live ones.

use crate::clock::Clock;
use crate::config::{ConfigError, LeaseConfig};
use crate::model::item::{Item, ItemId, ItemStatus, ReviewerId};
use crate::model::lease::{Lease, ReviewQueue};
use crate::repo::{ItemPool, LeaseGrant, LeaseStore, OwnStaleLeases, PoolFilter, RepoError};
use log::{debug, info};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Service error for lease operations.
#[derive(Debug)]
pub enum LeaseError {
    /// Target item does not exist.
    NotFound(ItemId),
    /// Persistence-layer failure.
    Repo(RepoError),
    /// A conditional write lost inside a unit that should have excluded it.
    InconsistentState(&'static str),
}

impl Display for LeaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(item_id) => write!(f, "item not found: {item_id}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent lease state: {details}"),
        }
    }
}

impl Error for LeaseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for LeaseError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(item_id) => Self::NotFound(item_id),
            other => Self::Repo(other),
        }
    }
}

/// Why a single checkout did not hand out a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleRefusal {
    /// Item is neither in a reviewable status nor queued for rereview.
    NotReviewable(ItemStatus),
    /// Reviewer co-owns the item and self-review is disallowed.
    OwnSubmission,
    /// Another reviewer holds an unexpired lease.
    LeasedBy { holder_id: ReviewerId, expiry: i64 },
}

/// Result of checking out one specific item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleCheckout {
    pub item: Item,
    /// Reviewer's lease after the call, when reviewable.
    pub lease: Option<Lease>,
    pub reviewable: bool,
    pub refusal: Option<SingleRefusal>,
}

impl SingleCheckout {
    fn granted(item: Item, lease: Lease) -> Self {
        Self {
            item,
            lease: Some(lease),
            reviewable: true,
            refusal: None,
        }
    }

    fn refused(item: Item, refusal: SingleRefusal) -> Self {
        Self {
            item,
            lease: None,
            reviewable: false,
            refusal: Some(refusal),
        }
    }
}

/// Result of asking for more work on top of what a reviewer holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopUp {
    /// Newly acquired leases; empty when the queue has nothing left.
    Acquired(Vec<Lease>),
    /// Reviewer already holds the absolute maximum.
    QuotaReached,
}

/// Lease allocation facade over a lease store, an item pool and a clock.
pub struct LeaseManager<L: LeaseStore, P: ItemPool, C: Clock> {
    leases: L,
    items: P,
    clock: C,
    config: LeaseConfig,
}

impl<L: LeaseStore, P: ItemPool, C: Clock> LeaseManager<L, P, C> {
    /// Creates a manager after validating `config`.
    pub fn new(leases: L, items: P, clock: C, config: LeaseConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            leases,
            items,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    pub fn lease_store(&self) -> &L {
        &self.leases
    }

    pub fn item_pool(&self) -> &P {
        &self.items
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Top-off checkout on the pending queue.
    pub fn checkout(
        &self,
        reviewer: ReviewerId,
        desired_count: usize,
    ) -> Result<Vec<Lease>, LeaseError> {
        self.checkout_queue(reviewer, ReviewQueue::Pending, desired_count)
    }

    /// Tops the reviewer's unexpired leases in `queue` up to `desired_count`.
    ///
    /// When the reviewer already holds enough unexpired leases, those are
    /// renewed and returned; their own stale leases stay stale and are left
    /// out. Otherwise the shortfall is filled from free items, then from
    /// stale leases.
    pub fn checkout_queue(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
        desired_count: usize,
    ) -> Result<Vec<Lease>, LeaseError> {
        let leases = self.leases.in_write_unit(|| -> Result<Vec<Lease>, LeaseError> {
            let now = self.clock.now_ms();
            let current = self.live_leases(reviewer, queue, now)?;

            if current.len() >= desired_count {
                let renewed = self.leases.renew_all_held(
                    reviewer,
                    queue,
                    now + self.config.lease_ttl_ms(),
                    now,
                )?;
                debug!(
                    "event=lease_renew module=lease_manager status=ok queue={} renewed={renewed}",
                    queue.as_str()
                );
                return Ok(self.live_leases(reviewer, queue, now)?);
            }

            let shortfall = desired_count - current.len();
            let acquired =
                self.acquire(reviewer, queue, OwnStaleLeases::First, shortfall, now)?;
            let mut leases = current;
            leases.extend(acquired);
            Ok(leases)
        })?;

        info!(
            "event=lease_checkout module=lease_manager status=ok reviewer={reviewer} queue={} desired={desired_count} held={}",
            queue.as_str(),
            leases.len()
        );
        Ok(leases)
    }

    /// Checks out one specific item for `reviewer`.
    ///
    /// Rules in order: unknown item errors; an item outside every queue, own
    /// submission and an unexpired foreign lease refuse; an expired foreign
    /// lease is stolen; the reviewer's own lease is renewed; a free item is
    /// leased.
    pub fn checkout_single(
        &self,
        reviewer: ReviewerId,
        item_id: ItemId,
    ) -> Result<SingleCheckout, LeaseError> {
        let checkout = self.leases.in_write_unit(|| -> Result<SingleCheckout, LeaseError> {
            let item = self
                .items
                .get_item(item_id)?
                .ok_or(LeaseError::NotFound(item_id))?;
            let queue = match ReviewQueue::for_status(item.status) {
                Some(queue) => queue,
                None if self.items.is_queued_for_rereview(item_id)? => ReviewQueue::Rereview,
                None => {
                    let status = item.status;
                    return Ok(SingleCheckout::refused(
                        item,
                        SingleRefusal::NotReviewable(status),
                    ));
                }
            };
            if !self.config.allow_self_review && item.is_owned_by(reviewer) {
                return Ok(SingleCheckout::refused(item, SingleRefusal::OwnSubmission));
            }

            let now = self.clock.now_ms();
            match self.leases.get_lease(item_id)? {
                Some(lease) if lease.is_held_by(reviewer) => {
                    let lease = self
                        .leases
                        .renew_if_held(item_id, reviewer, now + self.config.lease_ttl_ms())?
                        .ok_or(LeaseError::InconsistentState("held lease vanished on renew"))?;
                    Ok(SingleCheckout::granted(item, lease))
                }
                Some(lease) if !lease.is_stale(now) => Ok(SingleCheckout::refused(
                    item,
                    SingleRefusal::LeasedBy {
                        holder_id: lease.holder_id,
                        expiry: lease.expiry,
                    },
                )),
                Some(lease) => {
                    let stolen = self
                        .leases
                        .steal_if_stale(item_id, self.grant(reviewer, now))?
                        .ok_or(LeaseError::InconsistentState("stale lease not stealable"))?;
                    debug!(
                        "event=lease_steal module=lease_manager status=ok item={item_id} previous_holder={}",
                        lease.holder_id
                    );
                    Ok(SingleCheckout::granted(item, stolen))
                }
                None => {
                    let lease = self
                        .leases
                        .insert_if_free(item_id, queue, self.grant(reviewer, now))?
                        .ok_or(LeaseError::InconsistentState("free item not leasable"))?;
                    Ok(SingleCheckout::granted(item, lease))
                }
            }
        })?;

        info!(
            "event=lease_checkout_single module=lease_manager status={} reviewer={reviewer} item={item_id}",
            if checkout.reviewable { "ok" } else { "refused" }
        );
        Ok(checkout)
    }

    /// Gives up `reviewer`'s lease on `item_id`. Returns `false` when the
    /// reviewer did not hold it.
    pub fn release(&self, reviewer: ReviewerId, item_id: ItemId) -> Result<bool, LeaseError> {
        let released = self
            .leases
            .in_write_unit(|| -> Result<bool, LeaseError> {
                Ok(self.leases.delete_if_held(item_id, reviewer)?)
            })?;
        info!(
            "event=lease_release module=lease_manager status={} reviewer={reviewer} item={item_id}",
            if released { "ok" } else { "noop" }
        );
        Ok(released)
    }

    /// Acquires up to one more initial quota of work, never beyond
    /// `absolute_max` held items. Only free items and other reviewers' stale
    /// leases count as more work.
    pub fn top_up(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
        current_held_count: usize,
        absolute_max: usize,
    ) -> Result<TopUp, LeaseError> {
        if current_held_count >= absolute_max {
            info!(
                "event=lease_top_up module=lease_manager status=quota_reached reviewer={reviewer} queue={} held={current_held_count}",
                queue.as_str()
            );
            return Ok(TopUp::QuotaReached);
        }

        let increment = self.config.initial_quota as usize;
        let shortfall = increment.min(absolute_max - current_held_count);
        let acquired = self.leases.in_write_unit(|| -> Result<Vec<Lease>, LeaseError> {
            let now = self.clock.now_ms();
            Ok(self.acquire(reviewer, queue, OwnStaleLeases::Skip, shortfall, now)?)
        })?;

        info!(
            "event=lease_top_up module=lease_manager status=ok reviewer={reviewer} queue={} requested={shortfall} acquired={}",
            queue.as_str(),
            acquired.len()
        );
        Ok(TopUp::Acquired(acquired))
    }

    /// Every lease `reviewer` holds in `queue`, own stale ones included.
    pub fn held_leases(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
    ) -> Result<Vec<Lease>, LeaseError> {
        Ok(self.leases.leases_held_by(reviewer, queue)?)
    }

    pub fn lease_for(&self, item_id: ItemId) -> Result<Option<Lease>, LeaseError> {
        Ok(self.leases.get_lease(item_id)?)
    }

    fn live_leases(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
        now: i64,
    ) -> Result<Vec<Lease>, RepoError> {
        let mut held = self.leases.leases_held_by(reviewer, queue)?;
        held.retain(|lease| !lease.is_stale(now));
        Ok(held)
    }

    /// Free pool first, then stale leases. Must run inside a write unit.
    fn acquire(
        &self,
        reviewer: ReviewerId,
        queue: ReviewQueue,
        own: OwnStaleLeases,
        count: usize,
        now: i64,
    ) -> Result<Vec<Lease>, RepoError> {
        let filter = self.pool_filter(reviewer, queue);
        let mut acquired = Vec::with_capacity(count);

        for item in self.items.free_items(&filter, count)? {
            if let Some(lease) =
                self.leases
                    .insert_if_free(item.uuid, queue, self.grant(reviewer, now))?
            {
                acquired.push(lease);
            }
        }

        let shortfall = count - acquired.len();
        if shortfall > 0 {
            for stale in self.leases.stale_leases(&filter, reviewer, own, now, shortfall)? {
                if let Some(lease) = self
                    .leases
                    .steal_if_stale(stale.item_id, self.grant(reviewer, now))?
                {
                    debug!(
                        "event=lease_steal module=lease_manager status=ok item={} previous_holder={}",
                        stale.item_id, stale.holder_id
                    );
                    acquired.push(lease);
                }
            }
        }
        Ok(acquired)
    }

    fn pool_filter(&self, reviewer: ReviewerId, queue: ReviewQueue) -> PoolFilter {
        let filter = PoolFilter::new(queue);
        if self.config.allow_self_review {
            filter
        } else {
            filter.excluding_owner(reviewer)
        }
    }

    fn grant(&self, reviewer: ReviewerId, now: i64) -> LeaseGrant {
        LeaseGrant {
            holder_id: reviewer,
            lease_id: Uuid::new_v4(),
            acquired_at: now,
            expiry: now + self.config.lease_ttl_ms(),
        }
    }
}
