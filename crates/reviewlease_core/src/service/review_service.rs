//! Review decision processing.
//!
//! # Responsibility
//! - Apply a reviewer's decision to an item they hold a lease on.
//! - Couple the status change, the history record and the lease release
//!   into one write unit; a decision also takes the item out of the
//!   rereview queue.
//! - Hand decision notices to the notifier once the unit has committed.
//!
//! # Invariants
//! - A decision on an item the reviewer no longer holds is discarded and
//!   mutates nothing.
//! - Field validation failures mutate nothing.
//! - Notifications never fail a committed decision.

use crate::clock::Clock;
use crate::model::decision::{Decision, DecisionValidationError, ReviewAction};
use crate::model::history::HistoryRecord;
use crate::model::item::{Item, ItemId, ReviewerId};
use crate::notify::{DecisionNotice, DecisionNotifier, NoticeTemplate};
use crate::repo::{HistorySink, ItemPool, LeaseStore, RepoError};
use crate::service::lease_manager::LeaseManager;
use log::{debug, info, warn};
use serde_json::json;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Why a decision was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Item has no lease at all (released, decided, or never checked out).
    NoLease,
    /// Another reviewer holds the lease, typically after a theft.
    HeldByOther,
    /// Reviewer holds the item under a newer lease than the one submitted.
    LeaseSuperseded,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoLease => "no_lease",
            Self::HeldByOther => "held_by_other",
            Self::LeaseSuperseded => "lease_superseded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    Applied(HistoryRecord),
    Discarded(DiscardReason),
}

/// Service error for decision processing.
#[derive(Debug)]
pub enum ReviewError {
    /// Field-level problems with the submitted decision.
    Validation(DecisionValidationError),
    /// Persistence-layer failure.
    Repo(RepoError),
}

impl Display for ReviewError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReviewError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ReviewError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DecisionValidationError> for ReviewError {
    fn from(value: DecisionValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Per-decision result of [`ReviewService::commit_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Applied(HistoryRecord),
    Discarded(DiscardReason),
    Invalid(DecisionValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub item_id: ItemId,
    pub result: BatchResult,
}

/// Decision processor sharing the lease manager's store and item pool.
pub struct ReviewService<'m, L, P, C, H, N>
where
    L: LeaseStore,
    P: ItemPool,
    C: Clock,
    H: HistorySink,
    N: DecisionNotifier,
{
    manager: &'m LeaseManager<L, P, C>,
    history: H,
    notifier: N,
}

impl<'m, L, P, C, H, N> ReviewService<'m, L, P, C, H, N>
where
    L: LeaseStore,
    P: ItemPool,
    C: Clock,
    H: HistorySink,
    N: DecisionNotifier,
{
    /// `history` must write through the same connection as the manager's
    /// lease store so decisions commit atomically.
    pub fn new(manager: &'m LeaseManager<L, P, C>, history: H, notifier: N) -> Self {
        Self {
            manager,
            history,
            notifier,
        }
    }

    /// Applies one decision for `reviewer`.
    ///
    /// The lease check comes first: a decision on a lost lease is
    /// discarded even if its fields are also invalid.
    pub fn apply_decision(
        &self,
        reviewer: ReviewerId,
        decision: &Decision,
    ) -> Result<DecisionOutcome, ReviewError> {
        let leases = self.manager.lease_store();
        let committed = leases.in_write_unit(
            || -> Result<Result<(HistoryRecord, Item), DiscardReason>, ReviewError> {
                let item_id = decision.item_id;
                let lease = match leases.get_lease(item_id)? {
                    None => return Ok(Err(DiscardReason::NoLease)),
                    Some(lease) => lease,
                };
                if !lease.is_held_by(reviewer) {
                    return Ok(Err(DiscardReason::HeldByOther));
                }
                if decision
                    .lease_id
                    .is_some_and(|lease_id| lease_id != lease.lease_id)
                {
                    return Ok(Err(DiscardReason::LeaseSuperseded));
                }

                let validated = decision.validate()?;
                let items = self.manager.item_pool();
                let item = items
                    .get_item(item_id)?
                    .ok_or(RepoError::NotFound(item_id))?;

                let now = self.manager.clock().now_ms();
                let new_status = validated.action.resulting_status();
                items.set_status(item_id, new_status, now)?;
                let rereviewed = items.dequeue_rereview(item_id)?;

                let record = HistoryRecord {
                    history_id: Uuid::new_v4(),
                    reviewer_id: reviewer,
                    item_id,
                    action: validated.action,
                    reason: validated.history_reason(),
                    comment: validated.comment.clone(),
                    previous_status: item.status,
                    new_status,
                    created_at: now,
                };
                self.history.append(&record)?;

                if rereviewed {
                    debug!("event=rereview_dequeue module=review status=ok item={item_id}");
                }
                if !leases.delete_if_held(item_id, reviewer)? {
                    return Err(ReviewError::Repo(RepoError::InvalidData(format!(
                        "lease on {item_id} vanished inside decision unit"
                    ))));
                }

                Ok(Ok((record, item)))
            },
        );

        let (record, item) = match committed {
            Ok(Ok(applied)) => applied,
            Ok(Err(reason)) => {
                warn!(
                    "event=decision_apply module=review status=discarded reviewer={reviewer} item={} reason={}",
                    decision.item_id,
                    reason.as_str()
                );
                return Ok(DecisionOutcome::Discarded(reason));
            }
            Err(ReviewError::Validation(err)) => {
                info!(
                    "event=decision_apply module=review status=invalid reviewer={reviewer} item={} fields={}",
                    decision.item_id,
                    err.errors.len()
                );
                return Err(ReviewError::Validation(err));
            }
            Err(err) => {
                warn!(
                    "event=decision_apply module=review status=error reviewer={reviewer} item={}",
                    decision.item_id
                );
                return Err(err);
            }
        };

        info!(
            "event=decision_apply module=review status=ok reviewer={reviewer} item={} action={} new_status={}",
            record.item_id,
            record.action.as_str(),
            record.new_status
        );
        self.notifier.notify(&self.build_notice(&record, &item));
        Ok(DecisionOutcome::Applied(record))
    }

    /// Applies each decision in its own write unit.
    ///
    /// Validation failures and discards are reported per entry; only storage
    /// failures abort the batch, leaving earlier entries committed.
    pub fn commit_batch(
        &self,
        reviewer: ReviewerId,
        decisions: &[Decision],
    ) -> Result<Vec<BatchEntry>, ReviewError> {
        let mut entries = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let result = match self.apply_decision(reviewer, decision) {
                Ok(DecisionOutcome::Applied(record)) => BatchResult::Applied(record),
                Ok(DecisionOutcome::Discarded(reason)) => BatchResult::Discarded(reason),
                Err(ReviewError::Validation(err)) => BatchResult::Invalid(err),
                Err(err) => return Err(err),
            };
            entries.push(BatchEntry {
                item_id: decision.item_id,
                result,
            });
        }
        Ok(entries)
    }

    /// Reviewer's own decisions, newest first.
    pub fn reviewer_history(
        &self,
        reviewer: ReviewerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryRecord>, ReviewError> {
        Ok(self.history.list_by_reviewer(reviewer, limit, offset)?)
    }

    /// Audit trail of one item, newest first.
    pub fn item_history(&self, item_id: ItemId) -> Result<Vec<HistoryRecord>, ReviewError> {
        Ok(self.history.list_by_item(item_id)?)
    }

    fn build_notice(&self, record: &HistoryRecord, item: &Item) -> DecisionNotice {
        let recipients = match record.action {
            ReviewAction::Flag => vec![self.manager.config().senior_reviewer_email.clone()],
            _ => item.owner_emails(),
        };
        DecisionNotice {
            template: NoticeTemplate::for_action(record.action),
            recipients,
            context: json!({
                "item_id": item.uuid.to_string(),
                "item_name": item.name,
                "item_slug": item.slug,
                "item_kind": item.kind.as_str(),
                "reviewer_id": record.reviewer_id.to_string(),
                "reason": record.reason,
                "comment": record.comment,
                "new_status": record.new_status.as_str(),
            }),
        }
    }
}
