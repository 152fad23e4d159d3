//! Decision notification collaborator.
//!
//! # Responsibility
//! - Describe which mail template goes to whom after a committed decision.
//! - Hand notices to a delivery backend without waiting on the outcome.
//!
//! # Invariants
//! - Notifiers never fail the decision that triggered them.
//! - Flag notices go to the senior reviewer address, never to owners.

use crate::model::decision::ReviewAction;
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Mail template selected by the decision kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeTemplate {
    Approve,
    Reject,
    Duplicate,
    Flag,
    MoreInfo,
}

impl NoticeTemplate {
    pub fn for_action(action: ReviewAction) -> Self {
        match action {
            ReviewAction::Approve => Self::Approve,
            ReviewAction::Reject => Self::Reject,
            ReviewAction::Duplicate => Self::Duplicate,
            ReviewAction::Flag => Self::Flag,
            ReviewAction::MoreInfo => Self::MoreInfo,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Duplicate => "duplicate",
            Self::Flag => "flag",
            Self::MoreInfo => "moreinfo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNotice {
    pub template: NoticeTemplate,
    pub recipients: Vec<String>,
    /// Template variables (item name, slug, reason, comment, reviewer).
    pub context: serde_json::Value,
}

/// Fire-and-forget delivery of decision notices.
pub trait DecisionNotifier {
    fn notify(&self, notice: &DecisionNotice);
}

impl<N: DecisionNotifier + ?Sized> DecisionNotifier for &N {
    fn notify(&self, notice: &DecisionNotice) {
        (**self).notify(notice)
    }
}

/// Notifier that only records metadata in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl DecisionNotifier for LogNotifier {
    fn notify(&self, notice: &DecisionNotice) {
        info!(
            "event=decision_notice module=notify status=queued template={} recipients={}",
            notice.template.as_str(),
            notice.recipients.len()
        );
    }
}

/// Notifier that keeps every notice in memory, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<DecisionNotice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of notices received so far.
    pub fn sent(&self) -> Vec<DecisionNotice> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DecisionNotifier for MemoryNotifier {
    fn notify(&self, notice: &DecisionNotice) {
        let mut sent = match self.sent.lock() {
            Ok(sent) => sent,
            Err(poisoned) => poisoned.into_inner(),
        };
        sent.push(notice.clone());
    }
}
