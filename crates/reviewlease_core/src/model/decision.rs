//! Review decision input and validation.
//!
//! # Responsibility
//! - Carry a reviewer's per-item decision exactly as it was submitted.
//! - Turn raw submissions into a [`ValidatedDecision`] or field-level errors.
//!
//! # Invariants
//! - `reject` always carries a recognized reject reason.
//! - Every action other than `approve` carries a non-blank comment.
//! - Validation is pure; it never looks at leases or storage.

use crate::model::item::{ItemId, ItemStatus};
use crate::model::lease::LeaseId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Canned history reason recorded for duplicate rejections.
pub const DUPLICATE_REASON: &str = "Duplicate submission";

/// Decision kinds a reviewer can take on a held item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
    Duplicate,
    Flag,
    MoreInfo,
}

impl ReviewAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Duplicate => "duplicate",
            Self::Flag => "flag",
            Self::MoreInfo => "moreinfo",
        }
    }

    /// Parses a submitted action value. Case-sensitive, surrounding
    /// whitespace ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "duplicate" => Some(Self::Duplicate),
            "flag" => Some(Self::Flag),
            "moreinfo" | "more_info" | "request-more-info" => Some(Self::MoreInfo),
            _ => None,
        }
    }

    /// Moderation status the item moves to once the decision commits.
    pub fn resulting_status(self) -> ItemStatus {
        match self {
            Self::Approve => ItemStatus::Public,
            Self::Reject | Self::Duplicate => ItemStatus::Rejected,
            Self::Flag => ItemStatus::Flagged,
            Self::MoreInfo => ItemStatus::Pending,
        }
    }

    pub fn requires_comment(self) -> bool {
        !matches!(self, Self::Approve)
    }

    pub fn requires_reason(self) -> bool {
        matches!(self, Self::Reject)
    }
}

/// Reject reasons offered on the review page, keyed by their form code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Other,
    Sexual,
    Offensive,
    Violence,
    Hate,
    Defamatory,
    Gambling,
    Spam,
    LowQuality,
    HeaderAlignment,
}

const REJECT_REASONS: &[RejectReason] = &[
    RejectReason::Other,
    RejectReason::Sexual,
    RejectReason::Offensive,
    RejectReason::Violence,
    RejectReason::Hate,
    RejectReason::Defamatory,
    RejectReason::Gambling,
    RejectReason::Spam,
    RejectReason::LowQuality,
    RejectReason::HeaderAlignment,
];

impl RejectReason {
    pub fn all() -> &'static [RejectReason] {
        REJECT_REASONS
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::Sexual => 1,
            Self::Offensive => 2,
            Self::Violence => 3,
            Self::Hate => 4,
            Self::Defamatory => 5,
            Self::Gambling => 6,
            Self::Spam => 7,
            Self::LowQuality => 8,
            Self::HeaderAlignment => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        REJECT_REASONS.iter().copied().find(|reason| reason.code() == code)
    }

    /// Parses the submitted form value (the numeric code as text).
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<u8>().ok().and_then(Self::from_code)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Other => "Other rejection reason",
            Self::Sexual => "Sexual or pornographic content",
            Self::Offensive => "Inappropriate or offensive content",
            Self::Violence => "Violence, war, or weaponry images",
            Self::Hate => "Nazi or other hate content",
            Self::Defamatory => "Defamatory content",
            Self::Gambling => "Online gambling",
            Self::Spam => "Spam content",
            Self::LowQuality => "Low-quality, stretched, or blank image",
            Self::HeaderAlignment => "Header image alignment problem",
        }
    }
}

/// Decision as submitted by a reviewer, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub item_id: ItemId,
    pub action: String,
    pub reason: Option<String>,
    pub comment: Option<String>,
    /// Lease the page was rendered for. When present it must still match.
    pub lease_id: Option<LeaseId>,
}

impl Decision {
    pub fn new(item_id: ItemId, action: impl Into<String>) -> Self {
        Self {
            item_id,
            action: action.into(),
            reason: None,
            comment: None,
            lease_id: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn for_lease(mut self, lease_id: LeaseId) -> Self {
        self.lease_id = Some(lease_id);
        self
    }

    /// Validates the raw submission, collecting every field error at once.
    pub fn validate(&self) -> Result<ValidatedDecision, DecisionValidationError> {
        let raw_action = self.action.trim();
        if raw_action.is_empty() {
            return Err(DecisionValidationError::single(
                DecisionField::Action,
                FieldErrorKind::Required,
            ));
        }
        let action = ReviewAction::parse(raw_action).ok_or_else(|| {
            DecisionValidationError::single(
                DecisionField::Action,
                FieldErrorKind::InvalidChoice(raw_action.to_string()),
            )
        })?;

        let mut errors = Vec::new();

        let raw_reason = non_blank(self.reason.as_deref());
        let reason = if action.requires_reason() {
            match raw_reason {
                None => {
                    errors.push(FieldError::new(
                        DecisionField::Reason,
                        FieldErrorKind::Required,
                    ));
                    None
                }
                Some(value) => match RejectReason::parse(value) {
                    Some(reason) => Some(reason),
                    None => {
                        errors.push(FieldError::new(
                            DecisionField::Reason,
                            FieldErrorKind::InvalidChoice(value.to_string()),
                        ));
                        None
                    }
                },
            }
        } else {
            None
        };

        let comment = non_blank(self.comment.as_deref()).map(str::to_string);
        if action.requires_comment() && comment.is_none() {
            errors.push(FieldError::new(
                DecisionField::Comment,
                FieldErrorKind::Required,
            ));
        }

        if !errors.is_empty() {
            return Err(DecisionValidationError { errors });
        }

        Ok(ValidatedDecision {
            item_id: self.item_id,
            action,
            reason,
            comment,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Decision that passed field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDecision {
    pub item_id: ItemId,
    pub action: ReviewAction,
    pub reason: Option<RejectReason>,
    pub comment: Option<String>,
}

impl ValidatedDecision {
    /// Reason text written to the history record.
    pub fn history_reason(&self) -> Option<String> {
        match self.action {
            ReviewAction::Duplicate => Some(DUPLICATE_REASON.to_string()),
            _ => self.reason.map(|reason| reason.label().to_string()),
        }
    }
}

/// Submitted field a validation error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionField {
    Action,
    Reason,
    Comment,
}

impl DecisionField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Reason => "reason",
            Self::Comment => "comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    InvalidChoice(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: DecisionField,
    pub kind: FieldErrorKind,
}

impl FieldError {
    pub fn new(field: DecisionField, kind: FieldErrorKind) -> Self {
        Self { field, kind }
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FieldErrorKind::Required => write!(f, "{}: this field is required", self.field.as_str()),
            FieldErrorKind::InvalidChoice(value) => {
                write!(f, "{}: `{value}` is not a valid choice", self.field.as_str())
            }
        }
    }
}

/// Field-level validation failures of one decision. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionValidationError {
    pub errors: Vec<FieldError>,
}

impl DecisionValidationError {
    fn single(field: DecisionField, kind: FieldErrorKind) -> Self {
        Self {
            errors: vec![FieldError::new(field, kind)],
        }
    }

    pub fn has_error_for(&self, field: DecisionField) -> bool {
        self.errors.iter().any(|error| error.field == field)
    }
}

impl Display for DecisionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        write!(f, "invalid decision: {}", messages.join("; "))
    }
}

impl Error for DecisionValidationError {}
