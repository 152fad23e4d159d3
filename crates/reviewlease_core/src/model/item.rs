//! Review item domain model.
//!
//! # Responsibility
//! - Describe one unit of review work (theme or persona submission).
//! - Own the moderation status vocabulary and its pool eligibility rules.
//!
//! # Invariants
//! - `uuid` is stable and never reused for another item.
//! - `slug` is lowercase ASCII, starts with an alphanumeric character and
//!   only contains `[a-z0-9-]`.
//! - Moderation status never doubles as a lock; see `model::lease`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a review item.
pub type ItemId = Uuid;

/// Stable identifier of a reviewer (or any user account).
pub type ReviewerId = Uuid;

static SLUG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("valid slug regex"));

/// Submission flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Theme,
    Persona,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Theme => "theme",
            Self::Persona => "persona",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "theme" => Some(Self::Theme),
            "persona" => Some(Self::Persona),
            _ => None,
        }
    }
}

/// Moderation status of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Created upstream but not yet submitted for review.
    Unreviewed,
    /// Waiting in the regular review queue.
    Pending,
    /// Escalated to senior reviewers.
    Flagged,
    /// Approved and publicly visible.
    Public,
    /// Rejected (including duplicates).
    Rejected,
    /// Blocked by an administrator.
    Blocked,
}

impl ItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unreviewed => "unreviewed",
            Self::Pending => "pending",
            Self::Flagged => "flagged",
            Self::Public => "public",
            Self::Rejected => "rejected",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unreviewed" => Some(Self::Unreviewed),
            "pending" => Some(Self::Pending),
            "flagged" => Some(Self::Flagged),
            "public" => Some(Self::Public),
            "rejected" => Some(Self::Rejected),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Whether an item in this status may be leased for review.
    pub fn is_reviewable(self) -> bool {
        matches!(self, Self::Pending | Self::Flagged)
    }

    /// Whether a moderation decision has already been made for good.
    pub fn is_finalized(self) -> bool {
        matches!(self, Self::Public | Self::Rejected | Self::Blocked)
    }
}

impl Display for ItemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account that submitted (co-owns) an item. Receives decision mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOwner {
    pub user_id: ReviewerId,
    pub email: String,
}

/// One unit of review work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub uuid: ItemId,
    pub slug: String,
    pub name: String,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub owners: Vec<ItemOwner>,
    /// Epoch ms. Oldest submissions leave the free pool first.
    pub submitted_at: i64,
}

impl Item {
    /// Creates a pending item with a generated ID and no owners.
    pub fn new(
        kind: ItemKind,
        slug: impl Into<String>,
        name: impl Into<String>,
        submitted_at: i64,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            slug: slug.into(),
            name: name.into(),
            kind,
            status: ItemStatus::Pending,
            owners: Vec::new(),
            submitted_at,
        }
    }

    /// Adds an owner, returning the item for chaining.
    pub fn with_owner(mut self, user_id: ReviewerId, email: impl Into<String>) -> Self {
        self.owners.push(ItemOwner {
            user_id,
            email: email.into(),
        });
        self
    }

    pub fn is_owned_by(&self, user_id: ReviewerId) -> bool {
        self.owners.iter().any(|owner| owner.user_id == user_id)
    }

    pub fn owner_emails(&self) -> Vec<String> {
        self.owners.iter().map(|owner| owner.email.clone()).collect()
    }

    /// Checks record-level invariants before persistence.
    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if !SLUG_RE.is_match(&self.slug) {
            return Err(ItemValidationError::InvalidSlug(self.slug.clone()));
        }
        if self.name.trim().is_empty() {
            return Err(ItemValidationError::BlankName);
        }
        if let Some(owner) = self.owners.iter().find(|owner| !owner.email.contains('@')) {
            return Err(ItemValidationError::InvalidOwnerEmail(owner.email.clone()));
        }
        Ok(())
    }
}

/// Record-level validation failures for [`Item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValidationError {
    InvalidSlug(String),
    BlankName,
    InvalidOwnerEmail(String),
}

impl Display for ItemValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSlug(slug) => write!(f, "invalid item slug `{slug}`"),
            Self::BlankName => write!(f, "item name must not be blank"),
            Self::InvalidOwnerEmail(email) => write!(f, "invalid owner email `{email}`"),
        }
    }
}

impl Error for ItemValidationError {}
