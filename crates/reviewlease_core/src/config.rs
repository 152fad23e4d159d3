//! Lease allocation settings.
//!
//! # Responsibility
//! - Hold the quotas, lease TTL and notification routing used by services.
//! - Parse settings from JSON with every field defaulted.
//!
//! # Invariants
//! - `0 < initial_quota <= max_quota`.
//! - `lease_ttl_minutes > 0`.
//! - `senior_reviewer_email` is a non-blank address.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Items checked out when a reviewer opens their queue.
pub const DEFAULT_INITIAL_QUOTA: u32 = 5;
/// Hard cap on items one reviewer may hold in one queue.
pub const DEFAULT_MAX_QUOTA: u32 = 20;
/// Minutes a checkout or renewal keeps an item exclusive.
pub const DEFAULT_LEASE_TTL_MINUTES: u32 = 30;
/// Recipient of flag notifications.
pub const DEFAULT_SENIOR_REVIEWER_EMAIL: &str = "senior-theme-reviewers@mozilla.org";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseConfig {
    pub initial_quota: u32,
    pub max_quota: u32,
    pub lease_ttl_minutes: u32,
    /// Lets reviewers lease items they own themselves.
    pub allow_self_review: bool,
    pub senior_reviewer_email: String,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            initial_quota: DEFAULT_INITIAL_QUOTA,
            max_quota: DEFAULT_MAX_QUOTA,
            lease_ttl_minutes: DEFAULT_LEASE_TTL_MINUTES,
            allow_self_review: false,
            senior_reviewer_email: DEFAULT_SENIOR_REVIEWER_EMAIL.to_string(),
        }
    }
}

impl LeaseConfig {
    /// Parses and validates settings from a JSON object.
    ///
    /// Missing keys fall back to defaults; unknown keys are rejected.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_quota == 0 {
            return Err(ConfigError::ZeroQuota("initial_quota"));
        }
        if self.max_quota == 0 {
            return Err(ConfigError::ZeroQuota("max_quota"));
        }
        if self.initial_quota > self.max_quota {
            return Err(ConfigError::InitialAboveMax {
                initial_quota: self.initial_quota,
                max_quota: self.max_quota,
            });
        }
        if self.lease_ttl_minutes == 0 {
            return Err(ConfigError::ZeroLeaseTtl);
        }
        let email = self.senior_reviewer_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ConfigError::InvalidSeniorReviewerEmail(
                self.senior_reviewer_email.clone(),
            ));
        }
        Ok(())
    }

    pub fn lease_ttl_ms(&self) -> i64 {
        i64::from(self.lease_ttl_minutes) * 60_000
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Parse(String),
    ZeroQuota(&'static str),
    InitialAboveMax { initial_quota: u32, max_quota: u32 },
    ZeroLeaseTtl,
    InvalidSeniorReviewerEmail(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "invalid lease config: {message}"),
            Self::ZeroQuota(field) => write!(f, "`{field}` must be greater than zero"),
            Self::InitialAboveMax {
                initial_quota,
                max_quota,
            } => write!(
                f,
                "`initial_quota` ({initial_quota}) must not exceed `max_quota` ({max_quota})"
            ),
            Self::ZeroLeaseTtl => write!(f, "`lease_ttl_minutes` must be greater than zero"),
            Self::InvalidSeniorReviewerEmail(value) => {
                write!(f, "`senior_reviewer_email` is not an address: `{value}`")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, LeaseConfig, DEFAULT_INITIAL_QUOTA, DEFAULT_MAX_QUOTA};

    #[test]
    fn defaults_are_valid() {
        let config = LeaseConfig::default();
        config.validate().expect("defaults validate");
        assert_eq!(config.initial_quota, DEFAULT_INITIAL_QUOTA);
        assert_eq!(config.max_quota, DEFAULT_MAX_QUOTA);
        assert_eq!(config.lease_ttl_ms(), 30 * 60_000);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config = LeaseConfig::from_json_str(r#"{"initial_quota": 2, "allow_self_review": true}"#)
            .expect("partial config parses");
        assert_eq!(config.initial_quota, 2);
        assert_eq!(config.max_quota, DEFAULT_MAX_QUOTA);
        assert!(config.allow_self_review);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_quotas() {
        let err = LeaseConfig::from_json_str(r#"{"initial_locks": 2}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = LeaseConfig::from_json_str(r#"{"initial_quota": 30, "max_quota": 20}"#)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InitialAboveMax {
                initial_quota: 30,
                max_quota: 20
            }
        );

        let err = LeaseConfig::from_json_str(r#"{"lease_ttl_minutes": 0}"#).unwrap_err();
        assert_eq!(err, ConfigError::ZeroLeaseTtl);

        let err = LeaseConfig::from_json_str(r#"{"senior_reviewer_email": " "}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSeniorReviewerEmail(_)));
    }
}
