//! Review lease manager core.
//!
//! Hands reviewers exclusive, time-bounded leases on moderation items,
//! reclaims abandoned work lazily, and couples decisions to lease ownership.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, LeaseConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::decision::{
    Decision, DecisionField, DecisionValidationError, FieldError, FieldErrorKind, RejectReason,
    ReviewAction,
};
pub use model::history::HistoryRecord;
pub use model::item::{Item, ItemId, ItemKind, ItemOwner, ItemStatus, ReviewerId};
pub use model::lease::{Lease, LeaseId, ReviewQueue};
pub use notify::{DecisionNotice, DecisionNotifier, LogNotifier, MemoryNotifier, NoticeTemplate};
pub use repo::{
    HistorySink, ItemPool, LeaseGrant, LeaseStore, OwnStaleLeases, PoolFilter, RepoError,
    RepoResult, SqliteHistoryRepository, SqliteItemRepository, SqliteLeaseStore,
};
pub use service::lease_manager::{LeaseError, LeaseManager, SingleCheckout, SingleRefusal, TopUp};
pub use service::queue_service::{
    MoreStatus, MoreWork, QueueCounts, QueueEntry, QueuePage, QueueService,
};
pub use service::review_service::{
    BatchEntry, BatchResult, DecisionOutcome, DiscardReason, ReviewError, ReviewService,
};

/// Minimal health-check API for embedding callers.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
