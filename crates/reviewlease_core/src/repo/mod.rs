//! Repository layer: lease store, item pool and history sink.
//!
//! # Responsibility
//! - Define storage contracts the lease manager and review processor use.
//! - Isolate SQLite query details from allocation policy.
//!
//! # Invariants
//! - Repositories sharing one connection share one write unit; anything
//!   executed inside [`LeaseStore::in_write_unit`] commits or rolls back
//!   together.
//! - Repository APIs return semantic errors (`NotFound`, `InvalidData`) in
//!   addition to DB transport errors.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::item::{ItemId, ItemValidationError};
use crate::model::lease::ReviewQueue;
use log::debug;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod history_repo;
pub mod item_repo;
pub mod lease_repo;

pub use history_repo::{HistorySink, SqliteHistoryRepository};
pub use item_repo::{ItemPool, PoolFilter, SqliteItemRepository};
pub use lease_repo::{LeaseGrant, LeaseStore, OwnStaleLeases, SqliteLeaseStore};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error shared by every review repository.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    /// Target item does not exist.
    NotFound(ItemId),
    Validation(ItemValidationError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "item not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "review repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted review data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::NotFound(_) | Self::UninitializedConnection { .. } | Self::InvalidData(_) => {
                None
            }
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<ItemValidationError> for RepoError {
    fn from(value: ItemValidationError) -> Self {
        Self::Validation(value)
    }
}

/// Rejects connections that did not go through `open_db*`.
pub(crate) fn ensure_schema_ready(conn: &Connection) -> RepoResult<()> {
    let actual_version = current_user_version(conn)?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }
    Ok(())
}

/// Runs `work` under SQLite's write lock.
///
/// Opens a `BEGIN IMMEDIATE` transaction when the connection is in
/// autocommit mode; otherwise joins the transaction already in progress so
/// composed operations stay one unit. Errors roll the unit back.
pub(crate) fn write_unit<T, E, F>(conn: &Connection, work: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<RepoError>,
{
    if !conn.is_autocommit() {
        return work();
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|err| E::from(RepoError::from(err)))?;
    match work() {
        Ok(value) => {
            tx.commit().map_err(|err| E::from(RepoError::from(err)))?;
            Ok(value)
        }
        Err(err) => {
            debug!("event=write_unit module=repo status=rollback");
            drop(tx);
            Err(err)
        }
    }
}

/// SQL predicate selecting items of `queue`; the items table must be
/// aliased `i`.
pub(crate) fn queue_condition(queue: ReviewQueue) -> &'static str {
    match queue {
        ReviewQueue::Pending => "i.status = 'pending'",
        ReviewQueue::Flagged => "i.status = 'flagged'",
        ReviewQueue::Rereview => {
            "EXISTS (SELECT 1 FROM rereview_queue r WHERE r.item_uuid = i.uuid)"
        }
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn limit_to_sql(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
