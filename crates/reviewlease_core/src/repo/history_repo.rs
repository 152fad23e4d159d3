//! Append-only review history storage.
//!
//! # Invariants
//! - Rows are never updated or deleted; schema triggers abort both.
//! - Listings are newest first: `created_at DESC`, then insertion order.

use super::{ensure_schema_ready, limit_to_sql, parse_uuid, RepoError, RepoResult};
use crate::model::decision::ReviewAction;
use crate::model::history::HistoryRecord;
use crate::model::item::{ItemId, ItemStatus, ReviewerId};
use rusqlite::{params, Connection, Row};

const HISTORY_SELECT_SQL: &str = "SELECT
    history_uuid,
    reviewer_uuid,
    item_uuid,
    action,
    reason,
    comment,
    previous_status,
    new_status,
    created_at
FROM review_history";

/// Audit sink for committed decisions.
pub trait HistorySink {
    fn append(&self, record: &HistoryRecord) -> RepoResult<()>;
    fn list_by_reviewer(
        &self,
        reviewer: ReviewerId,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<HistoryRecord>>;
    fn list_by_item(&self, item_id: ItemId) -> RepoResult<Vec<HistoryRecord>>;
}

pub struct SqliteHistoryRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteHistoryRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> RepoResult<Vec<HistoryRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_history_columns)?;
        let mut records = Vec::new();
        for columns in rows {
            records.push(columns?.parse()?);
        }
        Ok(records)
    }
}

impl HistorySink for SqliteHistoryRepository<'_> {
    fn append(&self, record: &HistoryRecord) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO review_history (
                history_uuid, reviewer_uuid, item_uuid, action, reason, comment,
                previous_status, new_status, created_at
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                record.history_id.to_string(),
                record.reviewer_id.to_string(),
                record.item_id.to_string(),
                record.action.as_str(),
                record.reason.as_deref(),
                record.comment.as_deref(),
                record.previous_status.as_str(),
                record.new_status.as_str(),
                record.created_at,
            ],
        )?;
        Ok(())
    }

    fn list_by_reviewer(
        &self,
        reviewer: ReviewerId,
        limit: usize,
        offset: usize,
    ) -> RepoResult<Vec<HistoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.query(
            &format!(
                "{HISTORY_SELECT_SQL}
                 WHERE reviewer_uuid = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3;"
            ),
            params![
                reviewer.to_string(),
                limit_to_sql(limit),
                limit_to_sql(offset)
            ],
        )
    }

    fn list_by_item(&self, item_id: ItemId) -> RepoResult<Vec<HistoryRecord>> {
        self.query(
            &format!(
                "{HISTORY_SELECT_SQL}
                 WHERE item_uuid = ?1
                 ORDER BY created_at DESC, rowid DESC;"
            ),
            [item_id.to_string()],
        )
    }
}

struct HistoryColumns {
    history_uuid: String,
    reviewer_uuid: String,
    item_uuid: String,
    action: String,
    reason: Option<String>,
    comment: Option<String>,
    previous_status: String,
    new_status: String,
    created_at: i64,
}

impl HistoryColumns {
    fn parse(self) -> RepoResult<HistoryRecord> {
        let action = ReviewAction::parse(&self.action).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid action `{}` in review_history.action",
                self.action
            ))
        })?;
        Ok(HistoryRecord {
            history_id: parse_uuid(&self.history_uuid, "review_history.history_uuid")?,
            reviewer_id: parse_uuid(&self.reviewer_uuid, "review_history.reviewer_uuid")?,
            item_id: parse_uuid(&self.item_uuid, "review_history.item_uuid")?,
            action,
            reason: self.reason,
            comment: self.comment,
            previous_status: parse_status(&self.previous_status, "previous_status")?,
            new_status: parse_status(&self.new_status, "new_status")?,
            created_at: self.created_at,
        })
    }
}

fn parse_status(value: &str, column: &str) -> RepoResult<ItemStatus> {
    ItemStatus::parse(value).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{value}` in review_history.{column}"))
    })
}

fn read_history_columns(row: &Row<'_>) -> rusqlite::Result<HistoryColumns> {
    Ok(HistoryColumns {
        history_uuid: row.get("history_uuid")?,
        reviewer_uuid: row.get("reviewer_uuid")?,
        item_uuid: row.get("item_uuid")?,
        action: row.get("action")?,
        reason: row.get("reason")?,
        comment: row.get("comment")?,
        previous_status: row.get("previous_status")?,
        new_status: row.get("new_status")?,
        created_at: row.get("created_at")?,
    })
}
