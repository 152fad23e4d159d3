//! Item pool contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist review items with their owners.
//! - Answer free-pool queries as an anti-join against `review_leases`.
//! - Track rereview queue membership, which is independent of item status.
//!
//! # Invariants
//! - Free-pool ordering is deterministic: `submitted_at ASC, uuid ASC`.
//! - An item with a lease row (stale or not) is never in the free pool.

use super::{
    ensure_schema_ready, limit_to_sql, parse_uuid, queue_condition, write_unit, RepoError,
    RepoResult,
};
use crate::model::item::{Item, ItemId, ItemKind, ItemOwner, ItemStatus, ReviewerId};
use crate::model::lease::ReviewQueue;
use rusqlite::{params, Connection, OptionalExtension, Row};

const ITEM_SELECT_SQL: &str = "SELECT
    i.uuid,
    i.slug,
    i.name,
    i.kind,
    i.status,
    i.submitted_at
FROM items i";

/// Which items a free-pool query may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolFilter {
    pub queue: ReviewQueue,
    /// Skip items this user co-owns.
    pub exclude_owner: Option<ReviewerId>,
}

impl PoolFilter {
    pub fn new(queue: ReviewQueue) -> Self {
        Self {
            queue,
            exclude_owner: None,
        }
    }

    pub fn excluding_owner(mut self, owner: ReviewerId) -> Self {
        self.exclude_owner = Some(owner);
        self
    }
}

/// Storage contract for review items.
pub trait ItemPool {
    fn create_item(&self, item: &Item) -> RepoResult<ItemId>;
    fn get_item(&self, item_id: ItemId) -> RepoResult<Option<Item>>;
    /// Items matching `filter` that have no lease row.
    fn free_items(&self, filter: &PoolFilter, limit: usize) -> RepoResult<Vec<Item>>;
    fn set_status(&self, item_id: ItemId, status: ItemStatus, now_ms: i64) -> RepoResult<()>;
    fn count_by_status(&self, status: ItemStatus) -> RepoResult<u64>;
    /// Number of items currently in `queue`, leased or not.
    fn count_in_queue(&self, queue: ReviewQueue) -> RepoResult<u64>;
    /// Puts the item into the rereview queue; re-enqueueing keeps the
    /// original `queued_at`.
    fn enqueue_rereview(&self, item_id: ItemId, now_ms: i64) -> RepoResult<()>;
    /// Removes the item from the rereview queue; `false` when it was not queued.
    fn dequeue_rereview(&self, item_id: ItemId) -> RepoResult<bool>;
    fn is_queued_for_rereview(&self, item_id: ItemId) -> RepoResult<bool>;
}

/// SQLite-backed item pool.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    fn load_owners(&self, item_id: ItemId) -> RepoResult<Vec<ItemOwner>> {
        let mut stmt = self.conn.prepare(
            "SELECT user_uuid, email
             FROM item_owners
             WHERE item_uuid = ?1
             ORDER BY email ASC, user_uuid ASC;",
        )?;
        let rows = stmt.query_map([item_id.to_string()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut owners = Vec::new();
        for row in rows {
            let (user_uuid, email) = row?;
            owners.push(ItemOwner {
                user_id: parse_uuid(&user_uuid, "item_owners.user_uuid")?,
                email,
            });
        }
        Ok(owners)
    }

    fn hydrate(&self, columns: ItemColumns) -> RepoResult<Item> {
        let mut item = columns.parse()?;
        item.owners = self.load_owners(item.uuid)?;
        Ok(item)
    }
}

impl ItemPool for SqliteItemRepository<'_> {
    fn create_item(&self, item: &Item) -> RepoResult<ItemId> {
        item.validate()?;
        write_unit(self.conn, || -> RepoResult<()> {
            self.conn.execute(
                "INSERT INTO items (uuid, slug, name, kind, status, submitted_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6);",
                params![
                    item.uuid.to_string(),
                    item.slug.as_str(),
                    item.name.as_str(),
                    item.kind.as_str(),
                    item.status.as_str(),
                    item.submitted_at,
                ],
            )?;
            for owner in &item.owners {
                self.conn.execute(
                    "INSERT INTO item_owners (item_uuid, user_uuid, email)
                     VALUES (?1, ?2, ?3);",
                    params![
                        item.uuid.to_string(),
                        owner.user_id.to_string(),
                        owner.email.as_str()
                    ],
                )?;
            }
            Ok(())
        })?;
        Ok(item.uuid)
    }

    fn get_item(&self, item_id: ItemId) -> RepoResult<Option<Item>> {
        let columns = self
            .conn
            .query_row(
                &format!("{ITEM_SELECT_SQL} WHERE i.uuid = ?1;"),
                [item_id.to_string()],
                read_item_columns,
            )
            .optional()?;
        columns.map(|columns| self.hydrate(columns)).transpose()
    }

    fn free_items(&self, filter: &PoolFilter, limit: usize) -> RepoResult<Vec<Item>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "{ITEM_SELECT_SQL}
             WHERE {}
               AND NOT EXISTS (
                    SELECT 1 FROM review_leases l WHERE l.item_uuid = i.uuid
               )
               AND (?1 IS NULL OR NOT EXISTS (
                    SELECT 1 FROM item_owners o
                    WHERE o.item_uuid = i.uuid
                      AND o.user_uuid = ?1
               ))
             ORDER BY i.submitted_at ASC, i.uuid ASC
             LIMIT ?2;",
            queue_condition(filter.queue)
        ))?;
        let rows = stmt.query_map(
            params![
                filter.exclude_owner.map(|id| id.to_string()),
                limit_to_sql(limit),
            ],
            read_item_columns,
        )?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        columns
            .into_iter()
            .map(|columns| self.hydrate(columns))
            .collect()
    }

    fn set_status(&self, item_id: ItemId, status: ItemStatus, now_ms: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE items
             SET status = ?2,
                 updated_at = ?3
             WHERE uuid = ?1;",
            params![item_id.to_string(), status.as_str(), now_ms],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(item_id));
        }
        Ok(())
    }

    fn count_by_status(&self, status: ItemStatus) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items WHERE status = ?1;",
            [status.as_str()],
            |row| row.get(0),
        )?;
        to_count(count)
    }

    fn count_in_queue(&self, queue: ReviewQueue) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM items i WHERE {};",
                queue_condition(queue)
            ),
            [],
            |row| row.get(0),
        )?;
        to_count(count)
    }

    fn enqueue_rereview(&self, item_id: ItemId, now_ms: i64) -> RepoResult<()> {
        let inserted = self.conn.execute(
            "INSERT INTO rereview_queue (item_uuid, queued_at)
             SELECT uuid, ?2 FROM items WHERE uuid = ?1
             ON CONFLICT (item_uuid) DO NOTHING;",
            params![item_id.to_string(), now_ms],
        )?;
        if inserted == 0 && !self.is_queued_for_rereview(item_id)? {
            return Err(RepoError::NotFound(item_id));
        }
        Ok(())
    }

    fn dequeue_rereview(&self, item_id: ItemId) -> RepoResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM rereview_queue WHERE item_uuid = ?1;",
            [item_id.to_string()],
        )?;
        Ok(deleted == 1)
    }

    fn is_queued_for_rereview(&self, item_id: ItemId) -> RepoResult<bool> {
        let queued: i64 = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM rereview_queue WHERE item_uuid = ?1);",
            [item_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(queued == 1)
    }
}

fn to_count(count: i64) -> RepoResult<u64> {
    u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative item count {count}")))
}

struct ItemColumns {
    uuid: String,
    slug: String,
    name: String,
    kind: String,
    status: String,
    submitted_at: i64,
}

impl ItemColumns {
    fn parse(self) -> RepoResult<Item> {
        let kind = ItemKind::parse(&self.kind).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid kind `{}` in items.kind", self.kind))
        })?;
        let status = ItemStatus::parse(&self.status).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid status `{}` in items.status", self.status))
        })?;
        Ok(Item {
            uuid: parse_uuid(&self.uuid, "items.uuid")?,
            slug: self.slug,
            name: self.name,
            kind,
            status,
            owners: Vec::new(),
            submitted_at: self.submitted_at,
        })
    }
}

fn read_item_columns(row: &Row<'_>) -> rusqlite::Result<ItemColumns> {
    Ok(ItemColumns {
        uuid: row.get("uuid")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        kind: row.get("kind")?,
        status: row.get("status")?,
        submitted_at: row.get("submitted_at")?,
    })
}
