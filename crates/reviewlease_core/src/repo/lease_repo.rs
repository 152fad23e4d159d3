//! Lease store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist at most one lease row per item, indexed by item and by holder.
//! - Offer conditional writes the lease manager composes into checkouts.
//!
//! # Invariants
//! - Every mutating method is a single conditional statement: it either
//!   applies to a row in the expected state or changes nothing.
//! - Stale rows are never deleted here except by their holder's release.
//! - Theft overwrites the row in place; the item keeps exactly one row.

use super::item_repo::PoolFilter;
use super::{
    ensure_schema_ready, limit_to_sql, parse_uuid, queue_condition, write_unit, RepoError,
    RepoResult,
};
use crate::model::item::{ItemId, ReviewerId};
use crate::model::lease::{Lease, LeaseId, ReviewQueue};
use rusqlite::{params, Connection, OptionalExtension, Row};

const LEASE_SELECT_SQL: &str = "SELECT
    l.item_uuid,
    l.lease_uuid,
    l.holder_uuid,
    l.expiry,
    l.acquired_at
FROM review_leases l
JOIN items i ON i.uuid = l.item_uuid";

/// Ownership terms written by an acquisition (fresh checkout or theft).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    pub holder_id: ReviewerId,
    pub lease_id: LeaseId,
    pub acquired_at: i64,
    pub expiry: i64,
}

impl LeaseGrant {
    fn into_lease(self, item_id: ItemId) -> Lease {
        Lease {
            item_id,
            lease_id: self.lease_id,
            holder_id: self.holder_id,
            expiry: self.expiry,
            acquired_at: self.acquired_at,
        }
    }
}

/// How a stale scan treats leases the scanning reviewer still holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnStaleLeases {
    /// Return them ahead of everybody else's.
    First,
    /// Leave them out; only other holders' stale leases are returned.
    Skip,
}

/// Storage contract for the lease table.
pub trait LeaseStore {
    /// Runs `work` as one serialized, atomic unit of store mutations.
    fn in_write_unit<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RepoError>;

    fn get_lease(&self, item_id: ItemId) -> RepoResult<Option<Lease>>;

    /// Every lease `holder` has on items in `queue`, stale ones included.
    fn leases_held_by(&self, holder: ReviewerId, queue: ReviewQueue) -> RepoResult<Vec<Lease>>;

    /// Stale leases on items matching `filter`, ordered by oldest expiry.
    /// `holder`'s own stale leases come first or are skipped, per `own`.
    fn stale_leases(
        &self,
        filter: &PoolFilter,
        holder: ReviewerId,
        own: OwnStaleLeases,
        now_ms: i64,
        limit: usize,
    ) -> RepoResult<Vec<Lease>>;

    /// Creates a lease iff the item has none and is still in `queue`.
    fn insert_if_free(
        &self,
        item_id: ItemId,
        queue: ReviewQueue,
        grant: LeaseGrant,
    ) -> RepoResult<Option<Lease>>;

    /// Overwrites holder, lease id and expiry iff the lease is stale at
    /// `grant.acquired_at`.
    fn steal_if_stale(&self, item_id: ItemId, grant: LeaseGrant) -> RepoResult<Option<Lease>>;

    /// Extends `holder`'s lease on the item; expiry never moves backwards.
    fn renew_if_held(
        &self,
        item_id: ItemId,
        holder: ReviewerId,
        expiry: i64,
    ) -> RepoResult<Option<Lease>>;

    /// Extends every unexpired lease `holder` has on items in `queue`.
    /// Stale leases are left for theft.
    fn renew_all_held(
        &self,
        holder: ReviewerId,
        queue: ReviewQueue,
        expiry: i64,
        now_ms: i64,
    ) -> RepoResult<usize>;

    /// Deletes the lease iff `holder` holds it.
    fn delete_if_held(&self, item_id: ItemId, holder: ReviewerId) -> RepoResult<bool>;
}

/// SQLite-backed lease store.
pub struct SqliteLeaseStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteLeaseStore<'conn> {
    /// Wraps a migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema is not at the latest version.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }
}

impl LeaseStore for SqliteLeaseStore<'_> {
    fn in_write_unit<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<RepoError>,
    {
        write_unit(self.conn, work)
    }

    fn get_lease(&self, item_id: ItemId) -> RepoResult<Option<Lease>> {
        let lease = self
            .conn
            .query_row(
                &format!("{LEASE_SELECT_SQL} WHERE l.item_uuid = ?1;"),
                [item_id.to_string()],
                read_lease_columns,
            )
            .optional()?;
        lease.map(LeaseColumns::parse).transpose()
    }

    fn leases_held_by(&self, holder: ReviewerId, queue: ReviewQueue) -> RepoResult<Vec<Lease>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LEASE_SELECT_SQL}
             WHERE l.holder_uuid = ?1
               AND {}
             ORDER BY l.acquired_at ASC, i.submitted_at ASC, l.item_uuid ASC;",
            queue_condition(queue)
        ))?;
        let rows = stmt.query_map([holder.to_string()], read_lease_columns)?;
        collect_leases(rows)
    }

    fn stale_leases(
        &self,
        filter: &PoolFilter,
        holder: ReviewerId,
        own: OwnStaleLeases,
        now_ms: i64,
        limit: usize,
    ) -> RepoResult<Vec<Lease>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "{LEASE_SELECT_SQL}
             WHERE l.expiry <= ?1
               AND {}
               AND (?2 IS NULL OR NOT EXISTS (
                    SELECT 1 FROM item_owners o
                    WHERE o.item_uuid = l.item_uuid
                      AND o.user_uuid = ?2
               ))
               AND (?4 = 1 OR l.holder_uuid <> ?3)
             ORDER BY (l.holder_uuid = ?3) DESC, l.expiry ASC, l.item_uuid ASC
             LIMIT ?5;",
            queue_condition(filter.queue)
        ))?;
        let rows = stmt.query_map(
            params![
                now_ms,
                filter.exclude_owner.map(|id| id.to_string()),
                holder.to_string(),
                own == OwnStaleLeases::First,
                limit_to_sql(limit),
            ],
            read_lease_columns,
        )?;
        collect_leases(rows)
    }

    fn insert_if_free(
        &self,
        item_id: ItemId,
        queue: ReviewQueue,
        grant: LeaseGrant,
    ) -> RepoResult<Option<Lease>> {
        let inserted = self.conn.execute(
            &format!(
                "INSERT INTO review_leases (item_uuid, lease_uuid, holder_uuid, expiry, acquired_at)
                 SELECT i.uuid, ?2, ?3, ?4, ?5
                 FROM items i
                 WHERE i.uuid = ?1
                   AND {}
                 ON CONFLICT (item_uuid) DO NOTHING;",
                queue_condition(queue)
            ),
            params![
                item_id.to_string(),
                grant.lease_id.to_string(),
                grant.holder_id.to_string(),
                grant.expiry,
                grant.acquired_at,
            ],
        )?;
        Ok((inserted == 1).then(|| grant.into_lease(item_id)))
    }

    fn steal_if_stale(&self, item_id: ItemId, grant: LeaseGrant) -> RepoResult<Option<Lease>> {
        let changed = self.conn.execute(
            "UPDATE review_leases
             SET lease_uuid = ?2,
                 holder_uuid = ?3,
                 expiry = ?4,
                 acquired_at = ?5
             WHERE item_uuid = ?1
               AND expiry <= ?5;",
            params![
                item_id.to_string(),
                grant.lease_id.to_string(),
                grant.holder_id.to_string(),
                grant.expiry,
                grant.acquired_at,
            ],
        )?;
        Ok((changed == 1).then(|| grant.into_lease(item_id)))
    }

    fn renew_if_held(
        &self,
        item_id: ItemId,
        holder: ReviewerId,
        expiry: i64,
    ) -> RepoResult<Option<Lease>> {
        let changed = self.conn.execute(
            "UPDATE review_leases
             SET expiry = MAX(expiry, ?3)
             WHERE item_uuid = ?1
               AND holder_uuid = ?2;",
            params![item_id.to_string(), holder.to_string(), expiry],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_lease(item_id)
    }

    fn renew_all_held(
        &self,
        holder: ReviewerId,
        queue: ReviewQueue,
        expiry: i64,
        now_ms: i64,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE review_leases
                 SET expiry = MAX(expiry, ?2)
                 WHERE holder_uuid = ?1
                   AND expiry > ?3
                   AND item_uuid IN (SELECT i.uuid FROM items i WHERE {});",
                queue_condition(queue)
            ),
            params![holder.to_string(), expiry, now_ms],
        )?;
        Ok(changed)
    }

    fn delete_if_held(&self, item_id: ItemId, holder: ReviewerId) -> RepoResult<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM review_leases
             WHERE item_uuid = ?1
               AND holder_uuid = ?2;",
            params![item_id.to_string(), holder.to_string()],
        )?;
        Ok(deleted == 1)
    }
}

/// Raw column values; UUID parsing happens outside the rusqlite row closure
/// so malformed data maps to `RepoError::InvalidData`.
struct LeaseColumns {
    item_uuid: String,
    lease_uuid: String,
    holder_uuid: String,
    expiry: i64,
    acquired_at: i64,
}

impl LeaseColumns {
    fn parse(self) -> RepoResult<Lease> {
        Ok(Lease {
            item_id: parse_uuid(&self.item_uuid, "review_leases.item_uuid")?,
            lease_id: parse_uuid(&self.lease_uuid, "review_leases.lease_uuid")?,
            holder_id: parse_uuid(&self.holder_uuid, "review_leases.holder_uuid")?,
            expiry: self.expiry,
            acquired_at: self.acquired_at,
        })
    }
}

fn read_lease_columns(row: &Row<'_>) -> rusqlite::Result<LeaseColumns> {
    Ok(LeaseColumns {
        item_uuid: row.get("item_uuid")?,
        lease_uuid: row.get("lease_uuid")?,
        holder_uuid: row.get("holder_uuid")?,
        expiry: row.get("expiry")?,
        acquired_at: row.get("acquired_at")?,
    })
}

fn collect_leases<I>(rows: I) -> RepoResult<Vec<Lease>>
where
    I: Iterator<Item = rusqlite::Result<LeaseColumns>>,
{
    let mut leases = Vec::new();
    for columns in rows {
        leases.push(columns?.parse()?);
    }
    Ok(leases)
}
