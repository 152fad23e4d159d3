//! Review domain model.
//!
//! # Responsibility
//! - Define the records the lease manager and review processor operate on.
//! - Keep storage string encodings next to the enums they encode.
//!
//! # Invariants
//! - Items, leases and history records are identified by stable UUIDs.
//! - Moderation status is semantic only; exclusion lives in `Lease`.

pub mod decision;
pub mod history;
pub mod item;
pub mod lease;
