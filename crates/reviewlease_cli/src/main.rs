//! CLI smoke entry point.
//!
//! # Responsibility
//! - Wire `reviewlease_core` against a database and walk through one
//!   checkout, theft and decision cycle.
//!
//! Usage: `reviewlease_cli [DB_PATH] [CONFIG_JSON_PATH]`. Without `DB_PATH`
//! an in-memory database runs on a manual clock that is moved past lease
//! expiry to show theft. A database file runs on wall-clock time, so leases
//! it stores stay meaningful to later runs and nothing is stolen early.
//! Set `REVIEWLEASE_LOG_DIR` to an absolute directory to enable file logging.

use log::info;
use reviewlease_core::{
    default_log_level, init_logging, open_db, open_db_in_memory, Decision, DecisionOutcome, Item,
    Clock, ItemKind, ItemPool, LeaseConfig, LeaseManager, LogNotifier, ManualClock, MoreStatus,
    QueueService, ReviewQueue, ReviewService, SqliteHistoryRepository, SqliteItemRepository,
    SqliteLeaseStore, SystemClock,
};
use std::error::Error;
use uuid::Uuid;

const DEMO_START_MS: i64 = 1_700_000_000_000;

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("REVIEWLEASE_LOG_DIR") {
        init_logging(default_log_level(), &log_dir)?;
    }

    let mut args = std::env::args().skip(1);
    let db_path = args.next();
    let conn = match &db_path {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let config = match args.next() {
        Some(path) => LeaseConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => LeaseConfig::default(),
    };

    println!("reviewlease_core ping={}", reviewlease_core::ping());
    println!("reviewlease_core version={}", reviewlease_core::core_version());
    info!("event=cli_start module=cli status=ok");

    let manual = ManualClock::new(DEMO_START_MS);
    let system = SystemClock;
    let clock = demo_clock(db_path.is_some(), &manual, &system);
    let manager = LeaseManager::new(
        SqliteLeaseStore::try_new(&conn)?,
        SqliteItemRepository::try_new(&conn)?,
        clock,
        config,
    )?;
    let queue = QueueService::new(&manager);
    let review = ReviewService::new(&manager, SqliteHistoryRepository::try_new(&conn)?, LogNotifier);

    let run = Uuid::new_v4().simple().to_string();
    let submitted_at = clock.now_ms();
    for index in 0..8 {
        let item = Item::new(
            ItemKind::Theme,
            format!("demo-{}-{index}", &run[..8]),
            format!("Demo theme {index}"),
            submitted_at + index,
        )
        .with_owner(Uuid::new_v4(), format!("author{index}@example.test"));
        manager.item_pool().create_item(&item)?;
    }

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    let page = queue.queue_page(alice, ReviewQueue::Pending)?;
    println!(
        "alice queue: {} items (max {})",
        page.entries.len(),
        page.max_quota
    );
    let more = queue.more(bob, ReviewQueue::Pending)?;
    println!(
        "bob more: status={} new={} held={}",
        more.status.as_str(),
        more.entries.len(),
        more.held_count
    );

    let Some(first) = page.entries.first() else {
        println!("nothing to review");
        return Ok(());
    };

    if db_path.is_none() {
        manual.advance_minutes(i64::from(manager.config().lease_ttl_minutes) + 1);
    }
    let stolen = queue.single(bob, first.item.uuid)?;
    println!(
        "bob single: reviewable={} item={}",
        stolen.reviewable, first.item.slug
    );

    let late = Decision::new(first.item.uuid, "approve").for_lease(first.lease.lease_id);
    match review.apply_decision(alice, &late)? {
        DecisionOutcome::Applied(_) => println!("alice decision: applied"),
        DecisionOutcome::Discarded(reason) => {
            println!("alice decision: discarded ({})", reason.as_str())
        }
    }

    if stolen.reviewable {
        let decision = Decision::new(first.item.uuid, "approve");
        if let DecisionOutcome::Applied(record) = review.apply_decision(bob, &decision)? {
            println!("bob decision: {} -> {}", record.previous_status, record.new_status);
        }
    }

    let more = queue.more(bob, ReviewQueue::Pending)?;
    if more.status == MoreStatus::PoolEmpty {
        println!("pending pool exhausted");
    }
    let counts = queue.queue_counts()?;
    println!(
        "counts: pending={} flagged={} rereview={}",
        counts.pending, counts.flagged, counts.rereview
    );
    Ok(())
}

/// Wall-clock time for a database file, the manual clock in memory.
fn demo_clock<'c>(
    persistent: bool,
    manual: &'c ManualClock,
    system: &'c SystemClock,
) -> &'c dyn Clock {
    if persistent {
        system
    } else {
        manual
    }
}
