use reviewlease_core::{
    open_db_in_memory, Clock, Item, ItemId, ItemKind, ItemPool, ItemStatus, LeaseConfig,
    LeaseManager, LeaseStore, ManualClock, RepoError, ReviewQueue, SingleRefusal,
    SqliteItemRepository, SqliteLeaseStore, TopUp,
};
use rusqlite::Connection;
use std::collections::HashSet;
use uuid::Uuid;

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;

type Manager<'c> = LeaseManager<SqliteLeaseStore<'c>, SqliteItemRepository<'c>, &'c ManualClock>;

fn manager<'c>(conn: &'c Connection, clock: &'c ManualClock, config: LeaseConfig) -> Manager<'c> {
    LeaseManager::new(
        SqliteLeaseStore::try_new(conn).unwrap(),
        SqliteItemRepository::try_new(conn).unwrap(),
        clock,
        config,
    )
    .unwrap()
}

fn quota(initial_quota: u32) -> LeaseConfig {
    LeaseConfig {
        initial_quota,
        ..LeaseConfig::default()
    }
}

fn seed(conn: &Connection, count: usize, status: ItemStatus, first_submitted_at: i64) -> Vec<ItemId> {
    let items = SqliteItemRepository::try_new(conn).unwrap();
    (0..count)
        .map(|index| {
            let mut item = Item::new(
                ItemKind::Theme,
                format!("theme-{}", Uuid::new_v4().simple()),
                format!("Theme {index}"),
                first_submitted_at + index as i64,
            );
            item.status = status;
            items.create_item(&item).unwrap()
        })
        .collect()
}

fn free_count(conn: &Connection, status: ItemStatus) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM items i
         WHERE i.status = ?1
           AND NOT EXISTS (SELECT 1 FROM review_leases l WHERE l.item_uuid = i.uuid);",
        [status.as_str()],
        |row| row.get(0),
    )
    .unwrap()
}

fn item_set(leases: &[reviewlease_core::Lease]) -> HashSet<ItemId> {
    leases.iter().map(|lease| lease.item_id).collect()
}

#[test]
fn five_item_pool_with_quota_two_hands_out_two_two_one() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 5, ItemStatus::Pending, T0 - 10_000);
    let (r1, r2, r3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    let first = manager.checkout(r1, 2).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(free_count(&conn, ItemStatus::Pending), 3);

    let second = manager.checkout(r2, 2).unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(free_count(&conn, ItemStatus::Pending), 1);

    let third = manager.checkout(r3, 2).unwrap();
    assert_eq!(third.len(), 1);
    assert_eq!(free_count(&conn, ItemStatus::Pending), 0);

    let mut seen = HashSet::new();
    for lease in first.iter().chain(&second).chain(&third) {
        assert!(seen.insert(lease.item_id), "item handed out twice");
    }
    assert!(third.iter().all(|lease| lease.holder_id == r3));
}

#[test]
fn checkout_takes_oldest_submissions_first() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let ids = seed(&conn, 4, ItemStatus::Pending, T0 - 10_000);

    let leases = manager.checkout(Uuid::new_v4(), 2).unwrap();
    let got: Vec<ItemId> = leases.iter().map(|lease| lease.item_id).collect();
    assert_eq!(got, ids[..2].to_vec());
    assert!(leases.iter().all(|lease| lease.expiry == T0 + 30 * MINUTE));
}

#[test]
fn checkout_only_fills_the_shortfall() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 6, ItemStatus::Pending, T0 - 10_000);
    let reviewer = Uuid::new_v4();

    let held = manager.checkout(reviewer, 2).unwrap();
    let topped = manager.checkout(reviewer, 3).unwrap();

    assert_eq!(topped.len(), 3);
    assert!(item_set(&held).is_subset(&item_set(&topped)));
    assert_eq!(free_count(&conn, ItemStatus::Pending), 3);
}

#[test]
fn repeated_checkout_renews_without_changing_membership() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 5, ItemStatus::Pending, T0 - 10_000);
    let reviewer = Uuid::new_v4();

    let first = manager.checkout(reviewer, 2).unwrap();
    clock.advance_minutes(10);
    let second = manager.checkout(reviewer, 2).unwrap();
    clock.advance_minutes(5);
    let third = manager.checkout(reviewer, 1).unwrap();

    assert_eq!(item_set(&first), item_set(&second));
    assert_eq!(item_set(&first), item_set(&third));
    for lease in &second {
        let original = first
            .iter()
            .find(|candidate| candidate.item_id == lease.item_id)
            .unwrap();
        assert_eq!(lease.lease_id, original.lease_id);
        assert_eq!(lease.expiry, T0 + 40 * MINUTE);
    }
    assert!(third.iter().all(|lease| lease.expiry == T0 + 45 * MINUTE));
    assert_eq!(free_count(&conn, ItemStatus::Pending), 3);
}

#[test]
fn renewal_never_moves_expiry_backwards() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(1));
    let ids = seed(&conn, 1, ItemStatus::Pending, T0 - 10_000);
    let reviewer = Uuid::new_v4();

    manager.checkout(reviewer, 1).unwrap();
    let renewed = manager
        .lease_store()
        .renew_if_held(ids[0], reviewer, T0 + 10 * MINUTE)
        .unwrap()
        .unwrap();
    assert_eq!(renewed.expiry, T0 + 30 * MINUTE);
}

#[test]
fn expired_leases_are_stolen_when_the_pool_is_empty() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 2, ItemStatus::Pending, T0 - 10_000);
    let (r1, r4) = (Uuid::new_v4(), Uuid::new_v4());

    let original = manager.checkout(r1, 2).unwrap();
    clock.advance_minutes(31);
    let stolen = manager.checkout(r4, 2).unwrap();

    assert_eq!(item_set(&original), item_set(&stolen));
    for lease in &stolen {
        assert_eq!(lease.holder_id, r4);
        assert_eq!(lease.acquired_at, T0 + 31 * MINUTE);
        assert!(original.iter().all(|old| old.lease_id != lease.lease_id));
        assert_eq!(manager.lease_for(lease.item_id).unwrap().as_ref(), Some(lease));
    }
    assert!(manager
        .held_leases(r1, ReviewQueue::Pending)
        .unwrap()
        .is_empty());
}

#[test]
fn unexpired_leases_are_never_stolen() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 2, ItemStatus::Pending, T0 - 10_000);
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());

    manager.checkout(r1, 2).unwrap();
    clock.advance_minutes(29);
    assert!(manager.checkout(r2, 2).unwrap().is_empty());
    assert_eq!(manager.held_leases(r1, ReviewQueue::Pending).unwrap().len(), 2);
}

#[test]
fn lease_expiring_exactly_now_counts_as_stale() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(1));
    seed(&conn, 1, ItemStatus::Pending, T0 - 10_000);

    manager.checkout(Uuid::new_v4(), 1).unwrap();
    clock.advance_minutes(30);
    assert_eq!(manager.checkout(Uuid::new_v4(), 1).unwrap().len(), 1);
}

#[test]
fn own_stale_leases_are_reclaimed_before_foreign_ones() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 3, ItemStatus::Pending, T0 - 10_000);
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());

    // r2's lease is the oldest, so only the own-first ordering picks r1's.
    let foreign = manager.checkout(r2, 1).unwrap();
    clock.advance_minutes(1);
    let own = manager.checkout(r1, 2).unwrap();
    clock.advance_minutes(40);

    let reclaimed = manager.checkout(r1, 1).unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert!(item_set(&own).contains(&reclaimed[0].item_id));
    assert_eq!(
        manager.lease_for(foreign[0].item_id).unwrap().unwrap().holder_id,
        r2
    );
}

#[test]
fn checkout_leaves_own_stale_leases_out_once_enough_are_live() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 4, ItemStatus::Pending, T0 - 10_000);
    let reviewer = Uuid::new_v4();

    let first = manager.checkout(reviewer, 2).unwrap();
    clock.advance_minutes(60);
    let second = manager.checkout(reviewer, 2).unwrap();
    let third = manager.checkout(reviewer, 2).unwrap();

    assert_eq!(second.len(), 2);
    assert!(item_set(&first).is_disjoint(&item_set(&second)));
    assert_eq!(third.len(), 2);
    assert_eq!(item_set(&third), item_set(&second));
    assert!(third.iter().all(|lease| !lease.is_stale(clock.now_ms())));

    // The abandoned pair is still held but stays stale for anyone to take.
    for lease in &first {
        let current = manager.lease_for(lease.item_id).unwrap().unwrap();
        assert_eq!(current.holder_id, reviewer);
        assert_eq!(current.expiry, T0 + 30 * MINUTE);
    }
    let other = manager.checkout(Uuid::new_v4(), 2).unwrap();
    assert_eq!(item_set(&other), item_set(&first));
}

#[test]
fn top_up_does_not_reacquire_own_stale_leases() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    seed(&conn, 3, ItemStatus::Pending, T0 - 10_000);
    let (reviewer, other) = (Uuid::new_v4(), Uuid::new_v4());

    let own = manager.checkout(reviewer, 2).unwrap();
    let foreign = manager.checkout(other, 1).unwrap();
    clock.advance_minutes(60);

    match manager.top_up(reviewer, ReviewQueue::Pending, 2, 20).unwrap() {
        TopUp::Acquired(leases) => {
            assert_eq!(item_set(&leases), item_set(&foreign));
        }
        unexpected => panic!("unexpected top-up: {unexpected:?}"),
    }
    for lease in &own {
        assert_eq!(manager.lease_for(lease.item_id).unwrap().as_ref(), Some(lease));
    }
    assert_eq!(
        manager.top_up(reviewer, ReviewQueue::Pending, 3, 20).unwrap(),
        TopUp::Acquired(Vec::new())
    );
}

#[test]
fn rereview_queue_selects_by_membership_not_status() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let public = seed(&conn, 2, ItemStatus::Public, T0 - 20_000);
    let pending = seed(&conn, 1, ItemStatus::Pending, T0 - 10_000);
    let items = manager.item_pool();
    items.enqueue_rereview(public[1], T0).unwrap();
    items.enqueue_rereview(pending[0], T0).unwrap();
    assert_eq!(items.count_in_queue(ReviewQueue::Rereview).unwrap(), 2);

    let reviewer = Uuid::new_v4();
    let leases = manager
        .checkout_queue(reviewer, ReviewQueue::Rereview, 5)
        .unwrap();
    assert_eq!(item_set(&leases), HashSet::from([public[1], pending[0]]));
    assert_eq!(
        manager
            .held_leases(reviewer, ReviewQueue::Rereview)
            .unwrap()
            .len(),
        2
    );

    // One lease per item, whichever queue it was drawn from.
    assert!(manager.checkout(Uuid::new_v4(), 2).unwrap().is_empty());
}

#[test]
fn rereview_queue_tops_off_renews_and_steals() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let ids = seed(&conn, 3, ItemStatus::Public, T0 - 10_000);
    for id in &ids {
        manager.item_pool().enqueue_rereview(*id, T0).unwrap();
    }
    let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());

    let first = manager
        .checkout_queue(r1, ReviewQueue::Rereview, 2)
        .unwrap();
    assert_eq!(item_set(&first), HashSet::from([ids[0], ids[1]]));
    clock.advance_minutes(10);
    let renewed = manager
        .checkout_queue(r1, ReviewQueue::Rereview, 2)
        .unwrap();
    assert_eq!(item_set(&renewed), item_set(&first));
    assert!(renewed.iter().all(|lease| lease.expiry == T0 + 40 * MINUTE));

    clock.advance_minutes(31);
    let stolen = manager
        .checkout_queue(r2, ReviewQueue::Rereview, 3)
        .unwrap();
    assert_eq!(item_set(&stolen), ids.iter().copied().collect::<HashSet<_>>());
    assert!(stolen.iter().all(|lease| lease.holder_id == r2));
}

#[test]
fn rereview_queue_skips_own_submissions() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let author = Uuid::new_v4();
    let mut own = Item::new(ItemKind::Theme, "reuploaded", "Reuploaded", T0 - 1)
        .with_owner(author, "author@example.test");
    own.status = ItemStatus::Public;
    manager.item_pool().create_item(&own).unwrap();
    manager.item_pool().enqueue_rereview(own.uuid, T0).unwrap();

    assert!(manager
        .checkout_queue(author, ReviewQueue::Rereview, 2)
        .unwrap()
        .is_empty());
    assert_eq!(
        manager.checkout_single(author, own.uuid).unwrap().refusal,
        Some(SingleRefusal::OwnSubmission)
    );
    let leases = manager
        .checkout_queue(Uuid::new_v4(), ReviewQueue::Rereview, 2)
        .unwrap();
    assert_eq!(item_set(&leases), HashSet::from([own.uuid]));
}

#[test]
fn single_checkout_accepts_items_queued_for_rereview() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let id = seed(&conn, 1, ItemStatus::Public, T0 - 10_000)[0];
    let reviewer = Uuid::new_v4();

    let refused = manager.checkout_single(reviewer, id).unwrap();
    assert_eq!(
        refused.refusal,
        Some(SingleRefusal::NotReviewable(ItemStatus::Public))
    );

    manager.item_pool().enqueue_rereview(id, T0).unwrap();
    let granted = manager.checkout_single(reviewer, id).unwrap();
    assert!(granted.reviewable);
    assert_eq!(granted.lease.map(|lease| lease.holder_id), Some(reviewer));
}

#[test]
fn rereview_membership_is_idempotent_and_checked() {
    let conn = open_db_in_memory().unwrap();
    let items = SqliteItemRepository::try_new(&conn).unwrap();
    let id = seed(&conn, 1, ItemStatus::Public, T0)[0];

    items.enqueue_rereview(id, T0).unwrap();
    items.enqueue_rereview(id, T0 + 5).unwrap();
    assert!(items.is_queued_for_rereview(id).unwrap());
    let queued_at: i64 = conn
        .query_row(
            "SELECT queued_at FROM rereview_queue WHERE item_uuid = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(queued_at, T0);

    assert!(items.dequeue_rereview(id).unwrap());
    assert!(!items.dequeue_rereview(id).unwrap());
    assert_eq!(items.count_in_queue(ReviewQueue::Rereview).unwrap(), 0);

    let missing = Uuid::new_v4();
    assert!(matches!(
        items.enqueue_rereview(missing, T0),
        Err(RepoError::NotFound(id)) if id == missing
    ));
}

#[test]
fn own_submissions_are_skipped_unless_self_review_is_allowed() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let author = Uuid::new_v4();
    let items = SqliteItemRepository::try_new(&conn).unwrap();
    let own = Item::new(ItemKind::Persona, "own-work", "Own work", T0 - 1)
        .with_owner(author, "author@example.test");
    items.create_item(&own).unwrap();

    let strict = manager(&conn, &clock, quota(2));
    assert!(strict.checkout(author, 2).unwrap().is_empty());

    let relaxed = manager(
        &conn,
        &clock,
        LeaseConfig {
            allow_self_review: true,
            ..quota(2)
        },
    );
    let leases = relaxed.checkout(author, 2).unwrap();
    assert_eq!(item_set(&leases), HashSet::from([own.uuid]));
}

#[test]
fn queues_draw_from_their_own_status() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));
    let pending = seed(&conn, 2, ItemStatus::Pending, T0 - 10_000);
    let flagged = seed(&conn, 2, ItemStatus::Flagged, T0 - 20_000);
    seed(&conn, 2, ItemStatus::Public, T0 - 30_000);
    let senior = Uuid::new_v4();

    let flagged_leases = manager
        .checkout_queue(senior, ReviewQueue::Flagged, 5)
        .unwrap();
    assert_eq!(item_set(&flagged_leases), flagged.iter().copied().collect::<HashSet<_>>());

    let pending_leases = manager.checkout(senior, 5).unwrap();
    assert_eq!(item_set(&pending_leases), pending.iter().copied().collect::<HashSet<_>>());
}

#[test]
fn release_only_succeeds_for_the_holder() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(1));
    seed(&conn, 1, ItemStatus::Pending, T0 - 10_000);
    let (holder, other) = (Uuid::new_v4(), Uuid::new_v4());
    let lease = manager.checkout(holder, 1).unwrap().remove(0);

    assert!(!manager.release(other, lease.item_id).unwrap());
    assert!(manager.lease_for(lease.item_id).unwrap().is_some());

    assert!(manager.release(holder, lease.item_id).unwrap());
    assert!(manager.lease_for(lease.item_id).unwrap().is_none());
    assert!(!manager.release(holder, lease.item_id).unwrap());
    assert_eq!(free_count(&conn, ItemStatus::Pending), 1);
}

#[test]
fn top_up_is_bounded_by_increment_and_absolute_max() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(3));
    seed(&conn, 10, ItemStatus::Pending, T0 - 10_000);
    let reviewer = Uuid::new_v4();

    assert_eq!(
        manager.top_up(reviewer, ReviewQueue::Pending, 4, 4).unwrap(),
        TopUp::QuotaReached
    );

    match manager.top_up(reviewer, ReviewQueue::Pending, 0, 20).unwrap() {
        TopUp::Acquired(leases) => assert_eq!(leases.len(), 3),
        other => panic!("unexpected top-up: {other:?}"),
    }
    match manager.top_up(reviewer, ReviewQueue::Pending, 3, 4).unwrap() {
        TopUp::Acquired(leases) => assert_eq!(leases.len(), 1),
        other => panic!("unexpected top-up: {other:?}"),
    }
    assert_eq!(
        manager.held_leases(reviewer, ReviewQueue::Pending).unwrap().len(),
        4
    );
}

#[test]
fn top_up_on_exhausted_pool_acquires_nothing() {
    let conn = open_db_in_memory().unwrap();
    let clock = ManualClock::new(T0);
    let manager = manager(&conn, &clock, quota(2));

    assert_eq!(
        manager
            .top_up(Uuid::new_v4(), ReviewQueue::Pending, 0, 20)
            .unwrap(),
        TopUp::Acquired(Vec::new())
    );
}

#[test]
fn item_pool_counts_and_status_updates() {
    let conn = open_db_in_memory().unwrap();
    let items = SqliteItemRepository::try_new(&conn).unwrap();
    let ids = seed(&conn, 3, ItemStatus::Pending, T0);

    items.set_status(ids[0], ItemStatus::Flagged, T0 + 1).unwrap();
    assert_eq!(items.count_by_status(ItemStatus::Pending).unwrap(), 2);
    assert_eq!(items.count_by_status(ItemStatus::Flagged).unwrap(), 1);

    let missing = Uuid::new_v4();
    assert!(matches!(
        items.set_status(missing, ItemStatus::Public, T0),
        Err(RepoError::NotFound(id)) if id == missing
    ));
}
