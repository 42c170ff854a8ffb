//! Lock manager behaviour against the in-memory store.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use common::Harness;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

use event_booking::clock::Clock;
use event_booking::error::BookingError;
use event_booking::models::SeatStatus;

async fn status_of(h: &Harness, event_id: Uuid, seat_id: i64) -> SeatStatus {
    h.state
        .inventory
        .list_seats(event_id)
        .await
        .unwrap()
        .seats
        .into_iter()
        .find(|s| s.id == seat_id)
        .unwrap()
        .status
}

#[tokio::test]
async fn locking_is_all_or_nothing() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let (a, b) = (ev.seat_ids[0], ev.seat_ids[1]);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    h.state.locks.lock_seats(ev.event_id, bob, &[b], None).await.unwrap();

    let err = h
        .state
        .locks
        .lock_seats(ev.event_id, alice, &[a, b], None)
        .await
        .unwrap_err();
    match err {
        BookingError::Conflict { seat_ids } => assert_eq!(seat_ids, vec![b]),
        other => panic!("expected conflict, got {other:?}"),
    }

    assert_eq!(status_of(&h, ev.event_id, a).await, SeatStatus::Available);
    assert_eq!(status_of(&h, ev.event_id, b).await, SeatStatus::Locked);
}

#[tokio::test]
async fn lock_returns_total_and_expiry() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let user = Uuid::new_v4();

    let lock = h
        .state
        .locks
        .lock_seats(
            ev.event_id,
            user,
            &[ev.seat_ids[0], ev.seat_ids[2], ev.seat_ids[0]],
            Some(Duration::minutes(5)),
        )
        .await
        .unwrap();

    assert_eq!(lock.seats.len(), 2, "duplicate ids collapse");
    assert_eq!(lock.total_amount, dec!(350.00));
    assert_eq!(lock.expires_at, h.clock.now() + Duration::minutes(5));
    assert!(lock.seats.iter().all(|s| s.version == 1 && s.locked_by == Some(user)));
}

#[tokio::test]
async fn unknown_seats_and_bad_requests_are_rejected() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let user = Uuid::new_v4();

    let err = h.state.locks.lock_seats(ev.event_id, user, &[ev.seat_ids[0], 9_999], None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));

    let err = h.state.locks.lock_seats(ev.event_id, user, &[], None).await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let err = h
        .state
        .locks
        .lock_seats(ev.event_id, user, &[ev.seat_ids[0]], Some(Duration::hours(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));

    let err = h.state.locks.lock_seats(Uuid::new_v4(), user, &[ev.seat_ids[0]], None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));

    assert_eq!(status_of(&h, ev.event_id, ev.seat_ids[0]).await, SeatStatus::Available);
}

#[tokio::test]
async fn seat_limit_per_request_is_enforced() {
    let mut config = common::test_config();
    config.booking.max_seats_per_lock = 2;
    let h = Harness::with_config(config);
    let ev = h.seated_event().await;

    let err = h
        .state
        .locks
        .lock_seats(ev.event_id, Uuid::new_v4(), &ev.seat_ids[..3], None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
}

#[tokio::test]
async fn holder_can_relock_to_extend_expiry() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let user = Uuid::new_v4();
    let seat = ev.seat_ids[0];

    let first = h.state.locks.lock_seats(ev.event_id, user, &[seat], None).await.unwrap();
    h.clock.advance(Duration::minutes(3));
    let second = h.state.locks.lock_seats(ev.event_id, user, &[seat], None).await.unwrap();

    assert!(second.expires_at > first.expires_at);
    assert_eq!(second.seats[0].version, 2);
}

#[tokio::test]
async fn expired_lock_holds_the_seat_until_the_sweeper_runs() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let seat = ev.seat_ids[0];
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    h.state.locks.lock_seats(ev.event_id, alice, &[seat], Some(Duration::seconds(30))).await.unwrap();
    assert!(h.state.locks.lock_seats(ev.event_id, bob, &[seat], None).await.is_err());
    assert_eq!(h.state.inventory.count_available(ev.event_id).await.unwrap(), 3);

    // the lock is still live at the exact instant it expires
    h.clock.advance(Duration::seconds(30));
    assert!(h.state.sweeper.sweep_once().await.is_empty());
    assert_eq!(status_of(&h, ev.event_id, seat).await, SeatStatus::Locked);

    h.clock.advance(Duration::seconds(1));
    assert_eq!(status_of(&h, ev.event_id, seat).await, SeatStatus::Locked);
    assert_eq!(h.state.inventory.count_available(ev.event_id).await.unwrap(), 3);
    for user in [bob, alice] {
        let err = h.state.locks.lock_seats(ev.event_id, user, &[seat], None).await.unwrap_err();
        match err {
            BookingError::Conflict { seat_ids } => assert_eq!(seat_ids, vec![seat]),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    assert_eq!(h.state.sweeper.sweep_once().await.locks_reclaimed, 1);
    assert_eq!(status_of(&h, ev.event_id, seat).await, SeatStatus::Available);
    assert_eq!(h.state.inventory.count_available(ev.event_id).await.unwrap(), 4);

    let lock = h.state.locks.lock_seats(ev.event_id, bob, &[seat], None).await.unwrap();
    assert_eq!(lock.seats[0].locked_by, Some(bob));
}

#[tokio::test]
async fn release_only_touches_callers_seats_and_is_idempotent() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (a, b, c) = (ev.seat_ids[0], ev.seat_ids[1], ev.seat_ids[2]);

    h.state.locks.lock_seats(ev.event_id, alice, &[a], None).await.unwrap();
    h.state.locks.lock_seats(ev.event_id, bob, &[b], None).await.unwrap();

    let released = h.state.locks.release_seats(ev.event_id, alice, &[a, b, c]).await.unwrap();
    assert_eq!(released, vec![a]);
    assert_eq!(status_of(&h, ev.event_id, a).await, SeatStatus::Available);
    assert_eq!(status_of(&h, ev.event_id, b).await, SeatStatus::Locked);

    let again = h.state.locks.release_seats(ev.event_id, alice, &[a]).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn blocked_seats_cannot_be_locked_until_unblocked() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let seat = ev.seat_ids[3];
    let user = Uuid::new_v4();

    h.state.locks.block_seats(ev.event_id, &[seat]).await.unwrap();
    assert_eq!(status_of(&h, ev.event_id, seat).await, SeatStatus::Blocked);

    let err = h.state.locks.lock_seats(ev.event_id, user, &[seat], None).await.unwrap_err();
    assert!(matches!(err, BookingError::Conflict { .. }));

    let err = h.state.locks.unblock_seats(ev.event_id, &[ev.seat_ids[0]]).await.unwrap_err();
    assert!(matches!(err, BookingError::Conflict { .. }));

    h.state.locks.unblock_seats(ev.event_id, &[seat]).await.unwrap();
    h.state.locks.lock_seats(ev.event_id, user, &[seat], None).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lockers_get_exactly_one_winner() {
    let h = Arc::new(Harness::new());
    let ev = h.seated_event().await;
    let event_id = ev.event_id;
    let seats = vec![ev.seat_ids[0], ev.seat_ids[1]];

    let mut handles = Vec::new();
    for i in 0..16 {
        let h = h.clone();
        // every other contender overlaps on only one seat
        let wanted = if i % 2 == 0 { seats.clone() } else { vec![seats[1]] };
        handles.push(tokio::spawn(async move {
            h.state
                .locks
                .lock_seats(event_id, Uuid::new_v4(), &wanted, None)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(BookingError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(winners, 1);

    let listing = h.state.inventory.list_seats(event_id).await.unwrap();
    let locked = listing.seats.iter().filter(|s| s.status == SeatStatus::Locked).count();
    assert!(locked == 1 || locked == 2);
}
