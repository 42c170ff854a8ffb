//! Registration state machine, capacity counter and waitlist.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::Duration;
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

use common::Harness;
use event_booking::error::BookingError;
use event_booking::models::{RegistrationMode, RegistrationStatus};
use event_booking::notify::DomainEvent;
use event_booking::services::RegistrationOutcome;
use event_booking::store::RegistrationStore;

fn waitlisted_position(outcome: &RegistrationOutcome) -> i32 {
    match outcome {
        RegistrationOutcome::Waitlisted(entry) => entry.position,
        other => panic!("expected a waitlist entry, got {other:?}"),
    }
}

#[tokio::test]
async fn auto_approve_admits_until_full_then_queues() {
    let h = Harness::new();
    let event_id = h.admission_event(2, RegistrationMode::AutoApprove).await;
    let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    for user in &users[..2] {
        let outcome = h.state.registrations.register(event_id, *user).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Approved(ref r) if r.status == RegistrationStatus::Approved));
    }
    assert_eq!(h.registration_count(event_id).await, 2);

    for (i, user) in users[2..].iter().enumerate() {
        h.clock.advance(Duration::seconds(1));
        let outcome = h.state.registrations.register(event_id, *user).await.unwrap();
        assert_eq!(waitlisted_position(&outcome), i as i32 + 1);
    }
    assert_eq!(h.registration_count(event_id).await, 2);
    assert!(h.store.registration(event_id, users[3]).await.unwrap().is_none());

    // registering again is answered from the existing state
    let again = h.state.registrations.register(event_id, users[0]).await.unwrap();
    assert!(matches!(again, RegistrationOutcome::Approved(_)));
    let again = h.state.registrations.register(event_id, users[3]).await.unwrap();
    assert_eq!(waitlisted_position(&again), 2);
    assert_eq!(h.state.registrations.waitlist(event_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn cancellation_hands_the_place_to_the_front_of_the_queue() {
    let h = Harness::new();
    let mut events = h.events();
    let event_id = h.admission_event(1, RegistrationMode::AutoApprove).await;
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    h.state.registrations.register(event_id, u1).await.unwrap();
    h.clock.advance(Duration::seconds(1));
    h.state.registrations.register(event_id, u2).await.unwrap();
    h.clock.advance(Duration::seconds(1));
    h.state.registrations.register(event_id, u3).await.unwrap();

    let cancelled = h
        .state
        .registrations
        .cancel(event_id, u1, Some("cannot attend".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("cannot attend"));

    let promoted = h.state.registrations.registration(event_id, u2).await.unwrap();
    assert_eq!(promoted.status, RegistrationStatus::Approved);
    assert_eq!(h.registration_count(event_id).await, 1);

    let queue = h.state.registrations.waitlist(event_id).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].user_id, u3);
    assert_eq!(queue[0].position, 1);

    let entry = h.store.waitlist_entry(event_id, u2).await.unwrap().unwrap();
    assert!(entry.promoted_at.is_some());

    match events.try_recv().unwrap() {
        DomainEvent::WaitlistPromoted { user_id, registration_id, .. } => {
            assert_eq!(user_id, u2);
            assert_eq!(registration_id, promoted.id);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // a second cancel is a no-op and must not free another place
    h.state.registrations.cancel(event_id, u1, None).await.unwrap();
    assert_eq!(h.registration_count(event_id).await, 1);
    assert_eq!(h.state.registrations.waitlist(event_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_with_empty_queue_frees_capacity() {
    let h = Harness::new();
    let event_id = h.admission_event(1, RegistrationMode::AutoApprove).await;
    let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

    let first = h.state.registrations.register(event_id, u1).await.unwrap();
    let RegistrationOutcome::Approved(original) = first else {
        panic!("expected approval");
    };
    h.state.registrations.cancel(event_id, u1, None).await.unwrap();
    assert_eq!(h.registration_count(event_id).await, 0);

    // re-registration reuses the cancelled row
    let outcome = h.state.registrations.register(event_id, u1).await.unwrap();
    let RegistrationOutcome::Approved(again) = outcome else {
        panic!("expected approval");
    };
    assert_eq!(again.id, original.id);
    assert_eq!(h.registration_count(event_id).await, 1);

    let outcome = h.state.registrations.register(event_id, u2).await.unwrap();
    assert_eq!(waitlisted_position(&outcome), 1);
}

#[tokio::test]
async fn manual_approval_flow() {
    let h = Harness::new();
    let event_id = h.admission_event(1, RegistrationMode::ManualApproval).await;
    let reviewer = Uuid::new_v4();
    let (u1, u2, u3) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    assert!(matches!(
        h.state.registrations.register(event_id, u1).await.unwrap(),
        RegistrationOutcome::Pending(_)
    ));
    assert!(matches!(
        h.state.registrations.register(event_id, u2).await.unwrap(),
        RegistrationOutcome::Pending(_)
    ));
    assert_eq!(h.registration_count(event_id).await, 0);

    let approved = h.state.registrations.approve(event_id, u1, reviewer).await.unwrap();
    assert_eq!(approved.status, RegistrationStatus::Approved);
    assert_eq!(approved.reviewed_by, Some(reviewer));
    assert_eq!(h.registration_count(event_id).await, 1);

    // approving twice changes nothing
    h.state.registrations.approve(event_id, u1, reviewer).await.unwrap();
    assert_eq!(h.registration_count(event_id).await, 1);

    let err = h.state.registrations.approve(event_id, u2, reviewer).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(_)));

    let err = h.state.registrations.reject(event_id, u2, reviewer, "  ").await.unwrap_err();
    assert!(matches!(err, BookingError::Validation(_)));
    let rejected = h
        .state
        .registrations
        .reject(event_id, u2, reviewer, "event is full")
        .await
        .unwrap();
    assert_eq!(rejected.status, RegistrationStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("event is full"));

    let err = h.state.registrations.register(event_id, u2).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(_)));
    let err = h.state.registrations.approve(event_id, u2, reviewer).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(_)));

    let outcome = h.state.registrations.register(event_id, u3).await.unwrap();
    assert_eq!(waitlisted_position(&outcome), 1);
}

#[tokio::test]
async fn leaving_the_waitlist_closes_the_gap() {
    let h = Harness::new();
    let event_id = h.admission_event(1, RegistrationMode::AutoApprove).await;
    let users: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    for user in &users {
        h.clock.advance(Duration::seconds(1));
        h.state.registrations.register(event_id, *user).await.unwrap();
    }

    h.state.registrations.leave_waitlist(event_id, users[2]).await.unwrap();
    let queue = h.state.registrations.waitlist(event_id).await.unwrap();
    let order: Vec<(Uuid, i32)> = queue.iter().map(|w| (w.user_id, w.position)).collect();
    assert_eq!(order, vec![(users[1], 1), (users[3], 2)]);

    let err = h.state.registrations.leave_waitlist(event_id, users[2]).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));
    let err = h.state.registrations.leave_waitlist(event_id, users[0]).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));
}

#[tokio::test]
async fn seat_mapped_events_do_not_take_registrations() {
    let h = Harness::new();
    let ev = h.seated_event().await;
    let err = h
        .state
        .registrations
        .register(ev.event_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(_)));

    let err = h
        .state
        .registrations
        .register(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));
}

#[tokio::test]
async fn check_in_is_recorded_once() {
    let h = Harness::new();
    let event_id = h.admission_event(5, RegistrationMode::AutoApprove).await;
    let (user, staff) = (Uuid::new_v4(), Uuid::new_v4());
    h.state.registrations.register(event_id, user).await.unwrap();

    let first = h.state.registrations.check_in(event_id, user, staff).await.unwrap();
    assert_eq!(first.checked_in_by, Some(staff));
    assert!(first.checked_in_at.is_some());

    h.clock.advance(Duration::minutes(5));
    let second = h.state.registrations.check_in(event_id, user, Uuid::new_v4()).await.unwrap();
    assert_eq!(second.checked_in_at, first.checked_in_at);
    assert_eq!(second.checked_in_by, Some(staff));

    h.state.registrations.cancel(event_id, user, None).await.unwrap();
    let err = h.state.registrations.check_in(event_id, user, staff).await.unwrap_err();
    assert!(matches!(err, BookingError::InvalidState(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancellations_promote_once_per_freed_place() {
    let h = Arc::new(Harness::new());
    let mut events = h.events();
    let event_id = h.admission_event(2, RegistrationMode::AutoApprove).await;
    let approved: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
    let queued: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for user in approved.iter().chain(&queued) {
        h.clock.advance(Duration::seconds(1));
        h.state.registrations.register(event_id, *user).await.unwrap();
    }

    // each approved user cancels twice at once
    let mut handles = Vec::new();
    for user in approved.iter().chain(&approved) {
        let (h, user) = (h.clone(), *user);
        handles.push(tokio::spawn(async move {
            h.state.registrations.cancel(event_id, user, None).await
        }));
    }
    for handle in handles {
        let cancelled = handle.await.unwrap().unwrap();
        assert_eq!(cancelled.status, RegistrationStatus::Cancelled);
    }

    assert_eq!(h.registration_count(event_id).await, 2);
    for user in &queued[..2] {
        let promoted = h.state.registrations.registration(event_id, *user).await.unwrap();
        assert_eq!(promoted.status, RegistrationStatus::Approved);
    }
    let queue = h.state.registrations.waitlist(event_id).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!((queue[0].user_id, queue[0].position), (queued[2], 1));

    let mut promoted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::WaitlistPromoted { user_id, .. } = event {
            promoted.push(user_id);
        }
    }
    promoted.sort();
    let mut expected = queued[..2].to_vec();
    expected.sort();
    assert_eq!(promoted, expected);
}

#[derive(Debug, Clone)]
enum Op {
    Register(usize),
    Cancel(usize),
    Leave(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..6usize).prop_map(Op::Register),
        2 => (0..6usize).prop_map(Op::Cancel),
        1 => (0..6usize).prop_map(Op::Leave),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever the interleaving, the counter equals the approved count, never
    /// exceeds capacity, and nobody waits while a place is free.
    #[test]
    fn prop_counter_and_waitlist_stay_consistent(
        capacity in 0..4i32,
        ops in proptest::collection::vec(arb_op(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            let event_id = h.admission_event(capacity, RegistrationMode::AutoApprove).await;
            let users: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();

            for op in ops {
                h.clock.advance(Duration::seconds(1));
                // rejected operations are part of the input space
                let _ = match op {
                    Op::Register(i) => h.state.registrations.register(event_id, users[i]).await.map(|_| ()),
                    Op::Cancel(i) => h.state.registrations.cancel(event_id, users[i], None).await.map(|_| ()),
                    Op::Leave(i) => h.state.registrations.leave_waitlist(event_id, users[i]).await,
                };

                let count = h.registration_count(event_id).await;
                let approved = h
                    .store
                    .event_registrations(event_id)
                    .await
                    .unwrap()
                    .iter()
                    .filter(|r| r.status == RegistrationStatus::Approved)
                    .count() as i32;
                let queue = h.state.registrations.waitlist(event_id).await.unwrap();
                let positions: Vec<i32> = queue.iter().map(|w| w.position).collect();

                assert_eq!(count, approved);
                assert!(count <= capacity);
                assert_eq!(positions, (1..=queue.len() as i32).collect::<Vec<_>>());
                assert!(queue.is_empty() || count == capacity);
                assert!(queue.windows(2).all(|w| w[0].added_at <= w[1].added_at));
            }
        });
    }
}
