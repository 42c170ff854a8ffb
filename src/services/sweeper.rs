use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::bookings::BookingEngine;
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::BookingError;
use crate::models::EventSeat;
use crate::store::{CasOutcome, SeatWrite, Store};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub locks_reclaimed: usize,
    /// Seats that changed between read and write, usually because the holder
    /// booked them in the same instant.
    pub locks_skipped: usize,
    pub bookings_expired: usize,
    pub failures: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

/// Periodic reclaim of dead seat locks and unpaid bookings.
///
/// Every seat is reclaimed by its own compare-and-set, so a booking that
/// claims the seat first simply makes the reclaim a no-op. One failing item
/// never stops the rest of the sweep.
pub struct ExpirySweeper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    bookings: Arc<BookingEngine>,
    config: BookingConfig,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        bookings: Arc<BookingEngine>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            bookings,
            config,
        }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        self.reclaim_locks(&mut report).await;
        self.expire_bookings(&mut report).await;

        if !report.is_empty() {
            info!(
                "🧹 Sweep done: {} locks reclaimed, {} skipped, {} bookings expired, {} failures",
                report.locks_reclaimed,
                report.locks_skipped,
                report.bookings_expired,
                report.failures
            );
        }
        report
    }

    async fn reclaim_locks(&self, report: &mut SweepReport) {
        let now = self.clock.now();
        match self.store.expired_locks(now, self.config.sweep_batch_size).await {
            Ok(expired) => self.reclaim(expired, now, report).await,
            Err(e) => {
                error!("Failed to load expired locks: {}", e);
                report.failures += 1;
            }
        }
    }

    /// Releases each listed seat unless it changed since it was read.
    async fn reclaim(&self, expired: Vec<EventSeat>, now: DateTime<Utc>, report: &mut SweepReport) {
        for seat in expired {
            let write = SeatWrite::new(&seat, seat.released(now));
            match self.store.apply_seat_writes(&[write]).await {
                Ok(CasOutcome::Applied) => report.locks_reclaimed += 1,
                Ok(CasOutcome::Stale(_)) => {
                    debug!("seat {} changed before reclaim, skipping", seat.id);
                    report.locks_skipped += 1;
                }
                Err(e) => {
                    error!("Failed to reclaim seat {}: {}", seat.id, e);
                    report.failures += 1;
                }
            }
        }
    }

    async fn expire_bookings(&self, report: &mut SweepReport) {
        let now = self.clock.now();
        let overdue = match self
            .store
            .overdue_bookings(now, self.config.sweep_batch_size)
            .await
        {
            Ok(bookings) => bookings,
            Err(e) => {
                error!("Failed to load overdue bookings: {}", e);
                report.failures += 1;
                return;
            }
        };

        for booking in overdue {
            match self.bookings.expire_booking(booking.id).await {
                Ok(_) => report.bookings_expired += 1,
                // paid or cancelled since it was listed
                Err(BookingError::InvalidState(msg)) => {
                    debug!("booking {} not expired: {}", booking.id, msg)
                }
                Err(e) => {
                    error!("Failed to expire booking {}: {}", booking.id, e);
                    report.failures += 1;
                }
            }
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval());
        info!(
            "Expiry sweeper started, interval {:?}",
            self.config.sweep_interval()
        );
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::models::{EventRecord, NewSeat, RegistrationMode, SeatStatus, SeatType};
    use crate::notify::LogNotifier;
    use crate::store::{InventoryStore, MemoryStore};
    use crate::AppState;

    async fn one_seat_event() -> (Arc<AppState>, Arc<ManualClock>, Uuid, i64) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()));
        let store = Arc::new(MemoryStore::new());
        let state = AppState::with_store(Config::default(), store.clone(), clock.clone(), Arc::new(LogNotifier), None);

        let venue_id = Uuid::new_v4();
        let seat = NewSeat {
            section: "MAIN".to_string(),
            row_label: "A".to_string(),
            seat_number: 1,
            seat_type: SeatType::Regular,
        };
        state.catalog.add_venue_seats(venue_id, vec![seat]).await.unwrap();

        let event_id = Uuid::new_v4();
        store
            .save_event(&EventRecord {
                id: event_id,
                venue_id: Some(venue_id),
                capacity: 1,
                registration_count: 0,
                registration_mode: RegistrationMode::AutoApprove,
                ticket_price: dec!(0),
            })
            .await
            .unwrap();
        state
            .inventory
            .configure_event(event_id, &BTreeMap::from([(SeatType::Regular, dec!(80.00))]))
            .await
            .unwrap();
        let seat_id = state.inventory.list_seats(event_id).await.unwrap().seats[0].id;
        (state, clock, event_id, seat_id)
    }

    #[tokio::test]
    async fn seat_changed_after_listing_is_skipped() {
        let (state, clock, event_id, seat_id) = one_seat_event().await;
        let holder = Uuid::new_v4();
        state
            .locks
            .lock_seats(event_id, holder, &[seat_id], Some(Duration::seconds(10)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(11));

        let now = clock.now();
        let listed = state.store.expired_locks(now, 10).await.unwrap();
        assert_eq!(listed.len(), 1);

        // the holder lets go between the listing and the reclaim
        let released = state.locks.release_seats(event_id, holder, &[seat_id]).await.unwrap();
        assert_eq!(released, vec![seat_id]);

        let mut report = SweepReport::default();
        state.sweeper.reclaim(listed, now, &mut report).await;
        assert_eq!(
            report,
            SweepReport {
                locks_skipped: 1,
                ..SweepReport::default()
            }
        );

        let row = state.store.load_seats(event_id, &[seat_id]).await.unwrap().remove(0);
        assert_eq!(row.status, SeatStatus::Available);
        assert_eq!(row.version, 2, "only the holder's release was written");
    }

    #[tokio::test]
    async fn seat_relocked_after_reclaim_by_another_sweeper_is_left_alone() {
        let (state, clock, event_id, seat_id) = one_seat_event().await;
        state
            .locks
            .lock_seats(event_id, Uuid::new_v4(), &[seat_id], Some(Duration::seconds(10)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(11));

        let now = clock.now();
        let listed = state.store.expired_locks(now, 10).await.unwrap();

        // a second sweeper frees the seat and a new user locks it
        assert_eq!(state.sweeper.sweep_once().await.locks_reclaimed, 1);
        let newcomer = Uuid::new_v4();
        state.locks.lock_seats(event_id, newcomer, &[seat_id], None).await.unwrap();

        let mut report = SweepReport::default();
        state.sweeper.reclaim(listed, now, &mut report).await;
        assert_eq!(report.locks_skipped, 1);
        assert_eq!(report.locks_reclaimed, 0);

        let row = state.store.load_seats(event_id, &[seat_id]).await.unwrap().remove(0);
        assert_eq!(row.status, SeatStatus::Locked);
        assert_eq!(row.locked_by, Some(newcomer));
    }
}
