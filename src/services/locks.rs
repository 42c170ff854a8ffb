//! Time-boxed holds on inventory seats.
//!
//! Every multi-seat change is all-or-nothing: the seats are read, checked,
//! and written back as one compare-and-set batch. A batch that loses a race is
//! re-read and re-checked up to `max_cas_attempts` times.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::inventory::SeatInventory;
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult};
use crate::models::{EventSeat, SeatStatus};
use crate::store::{CasOutcome, SeatWrite, Store};

#[derive(Debug, Clone, Serialize)]
pub struct SeatLock {
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub seats: Vec<EventSeat>,
    pub expires_at: DateTime<Utc>,
    pub total_amount: Decimal,
}

pub struct LockManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

/// Sorted, de-duplicated seat ids.
fn distinct(seat_ids: &[i64]) -> Vec<i64> {
    seat_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: BookingConfig) -> Self {
        Self { store, clock, config }
    }

    /// Loads exactly the requested rows or fails with the ids that do not exist.
    async fn load_all(&self, event_id: Uuid, ids: &[i64]) -> BookingResult<Vec<EventSeat>> {
        let seats = self.store.load_seats(event_id, ids).await?;
        if seats.len() != ids.len() {
            let missing: Vec<i64> = ids
                .iter()
                .filter(|id| !seats.iter().any(|s| s.id == **id))
                .copied()
                .collect();
            return Err(BookingError::not_found(format!("seats {missing:?}")));
        }
        Ok(seats)
    }

    /// Moves every seat in `ids` through `next` if all of them pass `allowed`.
    async fn transition_all<A, N>(
        &self,
        event_id: Uuid,
        ids: &[i64],
        allowed: A,
        next: N,
    ) -> BookingResult<Vec<EventSeat>>
    where
        A: Fn(&EventSeat, DateTime<Utc>) -> bool + Send + Sync,
        N: Fn(&EventSeat, DateTime<Utc>) -> EventSeat + Send + Sync,
    {
        let attempts = self.config.max_cas_attempts.max(1);
        let mut stale = Vec::new();

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let seats = self.load_all(event_id, ids).await?;

            let conflicting: Vec<i64> = seats
                .iter()
                .filter(|s| !allowed(s, now))
                .map(|s| s.id)
                .collect();
            if !conflicting.is_empty() {
                return Err(BookingError::Conflict {
                    seat_ids: conflicting,
                });
            }

            let writes: Vec<SeatWrite> = seats
                .iter()
                .map(|s| SeatWrite::new(s, next(s, now)))
                .collect();

            match self.store.apply_seat_writes(&writes).await? {
                CasOutcome::Applied => return Ok(writes.into_iter().map(|w| w.next).collect()),
                CasOutcome::Stale(ids) => {
                    debug!("seat CAS lost on attempt {}/{}: {:?}", attempt, attempts, ids);
                    stale = ids;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    }
                }
            }
        }

        warn!("giving up on seats {:?} of event {} after {} attempts", stale, event_id, attempts);
        Err(BookingError::Conflict { seat_ids: stale })
    }

    pub async fn lock_seats(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        seat_ids: &[i64],
        ttl: Option<Duration>,
    ) -> BookingResult<SeatLock> {
        let ids = distinct(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::validation("no seats requested"));
        }
        if ids.len() > self.config.max_seats_per_lock {
            return Err(BookingError::validation(format!(
                "at most {} seats can be locked at once",
                self.config.max_seats_per_lock
            )));
        }

        let ttl = ttl.unwrap_or_else(|| self.config.lock_ttl());
        if ttl <= Duration::zero() || ttl > self.config.max_lock_ttl() {
            return Err(BookingError::validation(format!(
                "lock ttl must be between 1 and {} seconds",
                self.config.max_lock_ttl_secs
            )));
        }

        SeatInventory::require_event(self.store.as_ref(), event_id).await?;

        let seats = self
            .transition_all(
                event_id,
                &ids,
                |seat, now| seat.lockable_by(user_id, now),
                |seat, now| seat.locked(user_id, now + ttl, now),
            )
            .await?;
        let expires_at = seats
            .iter()
            .filter_map(|s| s.lock_expires_at)
            .min()
            .unwrap_or_else(|| self.clock.now() + ttl);

        let total_amount = seats.iter().map(|s| s.price).sum();
        info!(
            "User {} locked {} seats of event {} until {}",
            user_id,
            seats.len(),
            event_id,
            expires_at
        );

        Ok(SeatLock {
            event_id,
            user_id,
            seats,
            expires_at,
            total_amount,
        })
    }

    /// Releases the seats among `seat_ids` that `user_id` holds. Anything else
    /// is left untouched. Returns the ids actually released.
    pub async fn release_seats(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        seat_ids: &[i64],
    ) -> BookingResult<Vec<i64>> {
        let ids = distinct(seat_ids);
        let attempts = self.config.max_cas_attempts.max(1);

        for attempt in 1..=attempts {
            let now = self.clock.now();
            let writes: Vec<SeatWrite> = self
                .store
                .load_seats(event_id, &ids)
                .await?
                .iter()
                .filter(|s| s.status == SeatStatus::Locked && s.locked_by == Some(user_id))
                .map(|s| SeatWrite::new(s, s.released(now)))
                .collect();

            if writes.is_empty() {
                return Ok(Vec::new());
            }

            match self.store.apply_seat_writes(&writes).await? {
                CasOutcome::Applied => {
                    let released: Vec<i64> = writes.iter().map(SeatWrite::seat_id).collect();
                    info!("User {} released seats {:?} of event {}", user_id, released, event_id);
                    return Ok(released);
                }
                CasOutcome::Stale(stale) => {
                    debug!("release CAS lost on attempt {}/{}: {:?}", attempt, attempts, stale);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff(attempt)).await;
                    }
                }
            }
        }

        Err(BookingError::Conflict { seat_ids: ids })
    }

    /// Organiser hold: AVAILABLE seats become BLOCKED.
    pub async fn block_seats(&self, event_id: Uuid, seat_ids: &[i64]) -> BookingResult<Vec<EventSeat>> {
        let ids = distinct(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::validation("no seats requested"));
        }
        let seats = self
            .transition_all(
                event_id,
                &ids,
                |seat, _| seat.status == SeatStatus::Available,
                |seat, now| seat.blocked(now),
            )
            .await?;
        info!("Blocked {} seats of event {}", seats.len(), event_id);
        Ok(seats)
    }

    pub async fn unblock_seats(&self, event_id: Uuid, seat_ids: &[i64]) -> BookingResult<Vec<EventSeat>> {
        let ids = distinct(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::validation("no seats requested"));
        }
        let seats = self
            .transition_all(
                event_id,
                &ids,
                |seat, _| seat.status == SeatStatus::Blocked,
                |seat, now| seat.released(now),
            )
            .await?;
        info!("Unblocked {} seats of event {}", seats.len(), event_id);
        Ok(seats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_sorts_and_collapses_duplicates() {
        assert_eq!(distinct(&[5, 3, 5, 1, 3]), vec![1, 3, 5]);
        assert!(distinct(&[]).is_empty());
    }
}
