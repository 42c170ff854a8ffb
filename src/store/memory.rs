//! In-process store used by tests and single-node development runs.
//!
//! Lock order is always `seats`, then `bookings`, then `registrations`.
//! `catalog` is never held together with another lock. No guard lives across
//! an await point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{
    Admission, BookingTransition, CancelOutcome, CasOutcome, CatalogStore, InventoryStore,
    RegistrationStore, SeatWrite, TransitionOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    refundable_amount, Booking, BookingSeat, EventRecord, EventRegistration,
    EventSeat, NewSeat, Payment, PaymentStatus, Refund, RefundStatus, RegistrationStatus, Seat,
    SeatStatus, WaitlistEntry,
};

#[derive(Default)]
struct CatalogTables {
    next_id: i64,
    seats: BTreeMap<i64, Seat>,
}

#[derive(Default)]
struct SeatTables {
    next_id: i64,
    rows: BTreeMap<i64, EventSeat>,
}

#[derive(Default)]
struct BookingTables {
    bookings: HashMap<Uuid, Booking>,
    booking_seats: HashMap<Uuid, Vec<BookingSeat>>,
    payments: HashMap<Uuid, Payment>,
    refunds: HashMap<Uuid, Refund>,
}

#[derive(Default)]
struct RegistrationTables {
    events: HashMap<Uuid, EventRecord>,
    registrations: HashMap<(Uuid, Uuid), EventRegistration>,
    waitlist: HashMap<(Uuid, Uuid), WaitlistEntry>,
}

impl RegistrationTables {
    fn waiting(&self, event_id: Uuid) -> Vec<WaitlistEntry> {
        let mut entries: Vec<WaitlistEntry> = self
            .waitlist
            .values()
            .filter(|w| w.event_id == event_id && w.is_waiting())
            .cloned()
            .collect();
        entries.sort_by_key(|w| w.position);
        entries
    }

    /// Moves every waiting entry behind `vacated` one place forward.
    fn close_gap(&mut self, event_id: Uuid, vacated: i32) {
        for entry in self.waitlist.values_mut() {
            if entry.event_id == event_id && entry.is_waiting() && entry.position > vacated {
                entry.position -= 1;
            }
        }
    }

    fn enqueue(&mut self, event_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> WaitlistEntry {
        if let Some(existing) = self.waitlist.get(&(event_id, user_id)) {
            if existing.is_waiting() {
                return existing.clone();
            }
        }
        let position = self.waiting(event_id).len() as i32 + 1;
        let entry = WaitlistEntry {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            position,
            added_at: now,
            promoted_at: None,
        };
        // a previously promoted row for this pair is replaced
        self.waitlist.insert((event_id, user_id), entry.clone());
        entry
    }

    fn status_matches(&self, key: &(Uuid, Uuid), expected: Option<RegistrationStatus>) -> bool {
        self.registrations.get(key).map(|r| r.status) == expected
    }

    fn cancel_and_promote(&mut self, cancelled: &EventRegistration, now: DateTime<Utc>) -> CancelOutcome {
        let event_id = cancelled.event_id;
        let key = (event_id, cancelled.user_id);
        if !self.status_matches(&key, Some(RegistrationStatus::Approved)) {
            return CancelOutcome {
                applied: false,
                promoted: None,
            };
        }
        self.registrations.insert(key, cancelled.clone());

        let front = self.waiting(event_id).into_iter().next();
        let promoted = match front {
            Some(entry) => {
                if let Some(row) = self.waitlist.get_mut(&(event_id, entry.user_id)) {
                    row.promoted_at = Some(now);
                }
                self.close_gap(event_id, entry.position);

                let mut registration = self
                    .registrations
                    .get(&(event_id, entry.user_id))
                    .cloned()
                    .unwrap_or_else(|| {
                        EventRegistration::new(event_id, entry.user_id, RegistrationStatus::Approved, now)
                    });
                registration.status = RegistrationStatus::Approved;
                registration.reviewed_at = Some(now);
                registration.cancelled_at = None;
                registration.cancellation_reason = None;
                self.registrations
                    .insert((event_id, entry.user_id), registration.clone());
                Some(registration)
            }
            None => {
                if let Some(event) = self.events.get_mut(&event_id) {
                    event.registration_count = (event.registration_count - 1).max(0);
                }
                None
            }
        };

        CancelOutcome {
            applied: true,
            promoted,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    catalog: RwLock<CatalogTables>,
    seats: RwLock<SeatTables>,
    bookings: Mutex<BookingTables>,
    registrations: Mutex<RegistrationTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stale_seats(rows: &BTreeMap<i64, EventSeat>, writes: &[SeatWrite]) -> Vec<i64> {
    writes
        .iter()
        .filter(|w| {
            rows.get(&w.seat_id())
                .map_or(true, |row| row.version != w.expected_version)
        })
        .map(SeatWrite::seat_id)
        .collect()
}

fn apply_writes(rows: &mut BTreeMap<i64, EventSeat>, writes: &[SeatWrite]) {
    for write in writes {
        rows.insert(write.seat_id(), write.next.clone());
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_seats(&self, venue_id: Uuid, seats: &[NewSeat]) -> StoreResult<Vec<Seat>> {
        let mut catalog = self.catalog.write();

        for new in seats {
            let taken = catalog
                .seats
                .values()
                .any(|s| s.venue_id == venue_id && s.position() == new.position());
            if taken {
                return Err(StoreError::Duplicate(format!(
                    "seat {}/{}/{} already exists",
                    new.section, new.row_label, new.seat_number
                )));
            }
        }

        let mut created = Vec::with_capacity(seats.len());
        for new in seats {
            catalog.next_id += 1;
            let seat = Seat {
                id: catalog.next_id,
                venue_id,
                section: new.section.clone(),
                row_label: new.row_label.clone(),
                seat_number: new.seat_number,
                seat_type: new.seat_type,
            };
            catalog.seats.insert(seat.id, seat.clone());
            created.push(seat);
        }
        Ok(created)
    }

    async fn venue_seats(&self, venue_id: Uuid) -> StoreResult<Vec<Seat>> {
        let catalog = self.catalog.read();
        let mut seats: Vec<Seat> = catalog
            .seats
            .values()
            .filter(|s| s.venue_id == venue_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.position().cmp(&b.position()));
        Ok(seats)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn event(&self, event_id: Uuid) -> StoreResult<Option<EventRecord>> {
        Ok(self.registrations.lock().events.get(&event_id).cloned())
    }

    async fn save_event(&self, event: &EventRecord) -> StoreResult<()> {
        self.registrations.lock().events.insert(event.id, event.clone());
        Ok(())
    }

    async fn instantiate_event_seats(
        &self,
        event_id: Uuid,
        seats: &[(i64, Decimal)],
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tables = self.seats.write();
        let mut created = 0;
        for (seat_id, price) in seats {
            let exists = tables
                .rows
                .values()
                .any(|r| r.event_id == event_id && r.seat_id == *seat_id);
            if exists {
                continue;
            }
            tables.next_id += 1;
            let id = tables.next_id;
            tables.rows.insert(id, EventSeat::new(id, event_id, *seat_id, *price, now));
            created += 1;
        }
        Ok(created)
    }

    async fn seat_map(&self, event_id: Uuid) -> StoreResult<Vec<(EventSeat, Seat)>> {
        let rows: Vec<EventSeat> = self
            .seats
            .read()
            .rows
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();

        let catalog = self.catalog.read();
        let mut map: Vec<(EventSeat, Seat)> = rows
            .into_iter()
            .filter_map(|row| catalog.seats.get(&row.seat_id).cloned().map(|seat| (row, seat)))
            .collect();
        map.sort_by(|(_, a), (_, b)| a.position().cmp(&b.position()));
        Ok(map)
    }

    async fn count_available(&self, event_id: Uuid) -> StoreResult<i64> {
        let count = self
            .seats
            .read()
            .rows
            .values()
            .filter(|r| r.event_id == event_id && r.status == SeatStatus::Available)
            .count();
        Ok(count as i64)
    }

    async fn load_seats(&self, event_id: Uuid, seat_ids: &[i64]) -> StoreResult<Vec<EventSeat>> {
        let tables = self.seats.read();
        Ok(seat_ids
            .iter()
            .filter_map(|id| tables.rows.get(id))
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn apply_seat_writes(&self, writes: &[SeatWrite]) -> StoreResult<CasOutcome> {
        let mut tables = self.seats.write();
        let stale = stale_seats(&tables.rows, writes);
        if !stale.is_empty() {
            return Ok(CasOutcome::Stale(stale));
        }
        apply_writes(&mut tables.rows, writes);
        Ok(CasOutcome::Applied)
    }

    async fn expired_locks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<EventSeat>> {
        Ok(self
            .seats
            .read()
            .rows
            .values()
            .filter(|r| r.has_expired_lock(now))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert_booking(
        &self,
        booking: &Booking,
        seats: &[BookingSeat],
        writes: &[SeatWrite],
    ) -> StoreResult<CasOutcome> {
        let mut seat_tables = self.seats.write();
        let stale = stale_seats(&seat_tables.rows, writes);
        if !stale.is_empty() {
            return Ok(CasOutcome::Stale(stale));
        }

        let mut tables = self.bookings.lock();
        apply_writes(&mut seat_tables.rows, writes);
        tables.bookings.insert(booking.id, booking.clone());
        tables.booking_seats.insert(booking.id, seats.to_vec());
        Ok(CasOutcome::Applied)
    }

    async fn booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.bookings.lock().bookings.get(&booking_id).cloned())
    }

    async fn user_bookings(&self, user_id: Uuid) -> StoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .lock()
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn active_booking(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self
            .bookings
            .lock()
            .bookings
            .values()
            .find(|b| b.event_id == event_id && b.user_id == user_id && b.status.is_active())
            .cloned())
    }

    async fn booking_seats(&self, booking_id: Uuid) -> StoreResult<Vec<BookingSeat>> {
        Ok(self
            .bookings
            .lock()
            .booking_seats
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_booking_transition(
        &self,
        transition: &BookingTransition,
    ) -> StoreResult<TransitionOutcome> {
        let mut seat_tables = self.seats.write();
        let mut tables = self.bookings.lock();

        let current = tables.bookings.get(&transition.booking.id).map(|b| b.status);
        if current != Some(transition.expected_status) {
            return Ok(TransitionOutcome::StaleBooking);
        }

        let stale = stale_seats(&seat_tables.rows, &transition.seat_writes);
        if !stale.is_empty() {
            return Ok(TransitionOutcome::StaleSeats(stale));
        }

        if let Some(payment) = &transition.payment {
            let clash = tables
                .payments
                .values()
                .any(|p| p.transaction_id == payment.transaction_id && p.id != payment.id);
            if clash {
                return Err(StoreError::Duplicate(format!(
                    "transaction {} already recorded",
                    payment.transaction_id
                )));
            }
        }

        apply_writes(&mut seat_tables.rows, &transition.seat_writes);
        tables
            .bookings
            .insert(transition.booking.id, transition.booking.clone());
        if let Some(payment) = &transition.payment {
            tables.payments.insert(payment.id, payment.clone());
        }
        if let Some(refund) = &transition.refund {
            tables.refunds.insert(refund.id, refund.clone());
        }
        let promoted = transition.registration_release.as_ref().and_then(|cancelled| {
            self.registrations
                .lock()
                .cancel_and_promote(cancelled, transition.booking.updated_at)
                .promoted
        });
        Ok(TransitionOutcome::Applied { promoted })
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Booking>> {
        let mut overdue: Vec<Booking> = self
            .bookings
            .lock()
            .bookings
            .values()
            .filter(|b| b.payment_window_elapsed(now))
            .cloned()
            .collect();
        overdue.sort_by_key(|b| b.expires_at);
        overdue.truncate(limit.max(0) as usize);
        Ok(overdue)
    }

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        Ok(self.bookings.lock().payments.get(&payment_id).cloned())
    }

    async fn payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .bookings
            .lock()
            .payments
            .values()
            .find(|p| p.transaction_id == transaction_id)
            .cloned())
    }

    async fn booking_payments(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .bookings
            .lock()
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn save_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut tables = self.bookings.lock();
        let clash = tables
            .payments
            .values()
            .any(|p| p.transaction_id == payment.transaction_id && p.id != payment.id);
        if clash {
            return Err(StoreError::Duplicate(format!(
                "transaction {} already recorded",
                payment.transaction_id
            )));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn refund(&self, refund_id: Uuid) -> StoreResult<Option<Refund>> {
        Ok(self.bookings.lock().refunds.get(&refund_id).cloned())
    }

    async fn payment_refunds(&self, payment_id: Uuid) -> StoreResult<Vec<Refund>> {
        let mut refunds: Vec<Refund> = self
            .bookings
            .lock()
            .refunds
            .values()
            .filter(|r| r.payment_id == payment_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn insert_refund(&self, refund: &Refund) -> StoreResult<bool> {
        let mut tables = self.bookings.lock();
        let Some(payment) = tables.payments.get(&refund.payment_id).cloned() else {
            return Ok(false);
        };
        let existing: Vec<Refund> = tables.refunds.values().cloned().collect();
        if refundable_amount(&payment, &existing) < refund.amount {
            return Ok(false);
        }
        tables.refunds.insert(refund.id, refund.clone());
        Ok(true)
    }

    async fn settle_refund(&self, refund: &Refund, payment_refunded: bool) -> StoreResult<bool> {
        let mut tables = self.bookings.lock();
        let pending = tables
            .refunds
            .get(&refund.id)
            .is_some_and(|r| r.status == RefundStatus::Pending);
        if !pending {
            return Ok(false);
        }
        tables.refunds.insert(refund.id, refund.clone());
        if payment_refunded {
            if let Some(payment) = tables.payments.get_mut(&refund.payment_id) {
                payment.status = PaymentStatus::Refunded;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<EventRegistration>> {
        Ok(self
            .registrations
            .lock()
            .registrations
            .get(&(event_id, user_id))
            .cloned())
    }

    async fn event_registrations(&self, event_id: Uuid) -> StoreResult<Vec<EventRegistration>> {
        let mut regs: Vec<EventRegistration> = self
            .registrations
            .lock()
            .registrations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        regs.sort_by_key(|r| r.registered_at);
        Ok(regs)
    }

    async fn save_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
    ) -> StoreResult<bool> {
        let mut tables = self.registrations.lock();
        let key = (registration.event_id, registration.user_id);
        if !tables.status_matches(&key, expected) {
            return Ok(false);
        }
        tables.registrations.insert(key, registration.clone());
        Ok(true)
    }

    async fn admit_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
        queue_when_full: bool,
    ) -> StoreResult<Admission> {
        let mut tables = self.registrations.lock();
        let key = (registration.event_id, registration.user_id);
        if !tables.status_matches(&key, expected) {
            return Ok(Admission::Stale);
        }

        let Some(event) = tables.events.get_mut(&registration.event_id) else {
            return Ok(Admission::Full);
        };
        if event.is_full() {
            if queue_when_full {
                let entry = tables.enqueue(
                    registration.event_id,
                    registration.user_id,
                    registration.registered_at,
                );
                return Ok(Admission::Waitlisted(entry));
            }
            return Ok(Admission::Full);
        }

        event.registration_count += 1;
        tables.registrations.insert(key, registration.clone());
        Ok(Admission::Admitted)
    }

    async fn enqueue_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntry> {
        Ok(self.registrations.lock().enqueue(event_id, user_id, now))
    }

    async fn waitlist_entry(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntry>> {
        Ok(self
            .registrations
            .lock()
            .waitlist
            .get(&(event_id, user_id))
            .cloned())
    }

    async fn waitlist(&self, event_id: Uuid) -> StoreResult<Vec<WaitlistEntry>> {
        Ok(self.registrations.lock().waiting(event_id))
    }

    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.registrations.lock();
        let key = (event_id, user_id);
        let position = match tables.waitlist.get(&key) {
            Some(entry) if entry.is_waiting() => entry.position,
            _ => return Ok(false),
        };
        tables.waitlist.remove(&key);
        tables.close_gap(event_id, position);
        Ok(true)
    }

    async fn cancel_and_promote(
        &self,
        cancelled: &EventRegistration,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome> {
        Ok(self.registrations.lock().cancel_and_promote(cancelled, now))
    }
}
