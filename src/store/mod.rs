//! Persistence boundary.
//!
//! The engine only talks to these traits. Every method that changes more than
//! one row is a single atomic unit in both implementations: Postgres runs it in
//! one transaction, the in-memory store under one critical section.
//!
//! Seat rows are written with compare-and-set: a [`SeatWrite`] carries the
//! version the new row was derived from and is rejected when the stored row has
//! moved on since.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    Booking, BookingSeat, BookingStatus, EventRecord, EventRegistration, EventSeat, NewSeat,
    Payment, Refund, RegistrationStatus, Seat, WaitlistEntry,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// New state of one seat, conditional on the version it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatWrite {
    pub next: EventSeat,
    pub expected_version: i32,
}

impl SeatWrite {
    pub fn new(current: &EventSeat, next: EventSeat) -> Self {
        Self {
            expected_version: current.version,
            next,
        }
    }

    pub fn seat_id(&self) -> i64 {
        self.next.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// Nothing was written. Lists the seats whose stored version had moved.
    Stale(Vec<i64>),
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}

/// A booking status change together with everything that must move with it.
#[derive(Debug, Clone)]
pub struct BookingTransition {
    /// The booking as it should be stored afterwards.
    pub booking: Booking,
    /// Status the stored booking must still have.
    pub expected_status: BookingStatus,
    pub seat_writes: Vec<SeatWrite>,
    /// Upserted by id.
    pub payment: Option<Payment>,
    pub refund: Option<Refund>,
    /// Cancelled form of the holder's registration, applied together with
    /// the booking like [`RegistrationStore::cancel_and_promote`]. Skipped
    /// when the stored registration is no longer APPROVED.
    pub registration_release: Option<EventRegistration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Everything was written. `promoted` is the registration created for
    /// the user taken off the waitlist by `registration_release`.
    Applied { promoted: Option<EventRegistration> },
    StaleBooking,
    StaleSeats(Vec<i64>),
}

/// Result of admitting a registration against the capacity counter.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Counter incremented and registration stored as given.
    Admitted,
    /// Event was full; the user was queued instead.
    Waitlisted(WaitlistEntry),
    /// Event was full and queueing was not requested.
    Full,
    /// The stored registration no longer had the expected status.
    Stale,
}

/// Result of cancelling an approved registration.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub applied: bool,
    /// Registration created for the user taken off the front of the waitlist.
    pub promoted: Option<EventRegistration>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts every seat or none. Fails with `Duplicate` when a position is taken.
    async fn insert_seats(&self, venue_id: Uuid, seats: &[NewSeat]) -> StoreResult<Vec<Seat>>;

    async fn venue_seats(&self, venue_id: Uuid) -> StoreResult<Vec<Seat>>;
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn event(&self, event_id: Uuid) -> StoreResult<Option<EventRecord>>;

    /// Upserts the event projection this engine works against.
    async fn save_event(&self, event: &EventRecord) -> StoreResult<()>;

    /// Creates missing inventory rows; returns how many were created.
    async fn instantiate_event_seats(
        &self,
        event_id: Uuid,
        seats: &[(i64, Decimal)],
        now: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Snapshot of every inventory row of an event with its catalog seat.
    async fn seat_map(&self, event_id: Uuid) -> StoreResult<Vec<(EventSeat, Seat)>>;

    /// Rows stored as AVAILABLE. Expired locks count once the sweeper has
    /// reclaimed them.
    async fn count_available(&self, event_id: Uuid) -> StoreResult<i64>;

    /// Rows of `event_id` among `seat_ids`; unknown ids are simply absent.
    async fn load_seats(&self, event_id: Uuid, seat_ids: &[i64]) -> StoreResult<Vec<EventSeat>>;

    async fn apply_seat_writes(&self, writes: &[SeatWrite]) -> StoreResult<CasOutcome>;

    /// LOCKED rows whose expiry is strictly before `now`.
    async fn expired_locks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<EventSeat>>;

    /// Stores a new booking and its seat rows only if every seat write applies.
    async fn insert_booking(
        &self,
        booking: &Booking,
        seats: &[BookingSeat],
        writes: &[SeatWrite],
    ) -> StoreResult<CasOutcome>;

    async fn booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>>;

    async fn user_bookings(&self, user_id: Uuid) -> StoreResult<Vec<Booking>>;

    /// PENDING or CONFIRMED booking of a user for an event.
    async fn active_booking(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Booking>>;

    async fn booking_seats(&self, booking_id: Uuid) -> StoreResult<Vec<BookingSeat>>;

    async fn apply_booking_transition(
        &self,
        transition: &BookingTransition,
    ) -> StoreResult<TransitionOutcome>;

    /// PENDING bookings whose payment window has closed at `now`.
    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Booking>>;

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>>;

    async fn booking_payments(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>>;

    /// Upsert by id. `Duplicate` when the transaction id belongs to another payment.
    async fn save_payment(&self, payment: &Payment) -> StoreResult<()>;

    async fn refund(&self, refund_id: Uuid) -> StoreResult<Option<Refund>>;

    async fn payment_refunds(&self, payment_id: Uuid) -> StoreResult<Vec<Refund>>;

    /// Inserts the refund only if the payment still has enough refundable amount.
    async fn insert_refund(&self, refund: &Refund) -> StoreResult<bool>;

    /// Settles a PENDING refund; optionally marks its payment REFUNDED.
    async fn settle_refund(&self, refund: &Refund, payment_refunded: bool) -> StoreResult<bool>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    async fn registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<EventRegistration>>;

    async fn event_registrations(&self, event_id: Uuid) -> StoreResult<Vec<EventRegistration>>;

    /// Stores `registration` without touching the counter. `expected` is the
    /// status the stored row must have, or `None` when no row may exist yet.
    async fn save_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
    ) -> StoreResult<bool>;

    /// Increments the counter if below capacity and stores `registration`.
    /// When full, queues the user if `queue_when_full`.
    async fn admit_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
        queue_when_full: bool,
    ) -> StoreResult<Admission>;

    /// Appends the user to the waitlist, or returns their existing waiting entry.
    async fn enqueue_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntry>;

    async fn waitlist_entry(&self, event_id: Uuid, user_id: Uuid)
        -> StoreResult<Option<WaitlistEntry>>;

    /// Waiting entries of an event in position order.
    async fn waitlist(&self, event_id: Uuid) -> StoreResult<Vec<WaitlistEntry>>;

    /// Removes a waiting entry and closes the gap behind it.
    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Stores the cancelled registration (expected APPROVED) and, in the same
    /// step, hands the freed place to the front of the waitlist. The counter
    /// only drops when nobody is waiting.
    async fn cancel_and_promote(
        &self,
        cancelled: &EventRegistration,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome>;
}

/// Everything the engine needs from persistence.
pub trait Store: CatalogStore + InventoryStore + RegistrationStore {}

impl<T: CatalogStore + InventoryStore + RegistrationStore> Store for T {}
