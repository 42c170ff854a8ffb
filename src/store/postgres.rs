use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{
    Admission, BookingTransition, CancelOutcome, CasOutcome, CatalogStore, InventoryStore,
    RegistrationStore, SeatWrite, TransitionOutcome,
};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    refundable_amount, Booking, BookingSeat, EventRecord, EventRegistration, EventSeat, NewSeat,
    Payment, Refund, RegistrationStatus, Seat, UnknownVariant, WaitlistEntry,
};

/// Postgres-backed store. Status enums live in TEXT columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn duplicate_or_db(e: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(what()),
        _ => StoreError::Database(e),
    }
}

// ---- row types -------------------------------------------------------------

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    venue_id: Option<Uuid>,
    capacity: i32,
    registration_count: i32,
    registration_mode: String,
    ticket_price: Decimal,
}

impl TryFrom<EventRow> for EventRecord {
    type Error = UnknownVariant;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(EventRecord {
            id: row.id,
            venue_id: row.venue_id,
            capacity: row.capacity,
            registration_count: row.registration_count,
            registration_mode: row.registration_mode.parse()?,
            ticket_price: row.ticket_price,
        })
    }
}

#[derive(FromRow)]
struct SeatRow {
    id: i64,
    venue_id: Uuid,
    section: String,
    row_label: String,
    seat_number: i32,
    seat_type: String,
}

impl TryFrom<SeatRow> for Seat {
    type Error = UnknownVariant;

    fn try_from(row: SeatRow) -> Result<Self, Self::Error> {
        Ok(Seat {
            id: row.id,
            venue_id: row.venue_id,
            section: row.section,
            row_label: row.row_label,
            seat_number: row.seat_number,
            seat_type: row.seat_type.parse()?,
        })
    }
}

#[derive(FromRow)]
struct EventSeatRow {
    id: i64,
    event_id: Uuid,
    seat_id: i64,
    status: String,
    locked_by: Option<Uuid>,
    lock_expires_at: Option<DateTime<Utc>>,
    price: Decimal,
    version: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventSeatRow> for EventSeat {
    type Error = UnknownVariant;

    fn try_from(row: EventSeatRow) -> Result<Self, Self::Error> {
        Ok(EventSeat {
            id: row.id,
            event_id: row.event_id,
            seat_id: row.seat_id,
            status: row.status.parse()?,
            locked_by: row.locked_by,
            lock_expires_at: row.lock_expires_at,
            price: row.price,
            version: row.version,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SeatMapRow {
    #[sqlx(flatten)]
    event_seat: EventSeatRow,
    venue_id: Uuid,
    section: String,
    row_label: String,
    seat_number: i32,
    seat_type: String,
}

impl TryFrom<SeatMapRow> for (EventSeat, Seat) {
    type Error = UnknownVariant;

    fn try_from(row: SeatMapRow) -> Result<Self, Self::Error> {
        let seat = Seat {
            id: row.event_seat.seat_id,
            venue_id: row.venue_id,
            section: row.section,
            row_label: row.row_label,
            seat_number: row.seat_number,
            seat_type: row.seat_type.parse()?,
        };
        Ok((row.event_seat.try_into()?, seat))
    }
}

#[derive(FromRow)]
struct BookingRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    total_amount: Decimal,
    status: String,
    payment_gateway: Option<String>,
    payment_reference: Option<String>,
    qr_code_data: Option<String>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = UnknownVariant;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            payment_gateway: row.payment_gateway.map(|g| g.parse()).transpose()?,
            payment_reference: row.payment_reference,
            qr_code_data: row.qr_code_data,
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
            confirmed_at: row.confirmed_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[derive(FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    gateway: String,
    transaction_id: String,
    amount: Decimal,
    currency: String,
    status: String,
    gateway_response: serde_json::Value,
    created_at: DateTime<Utc>,
    captured_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = UnknownVariant;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            booking_id: row.booking_id,
            gateway: row.gateway.parse()?,
            transaction_id: row.transaction_id,
            amount: row.amount,
            currency: row.currency,
            status: row.status.parse()?,
            gateway_response: row.gateway_response,
            created_at: row.created_at,
            captured_at: row.captured_at,
            failed_at: row.failed_at,
        })
    }
}

#[derive(FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    amount: Decimal,
    reason: Option<String>,
    gateway_refund_id: Option<String>,
    status: String,
    initiated_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<RefundRow> for Refund {
    type Error = UnknownVariant;

    fn try_from(row: RefundRow) -> Result<Self, Self::Error> {
        Ok(Refund {
            id: row.id,
            payment_id: row.payment_id,
            amount: row.amount,
            reason: row.reason,
            gateway_refund_id: row.gateway_refund_id,
            status: row.status.parse()?,
            initiated_by: row.initiated_by,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(FromRow)]
struct RegistrationRow {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    status: String,
    rejection_reason: Option<String>,
    cancellation_reason: Option<String>,
    reviewed_by: Option<Uuid>,
    reviewed_at: Option<DateTime<Utc>>,
    checked_in_at: Option<DateTime<Utc>>,
    checked_in_by: Option<Uuid>,
    registered_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<RegistrationRow> for EventRegistration {
    type Error = UnknownVariant;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        Ok(EventRegistration {
            id: row.id,
            event_id: row.event_id,
            user_id: row.user_id,
            status: row.status.parse()?,
            rejection_reason: row.rejection_reason,
            cancellation_reason: row.cancellation_reason,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            checked_in_at: row.checked_in_at,
            checked_in_by: row.checked_in_by,
            registered_at: row.registered_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = UnknownVariant>,
{
    rows.into_iter()
        .map(|r| T::try_from(r).map_err(StoreError::from))
        .collect()
}

const EVENT_SEAT_COLUMNS: &str =
    "id, event_id, seat_id, status, locked_by, lock_expires_at, price, version, updated_at";

const BOOKING_COLUMNS: &str = "id, event_id, user_id, total_amount, status, payment_gateway, \
     payment_reference, qr_code_data, cancellation_reason, created_at, updated_at, expires_at, \
     confirmed_at, cancelled_at";

const PAYMENT_COLUMNS: &str = "id, booking_id, gateway, transaction_id, amount, currency, status, \
     gateway_response, created_at, captured_at, failed_at";

const REFUND_COLUMNS: &str = "id, payment_id, amount, reason, gateway_refund_id, status, \
     initiated_by, created_at, processed_at";

const REGISTRATION_COLUMNS: &str = "id, event_id, user_id, status, rejection_reason, \
     cancellation_reason, reviewed_by, reviewed_at, checked_in_at, checked_in_by, registered_at, \
     cancelled_at";

// ---- statements shared inside transactions ---------------------------------

/// Applies every write whose version still matches; returns the ids that did not.
/// The caller rolls back when the list is not empty.
async fn write_seats(conn: &mut PgConnection, writes: &[SeatWrite]) -> StoreResult<Vec<i64>> {
    let mut stale = Vec::new();
    for write in writes {
        let seat = &write.next;
        let result = sqlx::query(
            "UPDATE event_seats
             SET status = $3, locked_by = $4, lock_expires_at = $5, version = $6, updated_at = $7
             WHERE id = $1 AND version = $2",
        )
        .bind(seat.id)
        .bind(write.expected_version)
        .bind(seat.status.as_str())
        .bind(seat.locked_by)
        .bind(seat.lock_expires_at)
        .bind(seat.version)
        .bind(seat.updated_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() != 1 {
            stale.push(seat.id);
        }
    }
    Ok(stale)
}

async fn lock_event_row(conn: &mut PgConnection, event_id: Uuid) -> StoreResult<Option<EventRecord>> {
    let row = sqlx::query_as::<_, EventRow>(
        "SELECT id, venue_id, capacity, registration_count, registration_mode, ticket_price
         FROM events WHERE id = $1 FOR UPDATE",
    )
    .bind(event_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(EventRecord::try_from).transpose()?)
}

async fn registration_status(
    conn: &mut PgConnection,
    event_id: Uuid,
    user_id: Uuid,
) -> StoreResult<Option<RegistrationStatus>> {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM event_registrations WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(status.map(|s| s.parse()).transpose()?)
}

/// Inserts or overwrites the registration of (event, user), keeping the row id.
async fn upsert_registration(
    conn: &mut PgConnection,
    reg: &EventRegistration,
) -> StoreResult<EventRegistration> {
    let row = sqlx::query_as::<_, RegistrationRow>(&format!(
        "INSERT INTO event_registrations ({REGISTRATION_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
         ON CONFLICT (event_id, user_id) DO UPDATE SET
             status = EXCLUDED.status,
             rejection_reason = EXCLUDED.rejection_reason,
             cancellation_reason = EXCLUDED.cancellation_reason,
             reviewed_by = EXCLUDED.reviewed_by,
             reviewed_at = EXCLUDED.reviewed_at,
             checked_in_at = EXCLUDED.checked_in_at,
             checked_in_by = EXCLUDED.checked_in_by,
             cancelled_at = EXCLUDED.cancelled_at
         RETURNING {REGISTRATION_COLUMNS}"
    ))
    .bind(reg.id)
    .bind(reg.event_id)
    .bind(reg.user_id)
    .bind(reg.status.as_str())
    .bind(&reg.rejection_reason)
    .bind(&reg.cancellation_reason)
    .bind(reg.reviewed_by)
    .bind(reg.reviewed_at)
    .bind(reg.checked_in_at)
    .bind(reg.checked_in_by)
    .bind(reg.registered_at)
    .bind(reg.cancelled_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_into()?)
}

async fn waiting_entries(conn: &mut PgConnection, event_id: Uuid) -> StoreResult<Vec<WaitlistEntry>> {
    let entries = sqlx::query_as::<_, WaitlistEntry>(
        "SELECT id, event_id, user_id, position, added_at, promoted_at
         FROM event_waitlist
         WHERE event_id = $1 AND promoted_at IS NULL
         ORDER BY position",
    )
    .bind(event_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(entries)
}

async fn close_gap(conn: &mut PgConnection, event_id: Uuid, vacated: i32) -> StoreResult<()> {
    sqlx::query(
        "UPDATE event_waitlist SET position = position - 1
         WHERE event_id = $1 AND promoted_at IS NULL AND position > $2",
    )
    .bind(event_id)
    .bind(vacated)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Cancels an APPROVED registration and hands its place to the front of the
/// waitlist, or gives the place back to the counter when nobody waits.
/// Writes nothing when the stored row is no longer APPROVED.
async fn release_registration(
    conn: &mut PgConnection,
    cancelled: &EventRegistration,
    now: DateTime<Utc>,
) -> StoreResult<CancelOutcome> {
    let event_id = cancelled.event_id;
    lock_event_row(conn, event_id).await?;

    let current = registration_status(conn, event_id, cancelled.user_id).await?;
    if current != Some(RegistrationStatus::Approved) {
        return Ok(CancelOutcome {
            applied: false,
            promoted: None,
        });
    }
    upsert_registration(conn, cancelled).await?;

    let front = waiting_entries(conn, event_id).await?.into_iter().next();
    let promoted = match front {
        Some(entry) => {
            sqlx::query("UPDATE event_waitlist SET promoted_at = $2 WHERE id = $1")
                .bind(entry.id)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            close_gap(conn, event_id, entry.position).await?;

            let mut registration =
                EventRegistration::new(event_id, entry.user_id, RegistrationStatus::Approved, now);
            registration.reviewed_at = Some(now);
            Some(upsert_registration(conn, &registration).await?)
        }
        None => {
            sqlx::query(
                "UPDATE events SET registration_count = GREATEST(registration_count - 1, 0)
                 WHERE id = $1",
            )
            .bind(event_id)
            .execute(&mut *conn)
            .await?;
            None
        }
    };

    Ok(CancelOutcome {
        applied: true,
        promoted,
    })
}

/// Caller must hold the event row lock.
async fn enqueue(
    conn: &mut PgConnection,
    event_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<WaitlistEntry> {
    let waiting = waiting_entries(conn, event_id).await?;
    if let Some(existing) = waiting.iter().find(|w| w.user_id == user_id) {
        return Ok(existing.clone());
    }

    let entry = sqlx::query_as::<_, WaitlistEntry>(
        "INSERT INTO event_waitlist (id, event_id, user_id, position, added_at, promoted_at)
         VALUES ($1, $2, $3, $4, $5, NULL)
         ON CONFLICT (event_id, user_id) DO UPDATE SET
             id = EXCLUDED.id,
             position = EXCLUDED.position,
             added_at = EXCLUDED.added_at,
             promoted_at = NULL
         RETURNING id, event_id, user_id, position, added_at, promoted_at",
    )
    .bind(Uuid::new_v4())
    .bind(event_id)
    .bind(user_id)
    .bind(waiting.len() as i32 + 1)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(entry)
}

// ---- trait impls -------------------------------------------------------------

#[async_trait]
impl CatalogStore for PgStore {
    async fn insert_seats(&self, venue_id: Uuid, seats: &[NewSeat]) -> StoreResult<Vec<Seat>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(seats.len());

        for new in seats {
            let row = sqlx::query_as::<_, SeatRow>(
                "INSERT INTO seats (venue_id, section, row_label, seat_number, seat_type)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id, venue_id, section, row_label, seat_number, seat_type",
            )
            .bind(venue_id)
            .bind(&new.section)
            .bind(&new.row_label)
            .bind(new.seat_number)
            .bind(new.seat_type.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                duplicate_or_db(e, || {
                    format!(
                        "seat {}/{}/{} already exists",
                        new.section, new.row_label, new.seat_number
                    )
                })
            })?;
            created.push(Seat::try_from(row)?);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn venue_seats(&self, venue_id: Uuid) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            "SELECT id, venue_id, section, row_label, seat_number, seat_type
             FROM seats WHERE venue_id = $1
             ORDER BY section, row_label, seat_number",
        )
        .bind(venue_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn event(&self, event_id: Uuid) -> StoreResult<Option<EventRecord>> {
        let row = sqlx::query_as::<_, EventRow>(
            "SELECT id, venue_id, capacity, registration_count, registration_mode, ticket_price
             FROM events WHERE id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EventRecord::try_from).transpose()?)
    }

    async fn save_event(&self, event: &EventRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO events (id, venue_id, capacity, registration_count, registration_mode, ticket_price)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 venue_id = EXCLUDED.venue_id,
                 capacity = EXCLUDED.capacity,
                 registration_count = EXCLUDED.registration_count,
                 registration_mode = EXCLUDED.registration_mode,
                 ticket_price = EXCLUDED.ticket_price",
        )
        .bind(event.id)
        .bind(event.venue_id)
        .bind(event.capacity)
        .bind(event.registration_count)
        .bind(event.registration_mode.as_str())
        .bind(event.ticket_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn instantiate_event_seats(
        &self,
        event_id: Uuid,
        seats: &[(i64, Decimal)],
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut created = 0usize;
        for (seat_id, price) in seats {
            let result = sqlx::query(
                "INSERT INTO event_seats (event_id, seat_id, status, price, version, updated_at)
                 VALUES ($1, $2, 'AVAILABLE', $3, 0, $4)
                 ON CONFLICT (event_id, seat_id) DO NOTHING",
            )
            .bind(event_id)
            .bind(seat_id)
            .bind(price)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn seat_map(&self, event_id: Uuid) -> StoreResult<Vec<(EventSeat, Seat)>> {
        let rows = sqlx::query_as::<_, SeatMapRow>(
            "SELECT es.id, es.event_id, es.seat_id, es.status, es.locked_by, es.lock_expires_at,
                    es.price, es.version, es.updated_at,
                    s.venue_id, s.section, s.row_label, s.seat_number, s.seat_type
             FROM event_seats es
             JOIN seats s ON s.id = es.seat_id
             WHERE es.event_id = $1
             ORDER BY s.section, s.row_label, s.seat_number",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn count_available(&self, event_id: Uuid) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_seats WHERE event_id = $1 AND status = 'AVAILABLE'",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn load_seats(&self, event_id: Uuid, seat_ids: &[i64]) -> StoreResult<Vec<EventSeat>> {
        let rows = sqlx::query_as::<_, EventSeatRow>(&format!(
            "SELECT {EVENT_SEAT_COLUMNS} FROM event_seats
             WHERE event_id = $1 AND id = ANY($2)
             ORDER BY id"
        ))
        .bind(event_id)
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn apply_seat_writes(&self, writes: &[SeatWrite]) -> StoreResult<CasOutcome> {
        let mut tx = self.pool.begin().await?;
        let stale = write_seats(&mut tx, writes).await?;
        if !stale.is_empty() {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale(stale));
        }
        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn expired_locks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<EventSeat>> {
        let rows = sqlx::query_as::<_, EventSeatRow>(&format!(
            "SELECT {EVENT_SEAT_COLUMNS} FROM event_seats
             WHERE status = 'LOCKED'
               AND (locked_by IS NULL OR lock_expires_at IS NULL OR lock_expires_at < $1)
             ORDER BY lock_expires_at NULLS FIRST
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_booking(
        &self,
        booking: &Booking,
        seats: &[BookingSeat],
        writes: &[SeatWrite],
    ) -> StoreResult<CasOutcome> {
        let mut tx = self.pool.begin().await?;

        let stale = write_seats(&mut tx, writes).await?;
        if !stale.is_empty() {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale(stale));
        }

        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ))
        .bind(booking.id)
        .bind(booking.event_id)
        .bind(booking.user_id)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.payment_gateway.map(|g| g.as_str()))
        .bind(&booking.payment_reference)
        .bind(&booking.qr_code_data)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.expires_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| duplicate_or_db(e, || format!("booking {} already exists", booking.id)))?;

        for seat in seats {
            sqlx::query(
                "INSERT INTO booking_seats (booking_id, event_seat_id, price) VALUES ($1, $2, $3)",
            )
            .bind(seat.booking_id)
            .bind(seat.event_seat_id)
            .bind(seat.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn booking(&self, booking_id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Booking::try_from).transpose()?)
    }

    async fn user_bookings(&self, user_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn active_booking(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE event_id = $1 AND user_id = $2 AND status IN ('PENDING', 'CONFIRMED')
             LIMIT 1"
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Booking::try_from).transpose()?)
    }

    async fn booking_seats(&self, booking_id: Uuid) -> StoreResult<Vec<BookingSeat>> {
        let rows = sqlx::query_as::<_, (Uuid, i64, Decimal)>(
            "SELECT booking_id, event_seat_id, price FROM booking_seats
             WHERE booking_id = $1 ORDER BY event_seat_id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(booking_id, event_seat_id, price)| BookingSeat {
                booking_id,
                event_seat_id,
                price,
            })
            .collect())
    }

    async fn apply_booking_transition(
        &self,
        transition: &BookingTransition,
    ) -> StoreResult<TransitionOutcome> {
        let booking = &transition.booking;
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, String>(
            "SELECT status FROM bookings WHERE id = $1 FOR UPDATE",
        )
        .bind(booking.id)
        .fetch_optional(&mut *tx)
        .await?;
        if current.as_deref() != Some(transition.expected_status.as_str()) {
            tx.rollback().await?;
            return Ok(TransitionOutcome::StaleBooking);
        }

        let stale = write_seats(&mut tx, &transition.seat_writes).await?;
        if !stale.is_empty() {
            tx.rollback().await?;
            return Ok(TransitionOutcome::StaleSeats(stale));
        }

        sqlx::query(
            "UPDATE bookings SET
                 status = $2, payment_gateway = $3, payment_reference = $4, qr_code_data = $5,
                 cancellation_reason = $6, updated_at = $7, expires_at = $8,
                 confirmed_at = $9, cancelled_at = $10
             WHERE id = $1",
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(booking.payment_gateway.map(|g| g.as_str()))
        .bind(&booking.payment_reference)
        .bind(&booking.qr_code_data)
        .bind(&booking.cancellation_reason)
        .bind(booking.updated_at)
        .bind(booking.expires_at)
        .bind(booking.confirmed_at)
        .bind(booking.cancelled_at)
        .execute(&mut *tx)
        .await?;

        if let Some(payment) = &transition.payment {
            upsert_payment(&mut tx, payment).await?;
        }

        if let Some(refund) = &transition.refund {
            insert_refund_row(&mut tx, refund).await?;
        }

        let promoted = match &transition.registration_release {
            Some(cancelled) => {
                release_registration(&mut tx, cancelled, booking.updated_at)
                    .await?
                    .promoted
            }
            None => None,
        };

        tx.commit().await?;
        Ok(TransitionOutcome::Applied { promoted })
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'PENDING' AND expires_at <= $1
             ORDER BY expires_at
             LIMIT $2"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn payment(&self, payment_id: Uuid) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn payment_by_transaction(&self, transaction_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1"
        ))
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn booking_payments(&self, booking_id: Uuid) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 ORDER BY created_at"
        ))
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn save_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_payment(&mut conn, payment).await
    }

    async fn refund(&self, refund_id: Uuid) -> StoreResult<Option<Refund>> {
        let row = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1"
        ))
        .bind(refund_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Refund::try_from).transpose()?)
    }

    async fn payment_refunds(&self, payment_id: Uuid) -> StoreResult<Vec<Refund>> {
        let rows = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE payment_id = $1 ORDER BY created_at"
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn insert_refund(&self, refund: &Refund) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let payment = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(refund.payment_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(payment) = payment.map(Payment::try_from).transpose()? else {
            tx.rollback().await?;
            return Ok(false);
        };

        let existing = sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds WHERE payment_id = $1"
        ))
        .bind(refund.payment_id)
        .fetch_all(&mut *tx)
        .await?;
        let existing: Vec<Refund> = convert_all(existing)?;

        if refundable_amount(&payment, &existing) < refund.amount {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_refund_row(&mut tx, refund).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn settle_refund(&self, refund: &Refund, payment_refunded: bool) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE refunds SET status = $2, gateway_refund_id = $3, processed_at = $4
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(refund.id)
        .bind(refund.status.as_str())
        .bind(&refund.gateway_refund_id)
        .bind(refund.processed_at)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        if payment_refunded {
            sqlx::query("UPDATE payments SET status = 'REFUNDED' WHERE id = $1")
                .bind(refund.payment_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

async fn upsert_payment(conn: &mut PgConnection, payment: &Payment) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO payments ({PAYMENT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (id) DO UPDATE SET
             status = EXCLUDED.status,
             amount = EXCLUDED.amount,
             gateway_response = EXCLUDED.gateway_response,
             captured_at = EXCLUDED.captured_at,
             failed_at = EXCLUDED.failed_at"
    ))
    .bind(payment.id)
    .bind(payment.booking_id)
    .bind(payment.gateway.as_str())
    .bind(&payment.transaction_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(payment.status.as_str())
    .bind(&payment.gateway_response)
    .bind(payment.created_at)
    .bind(payment.captured_at)
    .bind(payment.failed_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        duplicate_or_db(e, || {
            format!("transaction {} already recorded", payment.transaction_id)
        })
    })?;
    Ok(())
}

async fn insert_refund_row(conn: &mut PgConnection, refund: &Refund) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO refunds ({REFUND_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(refund.id)
    .bind(refund.payment_id)
    .bind(refund.amount)
    .bind(&refund.reason)
    .bind(&refund.gateway_refund_id)
    .bind(refund.status.as_str())
    .bind(refund.initiated_by)
    .bind(refund.created_at)
    .bind(refund.processed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl RegistrationStore for PgStore {
    async fn registration(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<EventRegistration>> {
        let row = sqlx::query_as::<_, RegistrationRow>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM event_registrations
             WHERE event_id = $1 AND user_id = $2"
        ))
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EventRegistration::try_from).transpose()?)
    }

    async fn event_registrations(&self, event_id: Uuid) -> StoreResult<Vec<EventRegistration>> {
        let rows = sqlx::query_as::<_, RegistrationRow>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM event_registrations
             WHERE event_id = $1 ORDER BY registered_at"
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn save_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let current =
            registration_status(&mut tx, registration.event_id, registration.user_id).await?;
        if current != expected {
            tx.rollback().await?;
            return Ok(false);
        }
        upsert_registration(&mut tx, registration).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn admit_registration(
        &self,
        registration: &EventRegistration,
        expected: Option<RegistrationStatus>,
        queue_when_full: bool,
    ) -> StoreResult<Admission> {
        let mut tx = self.pool.begin().await?;

        let Some(event) = lock_event_row(&mut tx, registration.event_id).await? else {
            tx.rollback().await?;
            return Ok(Admission::Full);
        };

        let current =
            registration_status(&mut tx, registration.event_id, registration.user_id).await?;
        if current != expected {
            tx.rollback().await?;
            return Ok(Admission::Stale);
        }

        if event.is_full() {
            if !queue_when_full {
                tx.rollback().await?;
                return Ok(Admission::Full);
            }
            let entry = enqueue(
                &mut tx,
                registration.event_id,
                registration.user_id,
                registration.registered_at,
            )
            .await?;
            tx.commit().await?;
            return Ok(Admission::Waitlisted(entry));
        }

        sqlx::query("UPDATE events SET registration_count = registration_count + 1 WHERE id = $1")
            .bind(event.id)
            .execute(&mut *tx)
            .await?;
        upsert_registration(&mut tx, registration).await?;

        tx.commit().await?;
        Ok(Admission::Admitted)
    }

    async fn enqueue_waitlist(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<WaitlistEntry> {
        let mut tx = self.pool.begin().await?;
        lock_event_row(&mut tx, event_id).await?;
        let entry = enqueue(&mut tx, event_id, user_id, now).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn waitlist_entry(
        &self,
        event_id: Uuid,
        user_id: Uuid,
    ) -> StoreResult<Option<WaitlistEntry>> {
        let entry = sqlx::query_as::<_, WaitlistEntry>(
            "SELECT id, event_id, user_id, position, added_at, promoted_at
             FROM event_waitlist WHERE event_id = $1 AND user_id = $2",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn waitlist(&self, event_id: Uuid) -> StoreResult<Vec<WaitlistEntry>> {
        let mut conn = self.pool.acquire().await?;
        waiting_entries(&mut conn, event_id).await
    }

    async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        lock_event_row(&mut tx, event_id).await?;

        let position = sqlx::query_scalar::<_, i32>(
            "DELETE FROM event_waitlist
             WHERE event_id = $1 AND user_id = $2 AND promoted_at IS NULL
             RETURNING position",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(position) = position else {
            tx.rollback().await?;
            return Ok(false);
        };
        close_gap(&mut tx, event_id, position).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn cancel_and_promote(
        &self,
        cancelled: &EventRegistration,
        now: DateTime<Utc>,
    ) -> StoreResult<CancelOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = release_registration(&mut tx, cancelled, now).await?;
        if outcome.applied {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        Ok(outcome)
    }
}
