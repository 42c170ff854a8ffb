use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::seat::{Seat, SeatType};

db_enum! {
    SeatStatus {
        Available => "AVAILABLE",
        Locked => "LOCKED",
        Booked => "BOOKED",
        Blocked => "BLOCKED",
    }
}

/// Inventory row: one catalog seat scoped to one event.
///
/// Every state-changing write produces the next row through one of the
/// transition helpers below, which bump `version`. Stores only accept the
/// new row if the stored version still equals the version it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSeat {
    pub id: i64,
    pub event_id: Uuid,
    pub seat_id: i64,
    pub status: SeatStatus,
    pub locked_by: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub price: Decimal,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

impl EventSeat {
    pub fn new(id: i64, event_id: Uuid, seat_id: i64, price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id,
            event_id,
            seat_id,
            status: SeatStatus::Available,
            locked_by: None,
            lock_expires_at: None,
            price,
            version: 0,
            updated_at: now,
        }
    }

    /// LOCKED with an expiry that has not passed yet. A lock is still live at
    /// the exact instant it expires.
    pub fn has_live_lock(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Locked
            && self.locked_by.is_some()
            && self.lock_expires_at.is_some_and(|expires| expires >= now)
    }

    pub fn has_expired_lock(&self, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Locked && !self.has_live_lock(now)
    }

    pub fn is_held_by(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.has_live_lock(now) && self.locked_by == Some(user_id)
    }

    /// Available, or re-validated by the holder of a live lock. An expired
    /// lock keeps the seat until the sweeper reclaims it.
    pub fn lockable_by(&self, user_id: Uuid, now: DateTime<Utc>) -> bool {
        self.status == SeatStatus::Available || self.is_held_by(user_id, now)
    }

    fn next(&self, status: SeatStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            locked_by: None,
            lock_expires_at: None,
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn locked(&self, user_id: Uuid, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            locked_by: Some(user_id),
            lock_expires_at: Some(expires_at),
            ..self.next(SeatStatus::Locked, now)
        }
    }

    pub fn released(&self, now: DateTime<Utc>) -> Self {
        self.next(SeatStatus::Available, now)
    }

    pub fn booked(&self, now: DateTime<Utc>) -> Self {
        self.next(SeatStatus::Booked, now)
    }

    pub fn blocked(&self, now: DateTime<Utc>) -> Self {
        self.next(SeatStatus::Blocked, now)
    }
}

/// Read model returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatView {
    pub id: i64,
    pub section: String,
    pub row: String,
    pub number: i32,
    #[serde(rename = "type")]
    pub seat_type: SeatType,
    pub status: SeatStatus,
    pub price: Decimal,
}

impl SeatView {
    pub fn new(event_seat: &EventSeat, seat: &Seat) -> Self {
        Self {
            id: event_seat.id,
            section: seat.section.clone(),
            row: seat.row_label.clone(),
            number: seat.seat_number,
            seat_type: seat.seat_type,
            status: event_seat.status,
            price: event_seat.price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatListing {
    pub seats: Vec<SeatView>,
    pub total_seats: usize,
    pub available_seats: usize,
    pub sections: Vec<String>,
    pub price_by_type: BTreeMap<SeatType, Decimal>,
}

impl SeatListing {
    pub fn from_views(seats: Vec<SeatView>) -> Self {
        let available_seats = seats
            .iter()
            .filter(|s| s.status == SeatStatus::Available)
            .count();

        let mut sections: Vec<String> = Vec::new();
        let mut price_by_type = BTreeMap::new();
        for seat in &seats {
            if !sections.contains(&seat.section) {
                sections.push(seat.section.clone());
            }
            // first price seen for a type wins
            price_by_type.entry(seat.seat_type).or_insert(seat.price);
        }

        Self {
            total_seats: seats.len(),
            available_seats,
            sections,
            price_by_type,
            seats,
        }
    }
}
