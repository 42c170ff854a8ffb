use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payment::PaymentGateway;

db_enum! {
    BookingStatus {
        Pending => "PENDING",
        Confirmed => "CONFIRMED",
        Cancelled => "CANCELLED",
        Expired => "EXPIRED",
    }
}

impl BookingStatus {
    /// PENDING and CONFIRMED bookings still own their seats.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub status: BookingStatus,
    pub payment_gateway: Option<PaymentGateway>,
    pub payment_reference: Option<String>,
    pub qr_code_data: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// End of the payment window for a PENDING booking.
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn pending(
        event_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            total_amount,
            status: BookingStatus::Pending,
            payment_gateway: None,
            payment_reference: None,
            qr_code_data: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            expires_at,
            confirmed_at: None,
            cancelled_at: None,
        }
    }

    pub fn payment_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Pending && self.expires_at <= now
    }
}

/// Join row between a booking and an inventory seat, with the price charged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSeat {
    pub booking_id: Uuid,
    pub event_seat_id: i64,
    pub price: Decimal,
}
