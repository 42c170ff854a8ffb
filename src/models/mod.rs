use thiserror::Error;

/// Text-backed status enums. Stored as TEXT in Postgres and serialised as
/// SCREAMING_SNAKE_CASE in JSON.
macro_rules! db_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod seat;
pub mod event;
pub mod event_seat;
pub mod booking;
pub mod payment;
pub mod registration;

pub use seat::{NewSeat, Seat, SeatType};
pub use event::{EventRecord, RegistrationMode};
pub use event_seat::{EventSeat, SeatListing, SeatStatus, SeatView};
pub use booking::{Booking, BookingSeat, BookingStatus};
pub use payment::{
    refundable_amount, Payment, PaymentGateway, PaymentStatus, Refund, RefundStatus,
    DEFAULT_CURRENCY,
};
pub use registration::{EventRegistration, RegistrationStatus, WaitlistEntry};

/// A status column held text the enum does not know about.
#[derive(Debug, Error)]
#[error("unknown {kind} value `{value}`")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
