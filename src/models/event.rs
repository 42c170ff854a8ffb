use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

db_enum! {
    RegistrationMode {
        AutoApprove => "AUTO_APPROVE",
        ManualApproval => "MANUAL_APPROVAL",
    }
}

impl Default for RegistrationMode {
    fn default() -> Self {
        RegistrationMode::AutoApprove
    }
}

/// The slice of an event this engine needs. Events themselves are created and
/// approved elsewhere; only `registration_count` is written here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    /// Seat-mapped events have a venue with a seat catalog.
    pub venue_id: Option<Uuid>,
    pub capacity: i32,
    pub registration_count: i32,
    pub registration_mode: RegistrationMode,
    pub ticket_price: Decimal,
}

impl EventRecord {
    pub fn is_seat_mapped(&self) -> bool {
        self.venue_id.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.registration_count >= self.capacity
    }

    pub fn remaining_capacity(&self) -> i32 {
        (self.capacity - self.registration_count).max(0)
    }
}
