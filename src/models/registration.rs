use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

db_enum! {
    RegistrationStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Cancelled => "CANCELLED",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRegistration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub status: RegistrationStatus,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_in_by: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl EventRegistration {
    pub fn new(event_id: Uuid, user_id: Uuid, status: RegistrationStatus, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            status,
            rejection_reason: None,
            cancellation_reason: None,
            reviewed_by: None,
            reviewed_at: None,
            checked_in_at: None,
            checked_in_by: None,
            registered_at: now,
            cancelled_at: None,
        }
    }
}

/// Queue entry for a full event. Un-promoted entries of one event always hold
/// positions 1..=n ordered by `added_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub added_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
}

impl WaitlistEntry {
    pub fn is_waiting(&self) -> bool {
        self.promoted_at.is_none()
    }
}
