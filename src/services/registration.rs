//! Counter-based capacity for events without a seat map.
//!
//! PENDING -> APPROVED | REJECTED, APPROVED -> CANCELLED. When an event is
//! full, new registrants are queued on the waitlist. Cancelling an approved
//! registration hands the place to the front of the queue in the same store
//! step, so the counter never dips while someone is waiting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::inventory::SeatInventory;
use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{EventRegistration, RegistrationMode, RegistrationStatus, WaitlistEntry};
use crate::notify::{DomainEvent, Notifier};
use crate::store::{Admission, Store};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationOutcome {
    Approved(EventRegistration),
    Pending(EventRegistration),
    Waitlisted(WaitlistEntry),
}

fn cancelled(current: EventRegistration, reason: Option<String>, now: DateTime<Utc>) -> EventRegistration {
    EventRegistration {
        status: RegistrationStatus::Cancelled,
        cancellation_reason: reason,
        cancelled_at: Some(now),
        ..current
    }
}

pub struct RegistrationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            clock,
            notifier,
        }
    }

    async fn require(&self, event_id: Uuid, user_id: Uuid) -> BookingResult<EventRegistration> {
        self.store
            .registration(event_id, user_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("registration of {user_id} for event {event_id}")))
    }

    pub async fn register(&self, event_id: Uuid, user_id: Uuid) -> BookingResult<RegistrationOutcome> {
        let event = SeatInventory::require_event(self.store.as_ref(), event_id).await?;
        if event.is_seat_mapped() {
            return Err(BookingError::invalid_state(
                "event has a seat map; lock and book seats instead",
            ));
        }

        let existing = self.store.registration(event_id, user_id).await?;
        let expected = existing.as_ref().map(|r| r.status);
        match &existing {
            Some(reg) if reg.status == RegistrationStatus::Approved => {
                return Ok(RegistrationOutcome::Approved(reg.clone()))
            }
            Some(reg) if reg.status == RegistrationStatus::Pending => {
                return Ok(RegistrationOutcome::Pending(reg.clone()))
            }
            Some(reg) if reg.status == RegistrationStatus::Rejected => {
                return Err(BookingError::invalid_state("registration was rejected"))
            }
            _ => {}
        }

        if let Some(entry) = self.store.waitlist_entry(event_id, user_id).await? {
            if entry.is_waiting() {
                return Ok(RegistrationOutcome::Waitlisted(entry));
            }
        }

        let now = self.clock.now();
        let mut registration = EventRegistration::new(event_id, user_id, RegistrationStatus::Approved, now);
        if let Some(previous) = &existing {
            // re-registration after a cancellation keeps the row
            registration.id = previous.id;
        }

        match event.registration_mode {
            RegistrationMode::AutoApprove => {
                match self.store.admit_registration(&registration, expected, true).await? {
                    Admission::Admitted => {
                        info!("User {} registered for event {}", user_id, event_id);
                        Ok(RegistrationOutcome::Approved(registration))
                    }
                    Admission::Waitlisted(entry) => {
                        info!(
                            "Event {} is full, user {} waitlisted at position {}",
                            event_id, user_id, entry.position
                        );
                        Ok(RegistrationOutcome::Waitlisted(entry))
                    }
                    Admission::Full | Admission::Stale => Err(BookingError::invalid_state(
                        "registration changed concurrently, retry",
                    )),
                }
            }
            RegistrationMode::ManualApproval => {
                if event.is_full() {
                    let entry = self.store.enqueue_waitlist(event_id, user_id, now).await?;
                    info!(
                        "Event {} is full, user {} waitlisted at position {}",
                        event_id, user_id, entry.position
                    );
                    return Ok(RegistrationOutcome::Waitlisted(entry));
                }

                registration.status = RegistrationStatus::Pending;
                if !self.store.save_registration(&registration, expected).await? {
                    return Err(BookingError::invalid_state(
                        "registration changed concurrently, retry",
                    ));
                }
                info!("User {} awaiting approval for event {}", user_id, event_id);
                Ok(RegistrationOutcome::Pending(registration))
            }
        }
    }

    pub async fn approve(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reviewer: Uuid,
    ) -> BookingResult<EventRegistration> {
        let current = self.require(event_id, user_id).await?;
        match current.status {
            RegistrationStatus::Approved => return Ok(current),
            RegistrationStatus::Pending => {}
            other => {
                return Err(BookingError::invalid_state(format!(
                    "cannot approve a {other} registration"
                )))
            }
        }

        let now = self.clock.now();
        let approved = EventRegistration {
            status: RegistrationStatus::Approved,
            reviewed_by: Some(reviewer),
            reviewed_at: Some(now),
            ..current
        };

        match self
            .store
            .admit_registration(&approved, Some(RegistrationStatus::Pending), false)
            .await?
        {
            Admission::Admitted => {
                info!("Registration of {} for event {} approved by {}", user_id, event_id, reviewer);
                Ok(approved)
            }
            Admission::Full | Admission::Waitlisted(_) => {
                Err(BookingError::invalid_state("event is at capacity"))
            }
            Admission::Stale => {
                // a concurrent approval of the same registration is still a success
                let latest = self.require(event_id, user_id).await?;
                if latest.status == RegistrationStatus::Approved {
                    Ok(latest)
                } else {
                    Err(BookingError::invalid_state(format!(
                        "cannot approve a {} registration",
                        latest.status
                    )))
                }
            }
        }
    }

    pub async fn reject(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reviewer: Uuid,
        reason: &str,
    ) -> BookingResult<EventRegistration> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::validation("a rejection reason is required"));
        }

        let current = self.require(event_id, user_id).await?;
        match current.status {
            RegistrationStatus::Rejected => return Ok(current),
            RegistrationStatus::Pending => {}
            other => {
                return Err(BookingError::invalid_state(format!(
                    "cannot reject a {other} registration"
                )))
            }
        }

        let rejected = EventRegistration {
            status: RegistrationStatus::Rejected,
            rejection_reason: Some(reason.to_string()),
            reviewed_by: Some(reviewer),
            reviewed_at: Some(self.clock.now()),
            ..current
        };
        if !self
            .store
            .save_registration(&rejected, Some(RegistrationStatus::Pending))
            .await?
        {
            return Err(BookingError::invalid_state("registration changed concurrently, retry"));
        }

        info!("Registration of {} for event {} rejected: {}", user_id, event_id, reason);
        Ok(rejected)
    }

    pub async fn cancel(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> BookingResult<EventRegistration> {
        let current = self.require(event_id, user_id).await?;
        match current.status {
            RegistrationStatus::Cancelled => Ok(current),
            RegistrationStatus::Approved => {
                self.release_place(current, reason).await?;
                self.require(event_id, user_id).await
            }
            other => Err(BookingError::invalid_state(format!(
                "cannot cancel a {other} registration"
            ))),
        }
    }

    /// Cancelled form of the user's APPROVED registration, if they hold one.
    /// A general-admission booking that goes away carries it into the same
    /// store step as the booking itself.
    pub(crate) async fn release_for_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> BookingResult<Option<EventRegistration>> {
        Ok(self
            .store
            .registration(event_id, user_id)
            .await?
            .filter(|current| current.status == RegistrationStatus::Approved)
            .map(|current| cancelled(current, reason, now)))
    }

    pub(crate) fn announce_promotion(&self, event_id: Uuid, promoted: &EventRegistration) {
        info!("User {} promoted from the waitlist of event {}", promoted.user_id, event_id);
        self.notifier.emit(DomainEvent::WaitlistPromoted {
            event_id,
            user_id: promoted.user_id,
            registration_id: promoted.id,
        });
    }

    async fn release_place(
        &self,
        current: EventRegistration,
        reason: Option<String>,
    ) -> BookingResult<()> {
        let now = self.clock.now();
        let (event_id, user_id) = (current.event_id, current.user_id);

        let outcome = self
            .store
            .cancel_and_promote(&cancelled(current, reason, now), now)
            .await?;
        if !outcome.applied {
            let latest = self.require(event_id, user_id).await?;
            if latest.status == RegistrationStatus::Cancelled {
                return Ok(());
            }
            return Err(BookingError::invalid_state("registration changed concurrently, retry"));
        }

        info!("Registration of {} for event {} cancelled", user_id, event_id);
        if let Some(promoted) = outcome.promoted {
            self.announce_promotion(event_id, &promoted);
        }
        Ok(())
    }

    pub async fn leave_waitlist(&self, event_id: Uuid, user_id: Uuid) -> BookingResult<()> {
        if !self.store.leave_waitlist(event_id, user_id).await? {
            return Err(BookingError::not_found(format!(
                "waitlist entry of {user_id} for event {event_id}"
            )));
        }
        info!("User {} left the waitlist of event {}", user_id, event_id);
        Ok(())
    }

    pub async fn check_in(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        staff_id: Uuid,
    ) -> BookingResult<EventRegistration> {
        let current = self.require(event_id, user_id).await?;
        if current.status != RegistrationStatus::Approved {
            return Err(BookingError::invalid_state(format!(
                "cannot check in a {} registration",
                current.status
            )));
        }
        if current.checked_in_at.is_some() {
            return Ok(current);
        }

        let checked_in = EventRegistration {
            checked_in_at: Some(self.clock.now()),
            checked_in_by: Some(staff_id),
            ..current
        };
        if !self
            .store
            .save_registration(&checked_in, Some(RegistrationStatus::Approved))
            .await?
        {
            return Err(BookingError::invalid_state("registration changed concurrently, retry"));
        }
        Ok(checked_in)
    }

    pub async fn waitlist(&self, event_id: Uuid) -> BookingResult<Vec<WaitlistEntry>> {
        SeatInventory::require_event(self.store.as_ref(), event_id).await?;
        Ok(self.store.waitlist(event_id).await?)
    }

    pub async fn registration(&self, event_id: Uuid, user_id: Uuid) -> BookingResult<EventRegistration> {
        self.require(event_id, user_id).await
    }
}
