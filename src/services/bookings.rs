//! Turns held seats into bookings and reconciles payment and cancellation
//! outcomes back into inventory.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::inventory::SeatInventory;
use super::qr;
use super::registration::RegistrationService;
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::{BookingError, BookingResult, StoreError};
use crate::models::{
    refundable_amount, Booking, BookingSeat, BookingStatus, EventSeat, Payment, PaymentGateway,
    PaymentStatus, Refund, RefundStatus, RegistrationStatus, SeatStatus, DEFAULT_CURRENCY,
};
use crate::notify::{DomainEvent, Notifier};
use crate::store::{BookingTransition, CasOutcome, SeatWrite, Store, TransitionOutcome};

/// What the payment gateway reported about one transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentDetails {
    pub gateway: PaymentGateway,
    pub transaction_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub gateway_response: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundOutcome {
    Processed { gateway_refund_id: Option<String> },
    Failed,
}

pub struct BookingEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    registrations: Arc<RegistrationService>,
    config: BookingConfig,
}

fn duplicate_as_invalid(e: StoreError) -> BookingError {
    match e {
        StoreError::Duplicate(msg) => BookingError::InvalidState(msg),
        other => other.into(),
    }
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        registrations: Arc<RegistrationService>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            registrations,
            config,
        }
    }

    async fn require(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("booking {booking_id}")))
    }

    async fn backoff(&self, attempt: u32) {
        if attempt < self.config.max_cas_attempts {
            tokio::time::sleep(self.config.retry_backoff(attempt)).await;
        }
    }

    /// Converts the caller's live locks into a PENDING booking. Seats the
    /// caller does not hold are a validation error, whoever holds them.
    pub async fn create_booking(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        seat_ids: &[i64],
    ) -> BookingResult<Booking> {
        let mut ids = seat_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Err(BookingError::validation("no seats requested"));
        }
        SeatInventory::require_event(self.store.as_ref(), event_id).await?;

        let attempts = self.config.max_cas_attempts.max(1);
        let mut stale = Vec::new();
        for attempt in 1..=attempts {
            let now = self.clock.now();
            let seats = self.store.load_seats(event_id, &ids).await?;
            if seats.len() != ids.len() {
                return Err(BookingError::not_found("one or more seats"));
            }

            let not_held: Vec<i64> = seats
                .iter()
                .filter(|s| !s.is_held_by(user_id, now))
                .map(|s| s.id)
                .collect();
            if !not_held.is_empty() {
                return Err(BookingError::validation(format!(
                    "seats {not_held:?} are not locked by the caller"
                )));
            }

            let total: Decimal = seats.iter().map(|s| s.price).sum();
            let booking = Booking::pending(
                event_id,
                user_id,
                total,
                now,
                now + self.config.payment_window(),
            );
            let booking_seats: Vec<BookingSeat> = seats
                .iter()
                .map(|s| BookingSeat {
                    booking_id: booking.id,
                    event_seat_id: s.id,
                    price: s.price,
                })
                .collect();
            let writes: Vec<SeatWrite> = seats
                .iter()
                .map(|s| SeatWrite::new(s, s.booked(now)))
                .collect();

            match self.store.insert_booking(&booking, &booking_seats, &writes).await? {
                CasOutcome::Applied => {
                    info!(
                        "Booking {} created for user {}: {} seats, total {}",
                        booking.id,
                        user_id,
                        seats.len(),
                        total
                    );
                    return Ok(booking);
                }
                CasOutcome::Stale(ids) => {
                    debug!("booking CAS lost on attempt {}/{}: {:?}", attempt, attempts, ids);
                    stale = ids;
                    self.backoff(attempt).await;
                }
            }
        }

        Err(BookingError::Conflict { seat_ids: stale })
    }

    /// Booking for a general-admission event, backed by an approved registration.
    pub async fn create_admission_booking(&self, event_id: Uuid, user_id: Uuid) -> BookingResult<Booking> {
        let event = SeatInventory::require_event(self.store.as_ref(), event_id).await?;
        if event.is_seat_mapped() {
            return Err(BookingError::invalid_state("event has a seat map; book seats instead"));
        }

        let registration = self.store.registration(event_id, user_id).await?;
        if registration.map(|r| r.status) != Some(RegistrationStatus::Approved) {
            return Err(BookingError::invalid_state("an approved registration is required"));
        }
        if self.store.active_booking(event_id, user_id).await?.is_some() {
            return Err(BookingError::invalid_state("user already has an active booking for this event"));
        }

        let now = self.clock.now();
        let booking = Booking::pending(
            event_id,
            user_id,
            event.ticket_price,
            now,
            now + self.config.payment_window(),
        );
        self.store.insert_booking(&booking, &[], &[]).await?;
        info!("Admission booking {} created for user {}", booking.id, user_id);
        Ok(booking)
    }

    /// Records a captured payment and confirms the booking. Repeated delivery
    /// of the same transaction returns the confirmed booking unchanged.
    pub async fn confirm_payment(&self, booking_id: Uuid, details: PaymentDetails) -> BookingResult<Booking> {
        let booking = self.require(booking_id).await?;
        let existing = self.store.payment_by_transaction(&details.transaction_id).await?;

        if let Some(payment) = &existing {
            if payment.booking_id != booking_id {
                return Err(BookingError::invalid_state(format!(
                    "transaction {} belongs to another booking",
                    details.transaction_id
                )));
            }
            if payment.status == PaymentStatus::Captured && booking.status == BookingStatus::Confirmed {
                debug!("duplicate capture {} for booking {}", details.transaction_id, booking_id);
                return Ok(booking);
            }
        }

        match booking.status {
            BookingStatus::Pending => {}
            BookingStatus::Confirmed => {
                return Err(BookingError::invalid_state(
                    "booking is already confirmed by another payment",
                ))
            }
            other => {
                return Err(BookingError::invalid_state(format!(
                    "cannot confirm payment on a {other} booking"
                )))
            }
        }

        if details.amount != booking.total_amount {
            return Err(BookingError::validation(format!(
                "payment amount {} does not match booking total {}",
                details.amount, booking.total_amount
            )));
        }

        let now = self.clock.now();
        let payment = Payment {
            status: PaymentStatus::Captured,
            captured_at: Some(now),
            gateway_response: details.gateway_response.clone(),
            ..existing.unwrap_or_else(|| self.new_payment(booking_id, &details, now))
        };
        let confirmed = Booking {
            status: BookingStatus::Confirmed,
            payment_gateway: Some(details.gateway),
            payment_reference: Some(details.transaction_id.clone()),
            qr_code_data: qr::generate(&booking, &self.config.qr_secret),
            confirmed_at: Some(now),
            updated_at: now,
            ..booking
        };

        let transition = BookingTransition {
            booking: confirmed.clone(),
            expected_status: BookingStatus::Pending,
            seat_writes: Vec::new(),
            payment: Some(payment),
            refund: None,
            registration_release: None,
        };
        match self
            .store
            .apply_booking_transition(&transition)
            .await
            .map_err(duplicate_as_invalid)?
        {
            TransitionOutcome::Applied { .. } => {}
            _ => {
                // lost to a concurrent delivery of the same capture
                let latest = self.require(booking_id).await?;
                if latest.status == BookingStatus::Confirmed
                    && latest.payment_reference.as_deref() == Some(details.transaction_id.as_str())
                {
                    return Ok(latest);
                }
                return Err(BookingError::invalid_state(format!(
                    "cannot confirm payment on a {} booking",
                    latest.status
                )));
            }
        }

        info!("Booking {} confirmed by transaction {}", booking_id, details.transaction_id);
        self.notifier.emit(DomainEvent::BookingConfirmed {
            booking_id,
            event_id: confirmed.event_id,
            user_id: confirmed.user_id,
            total_amount: confirmed.total_amount,
            qr_code_data: confirmed.qr_code_data.clone().unwrap_or_default(),
        });
        Ok(confirmed)
    }

    fn new_payment(&self, booking_id: Uuid, details: &PaymentDetails, now: DateTime<Utc>) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            booking_id,
            gateway: details.gateway,
            transaction_id: details.transaction_id.clone(),
            amount: details.amount,
            currency: DEFAULT_CURRENCY.to_string(),
            status: PaymentStatus::Pending,
            gateway_response: details.gateway_response.clone(),
            created_at: now,
            captured_at: None,
            failed_at: None,
        }
    }

    /// Records a failed attempt. The booking stays PENDING so the user can
    /// retry within the payment window.
    pub async fn fail_payment(&self, booking_id: Uuid, details: PaymentDetails) -> BookingResult<Payment> {
        let booking = self.require(booking_id).await?;
        let existing = self.store.payment_by_transaction(&details.transaction_id).await?;

        if let Some(payment) = &existing {
            if payment.booking_id != booking_id {
                return Err(BookingError::invalid_state(format!(
                    "transaction {} belongs to another booking",
                    details.transaction_id
                )));
            }
            if matches!(
                payment.status,
                PaymentStatus::Captured | PaymentStatus::Refunded | PaymentStatus::Failed
            ) {
                return Ok(payment.clone());
            }
        }

        let now = self.clock.now();
        let failed = Payment {
            status: PaymentStatus::Failed,
            failed_at: Some(now),
            gateway_response: details.gateway_response.clone(),
            ..existing.unwrap_or_else(|| self.new_payment(booking_id, &details, now))
        };
        self.store
            .save_payment(&failed)
            .await
            .map_err(duplicate_as_invalid)?;

        warn!(
            "Payment {} failed for booking {} ({})",
            details.transaction_id, booking_id, booking.status
        );
        Ok(failed)
    }

    /// User cancellation, PENDING or CONFIRMED only. A confirmed booking gets a
    /// pending refund of whatever is still refundable.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> BookingResult<Booking> {
        let booking = self.require(booking_id).await?;
        if booking.user_id != user_id {
            return Err(BookingError::NotOwner);
        }
        let closed = self
            .close(booking_id, BookingStatus::Cancelled, reason.clone(), Some(user_id))
            .await?;

        self.notifier.emit(DomainEvent::BookingCancelled {
            booking_id,
            event_id: closed.event_id,
            user_id,
            reason,
        });
        Ok(closed)
    }

    /// Expires a PENDING booking whose payment window elapsed.
    pub async fn expire_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let closed = self.close(booking_id, BookingStatus::Expired, None, None).await?;
        self.notifier.emit(DomainEvent::BookingExpired {
            booking_id,
            event_id: closed.event_id,
            user_id: closed.user_id,
        });
        Ok(closed)
    }

    /// Moves an active booking to CANCELLED or EXPIRED. Seats, the refund and,
    /// for general-admission events, the holder's registration all change in
    /// the same store step as the booking.
    async fn close(
        &self,
        booking_id: Uuid,
        target: BookingStatus,
        reason: Option<String>,
        initiated_by: Option<Uuid>,
    ) -> BookingResult<Booking> {
        let attempts = self.config.max_cas_attempts.max(1);
        let mut stale = Vec::new();

        for attempt in 1..=attempts {
            let booking = self.require(booking_id).await?;
            let allowed = match target {
                BookingStatus::Expired => booking.status == BookingStatus::Pending,
                _ => booking.status.is_active(),
            };
            if !allowed {
                return Err(BookingError::invalid_state(format!(
                    "cannot move a {} booking to {}",
                    booking.status, target
                )));
            }

            let now = self.clock.now();
            let event = SeatInventory::require_event(self.store.as_ref(), booking.event_id).await?;
            let seat_writes = self.seat_releases(&booking, now).await?;
            let refund = if booking.status == BookingStatus::Confirmed {
                self.full_refund(&booking, reason.clone(), initiated_by, now).await?
            } else {
                None
            };
            let registration_release = if event.is_seat_mapped() {
                None
            } else {
                self.registrations
                    .release_for_booking(booking.event_id, booking.user_id, reason.clone(), now)
                    .await?
            };

            let closed = Booking {
                status: target,
                cancellation_reason: reason.clone(),
                cancelled_at: Some(now),
                updated_at: now,
                ..booking.clone()
            };
            let transition = BookingTransition {
                booking: closed.clone(),
                expected_status: booking.status,
                seat_writes,
                payment: None,
                refund,
                registration_release,
            };

            match self.store.apply_booking_transition(&transition).await? {
                TransitionOutcome::Applied { promoted } => {
                    info!("Booking {} moved {} -> {}", booking_id, booking.status, target);
                    if let Some(promoted) = promoted {
                        self.registrations.announce_promotion(closed.event_id, &promoted);
                    }
                    return Ok(closed);
                }
                TransitionOutcome::StaleBooking => {
                    debug!("booking {} changed under us, re-reading", booking_id);
                }
                TransitionOutcome::StaleSeats(ids) => {
                    debug!("seat CAS lost closing booking {}: {:?}", booking_id, ids);
                    stale = ids;
                }
            }
            self.backoff(attempt).await;
        }

        Err(BookingError::Conflict { seat_ids: stale })
    }

    /// BOOKED -> AVAILABLE writes for every seat attached to the booking.
    async fn seat_releases(&self, booking: &Booking, now: DateTime<Utc>) -> BookingResult<Vec<SeatWrite>> {
        let ids: Vec<i64> = self
            .store
            .booking_seats(booking.id)
            .await?
            .iter()
            .map(|bs| bs.event_seat_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let seats: Vec<EventSeat> = self.store.load_seats(booking.event_id, &ids).await?;
        Ok(seats
            .iter()
            .filter(|s| s.status == SeatStatus::Booked)
            .map(|s| SeatWrite::new(s, s.released(now)))
            .collect())
    }

    async fn captured_payment(&self, booking_id: Uuid) -> BookingResult<Option<Payment>> {
        Ok(self
            .store
            .booking_payments(booking_id)
            .await?
            .into_iter()
            .find(|p| p.status == PaymentStatus::Captured))
    }

    async fn full_refund(
        &self,
        booking: &Booking,
        reason: Option<String>,
        initiated_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> BookingResult<Option<Refund>> {
        let Some(payment) = self.captured_payment(booking.id).await? else {
            return Ok(None);
        };
        let refunds = self.store.payment_refunds(payment.id).await?;
        let amount = refundable_amount(&payment, &refunds);
        if amount <= Decimal::ZERO {
            return Ok(None);
        }
        Ok(Some(Refund::pending(payment.id, amount, reason, initiated_by, now)))
    }

    /// Partial or full refund requested by the booking's owner.
    pub async fn request_refund(
        &self,
        booking_id: Uuid,
        amount: Decimal,
        reason: Option<String>,
        initiated_by: Uuid,
    ) -> BookingResult<Refund> {
        let booking = self.require(booking_id).await?;
        if booking.user_id != initiated_by {
            return Err(BookingError::NotOwner);
        }
        if amount <= Decimal::ZERO {
            return Err(BookingError::validation("refund amount must be positive"));
        }
        let payment = self
            .captured_payment(booking_id)
            .await?
            .ok_or_else(|| BookingError::invalid_state("booking has no captured payment"))?;

        let refund = Refund::pending(payment.id, amount, reason, Some(initiated_by), self.clock.now());
        if !self.store.insert_refund(&refund).await? {
            return Err(BookingError::validation(format!(
                "refund of {amount} exceeds the refundable amount"
            )));
        }
        info!("Refund {} of {} requested for booking {}", refund.id, amount, booking_id);
        Ok(refund)
    }

    /// Applies the gateway's answer to a pending refund. Once processed refunds
    /// cover the whole payment, the payment is marked REFUNDED.
    pub async fn settle_refund(&self, refund_id: Uuid, outcome: RefundOutcome) -> BookingResult<Refund> {
        let refund = self
            .store
            .refund(refund_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("refund {refund_id}")))?;

        let target = match &outcome {
            RefundOutcome::Processed { .. } => RefundStatus::Processed,
            RefundOutcome::Failed => RefundStatus::Failed,
        };
        if refund.status == target {
            return Ok(refund);
        }
        if refund.status != RefundStatus::Pending {
            return Err(BookingError::invalid_state(format!(
                "refund is already {}",
                refund.status
            )));
        }

        let now = self.clock.now();
        let settled = match outcome {
            RefundOutcome::Processed { gateway_refund_id } => Refund {
                status: RefundStatus::Processed,
                gateway_refund_id,
                processed_at: Some(now),
                ..refund
            },
            RefundOutcome::Failed => Refund {
                status: RefundStatus::Failed,
                processed_at: Some(now),
                ..refund
            },
        };

        let payment_refunded = if settled.status == RefundStatus::Processed {
            let payment = self
                .store
                .payment(settled.payment_id)
                .await?
                .ok_or_else(|| BookingError::not_found(format!("payment {}", settled.payment_id)))?;
            let processed: Decimal = self
                .store
                .payment_refunds(payment.id)
                .await?
                .iter()
                .filter(|r| r.status == RefundStatus::Processed && r.id != settled.id)
                .map(|r| r.amount)
                .sum();
            processed + settled.amount >= payment.amount
        } else {
            false
        };

        if !self.store.settle_refund(&settled, payment_refunded).await? {
            return Err(BookingError::invalid_state("refund was settled concurrently"));
        }
        info!("Refund {} settled as {}", settled.id, settled.status);
        Ok(settled)
    }

    pub async fn booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.require(booking_id).await
    }

    pub async fn booking_seats(&self, booking_id: Uuid) -> BookingResult<Vec<BookingSeat>> {
        self.require(booking_id).await?;
        Ok(self.store.booking_seats(booking_id).await?)
    }

    pub async fn user_bookings(&self, user_id: Uuid) -> BookingResult<Vec<Booking>> {
        Ok(self.store.user_bookings(user_id).await?)
    }
}
