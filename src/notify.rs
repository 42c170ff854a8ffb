//! Domain events handed to the external notifier. Delivery is not our concern;
//! emitting never fails the operation that produced the event.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEvent {
    BookingConfirmed {
        booking_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        qr_code_data: String,
    },
    BookingCancelled {
        booking_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    },
    BookingExpired {
        booking_id: Uuid,
        event_id: Uuid,
        user_id: Uuid,
    },
    WaitlistPromoted {
        event_id: Uuid,
        user_id: Uuid,
        registration_id: Uuid,
    },
}

pub trait Notifier: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Writes events to the log; the default when no consumer is wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: DomainEvent) {
        info!("domain event: {:?}", event);
    }
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<DomainEvent>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: DomainEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
