//! Shared fixtures: an in-memory store, a manual clock and a channel notifier
//! wired into a full `AppState`.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use event_booking::clock::ManualClock;
use event_booking::config::Config;
use event_booking::models::{EventRecord, NewSeat, RegistrationMode, SeatType};
use event_booking::notify::{ChannelNotifier, DomainEvent};
use event_booking::store::{InventoryStore, MemoryStore};
use event_booking::AppState;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<ChannelNotifier>,
    pub state: Arc<AppState>,
}

pub struct SeatedEvent {
    pub event_id: Uuid,
    pub venue_id: Uuid,
    /// Inventory seat ids in section/row/number order.
    pub seat_ids: Vec<i64>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.booking.retry_backoff_ms = 1;
    config.booking.qr_secret = "test-secret".to_string();
    config
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()));
        let notifier = Arc::new(ChannelNotifier::new(64));
        let state = AppState::with_store(config, store.clone(), clock.clone(), notifier.clone(), None);
        Self {
            store,
            clock,
            notifier,
            state,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<DomainEvent> {
        self.notifier.subscribe()
    }

    /// Venue with two REGULAR seats in row A and two VIP seats in row B,
    /// priced 100.00 and 250.00.
    pub async fn seated_event(&self) -> SeatedEvent {
        let venue_id = Uuid::new_v4();
        let seats = vec![
            new_seat("A", 1, SeatType::Regular),
            new_seat("A", 2, SeatType::Regular),
            new_seat("B", 1, SeatType::Vip),
            new_seat("B", 2, SeatType::Vip),
        ];
        self.state.catalog.add_venue_seats(venue_id, seats).await.unwrap();

        let event_id = Uuid::new_v4();
        self.store
            .save_event(&EventRecord {
                id: event_id,
                venue_id: Some(venue_id),
                capacity: 4,
                registration_count: 0,
                registration_mode: RegistrationMode::AutoApprove,
                ticket_price: Decimal::ZERO,
            })
            .await
            .unwrap();

        let prices = BTreeMap::from([(SeatType::Regular, dec!(100.00)), (SeatType::Vip, dec!(250.00))]);
        self.state.inventory.configure_event(event_id, &prices).await.unwrap();

        let seat_ids = self
            .state
            .inventory
            .list_seats(event_id)
            .await
            .unwrap()
            .seats
            .iter()
            .map(|s| s.id)
            .collect();

        SeatedEvent {
            event_id,
            venue_id,
            seat_ids,
        }
    }

    /// Event without a seat map, capacity tracked by registrations.
    pub async fn admission_event(&self, capacity: i32, mode: RegistrationMode) -> Uuid {
        let event_id = Uuid::new_v4();
        self.store
            .save_event(&EventRecord {
                id: event_id,
                venue_id: None,
                capacity,
                registration_count: 0,
                registration_mode: mode,
                ticket_price: dec!(150.00),
            })
            .await
            .unwrap();
        event_id
    }

    pub async fn registration_count(&self, event_id: Uuid) -> i32 {
        self.store.event(event_id).await.unwrap().unwrap().registration_count
    }
}

pub fn new_seat(row: &str, number: i32, seat_type: SeatType) -> NewSeat {
    NewSeat {
        section: "MAIN".to_string(),
        row_label: row.to_string(),
        seat_number: number,
        seat_type,
    }
}
