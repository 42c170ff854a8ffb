use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::models::{EventRecord, SeatListing, SeatType, SeatView};
use crate::store::Store;

/// Read side of the per-event seat rows, plus the one-off setup that creates them.
pub struct SeatInventory {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl SeatInventory {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub(crate) async fn require_event(store: &dyn Store, event_id: Uuid) -> BookingResult<EventRecord> {
        store
            .event(event_id)
            .await?
            .ok_or_else(|| BookingError::not_found(format!("event {event_id}")))
    }

    /// Snapshot of every seat of the event with its stored status.
    pub async fn list_seats(&self, event_id: Uuid) -> BookingResult<SeatListing> {
        Self::require_event(self.store.as_ref(), event_id).await?;
        let views = self
            .store
            .seat_map(event_id)
            .await?
            .iter()
            .map(|(event_seat, seat)| SeatView::new(event_seat, seat))
            .collect();
        Ok(SeatListing::from_views(views))
    }

    pub async fn count_available(&self, event_id: Uuid) -> BookingResult<i64> {
        Self::require_event(self.store.as_ref(), event_id).await?;
        Ok(self.store.count_available(event_id).await?)
    }

    /// Creates one AVAILABLE row per catalog seat of the event's venue, priced
    /// by seat type. Rows that already exist are left alone.
    pub async fn configure_event(
        &self,
        event_id: Uuid,
        price_by_type: &BTreeMap<SeatType, Decimal>,
    ) -> BookingResult<usize> {
        let event = Self::require_event(self.store.as_ref(), event_id).await?;
        let Some(venue_id) = event.venue_id else {
            return Err(BookingError::invalid_state(
                "event has no seat map; capacity is tracked by registrations",
            ));
        };

        if let Some((seat_type, _)) = price_by_type.iter().find(|(_, p)| p.is_sign_negative()) {
            return Err(BookingError::validation(format!("negative price for {seat_type}")));
        }

        let catalog = self.store.venue_seats(venue_id).await?;
        let mut priced = Vec::with_capacity(catalog.len());
        for seat in &catalog {
            let price = price_by_type.get(&seat.seat_type).ok_or_else(|| {
                BookingError::validation(format!("no price for seat type {}", seat.seat_type))
            })?;
            priced.push((seat.id, *price));
        }

        let created = self
            .store
            .instantiate_event_seats(event_id, &priced, self.clock.now())
            .await?;
        info!(
            "Configured event {}: {} of {} venue seats instantiated",
            event_id,
            created,
            catalog.len()
        );
        Ok(created)
    }
}
