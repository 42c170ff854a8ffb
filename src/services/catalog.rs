use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::error::{BookingError, BookingResult, StoreError};
use crate::models::{NewSeat, Seat};
use crate::store::Store;

/// Static seat definitions per venue.
pub struct SeatCatalog {
    store: Arc<dyn Store>,
}

impl SeatCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Adds seats to a venue. Either every seat is created or none is.
    pub async fn add_venue_seats(&self, venue_id: Uuid, seats: Vec<NewSeat>) -> BookingResult<Vec<Seat>> {
        if seats.is_empty() {
            return Err(BookingError::validation("at least one seat is required"));
        }

        let mut seen = HashSet::new();
        for seat in &seats {
            seat.validate()?;
            if !seen.insert(seat.position()) {
                return Err(BookingError::validation(format!(
                    "seat {}/{}/{} listed twice",
                    seat.section, seat.row_label, seat.seat_number
                )));
            }
        }

        let created = match self.store.insert_seats(venue_id, &seats).await {
            Ok(created) => created,
            Err(StoreError::Duplicate(msg)) => return Err(BookingError::InvalidState(msg)),
            Err(e) => return Err(e.into()),
        };

        info!("Added {} seats to venue {}", created.len(), venue_id);
        Ok(created)
    }

    pub async fn venue_seats(&self, venue_id: Uuid) -> BookingResult<Vec<Seat>> {
        Ok(self.store.venue_seats(venue_id).await?)
    }
}
