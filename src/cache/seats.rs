use redis::AsyncCommands;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::CacheService;
use crate::models::SeatListing;

fn listing_key(event_id: Uuid) -> String {
    format!("event:{}:seats", event_id)
}

impl CacheService {
    pub async fn get_seat_listing(&self, event_id: Uuid) -> Option<SeatListing> {
        match self.get_seat_listing_from_cache(event_id).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Seat listing cache read failed for event {}: {}", event_id, e);
                None
            }
        }
    }

    pub async fn save_seat_listing(&self, event_id: Uuid, listing: &SeatListing) {
        if let Err(e) = self.save_seat_listing_to_cache(event_id, listing).await {
            warn!("Seat listing cache write failed for event {}: {}", event_id, e);
        }
    }

    /// Drops the cached listing after any seat mutation of the event.
    pub async fn invalidate_seats(&self, event_id: Uuid) {
        let mut conn = self.redis.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(listing_key(event_id)).await;
        match result {
            Ok(()) => debug!("Invalidated seat listing cache for event {}", event_id),
            Err(e) => warn!("Seat listing invalidation failed for event {}: {}", event_id, e),
        }
    }

    // === raw cache access ===
    async fn get_seat_listing_from_cache(
        &self,
        event_id: Uuid,
    ) -> Result<Option<SeatListing>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: Option<String> = conn.get(listing_key(event_id)).await?;
        let Some(data) = data else {
            return Ok(None);
        };
        let listing = serde_json::from_str(&data).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error"))
        })?;
        Ok(Some(listing))
    }

    async fn save_seat_listing_to_cache(
        &self,
        event_id: Uuid,
        listing: &SeatListing,
    ) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(listing).map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error"))
        })?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(listing_key(event_id), data, self.seat_listing_ttl_secs)
            .await
    }
}
