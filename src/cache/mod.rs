use crate::redis_client::RedisClient;

pub mod seats;

/// Redis cache-aside for read models. Every failure degrades to a cache miss.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    seat_listing_ttl_secs: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, seat_listing_ttl_secs: u64) -> Self {
        Self {
            redis,
            seat_listing_ttl_secs,
        }
    }
}
