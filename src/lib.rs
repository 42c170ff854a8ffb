pub mod cache;
pub mod clock;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod redis_client;
pub mod services;
pub mod store;

use std::sync::Arc;
use tracing::info;

use clock::{Clock, SystemClock};
use notify::{LogNotifier, Notifier};
use services::{
    BookingEngine, ExpirySweeper, LockManager, RegistrationService, SeatCatalog, SeatInventory,
};
use store::{PgStore, Store};

// Shared state for every handler and the background sweeper
pub struct AppState {
    pub config: config::Config,
    pub store: Arc<dyn Store>,
    pub cache: Option<cache::CacheService>,
    pub catalog: SeatCatalog,
    pub inventory: SeatInventory,
    pub locks: LockManager,
    pub bookings: Arc<BookingEngine>,
    pub registrations: Arc<RegistrationService>,
    pub sweeper: Arc<ExpirySweeper>,
}

impl AppState {
    /// Production wiring: Postgres store, Redis cache, system clock, log notifier.
    pub async fn new(config: config::Config) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let db = database::Database::new(&config.database).await?;
        db.run_migrations().await?;

        let redis = redis_client::RedisClient::new(&config.redis.url).await?;
        let cache = cache::CacheService::new(redis, config.redis.seat_listing_ttl_secs);
        info!("Connected to Postgres and Redis");

        Ok(Self::with_store(
            config,
            Arc::new(PgStore::new(db.pool)),
            Arc::new(SystemClock),
            Arc::new(LogNotifier),
            Some(cache),
        ))
    }

    pub fn with_store(
        config: config::Config,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        cache: Option<cache::CacheService>,
    ) -> Arc<Self> {
        let booking_config = config.booking.clone();
        let registrations = Arc::new(RegistrationService::new(
            store.clone(),
            clock.clone(),
            notifier.clone(),
        ));
        let bookings = Arc::new(BookingEngine::new(
            store.clone(),
            clock.clone(),
            notifier,
            registrations.clone(),
            booking_config.clone(),
        ));
        let sweeper = Arc::new(ExpirySweeper::new(
            store.clone(),
            clock.clone(),
            bookings.clone(),
            booking_config.clone(),
        ));

        Arc::new(Self {
            catalog: SeatCatalog::new(store.clone()),
            inventory: SeatInventory::new(store.clone(), clock.clone()),
            locks: LockManager::new(store.clone(), clock, booking_config),
            bookings,
            registrations,
            sweeper,
            store,
            cache,
            config,
        })
    }

    pub async fn invalidate_seats(&self, event_id: uuid::Uuid) {
        if let Some(cache) = &self.cache {
            cache.invalidate_seats(event_id).await;
        }
    }
}
