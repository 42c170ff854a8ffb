use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{ok, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{EventSeat, NewSeat, Seat, SeatListing, SeatType};
use crate::services::SeatLock;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/venues/{venue_id}/seats", get(venue_seats).post(add_venue_seats))
        .route("/events/{event_id}/seats", get(list_seats))
        .route("/events/{event_id}/seats/available", get(count_available))
        .route("/events/{event_id}/seats/config", put(configure_event))
        .route("/events/{event_id}/seats/lock", post(lock_seats))
        .route("/events/{event_id}/seats/release", post(release_seats))
        .route("/events/{event_id}/seats/block", post(block_seats))
        .route("/events/{event_id}/seats/unblock", post(unblock_seats))
}

#[derive(Debug, Deserialize, Validate)]
pub struct LockSeatsRequest {
    #[validate(length(min = 1))]
    pub seat_ids: Vec<i64>,
    #[validate(range(min = 1))]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SeatIdsRequest {
    #[validate(length(min = 1))]
    pub seat_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfigureEventRequest {
    pub price_by_type: BTreeMap<SeatType, Decimal>,
}

#[derive(Debug, Serialize)]
pub struct AvailableCount {
    pub event_id: Uuid,
    pub available_seats: i64,
}

#[derive(Debug, Serialize)]
pub struct Configured {
    pub event_id: Uuid,
    pub seats_created: usize,
}

/// GET /api/events/{event_id}/seats
async fn list_seats(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<SeatListing> {
    if let Some(cache) = &state.cache {
        if let Some(listing) = cache.get_seat_listing(event_id).await {
            return ok(listing);
        }
    }

    let listing = state.inventory.list_seats(event_id).await?;
    if let Some(cache) = &state.cache {
        cache.save_seat_listing(event_id, &listing).await;
    }
    ok(listing)
}

/// GET /api/events/{event_id}/seats/available
async fn count_available(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<AvailableCount> {
    let available_seats = state.inventory.count_available(event_id).await?;
    ok(AvailableCount {
        event_id,
        available_seats,
    })
}

/// POST /api/events/{event_id}/seats/lock
async fn lock_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<LockSeatsRequest>,
) -> ApiResult<SeatLock> {
    req.validate()?;
    let ttl = req.ttl_secs.map(Duration::seconds);
    let lock = state
        .locks
        .lock_seats(event_id, user.user_id, &req.seat_ids, ttl)
        .await?;
    state.invalidate_seats(event_id).await;
    ok(lock)
}

/// POST /api/events/{event_id}/seats/release
async fn release_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SeatIdsRequest>,
) -> ApiResult<Vec<i64>> {
    req.validate()?;
    let released = state
        .locks
        .release_seats(event_id, user.user_id, &req.seat_ids)
        .await?;
    if !released.is_empty() {
        state.invalidate_seats(event_id).await;
    }
    ok(released)
}

/// POST /api/events/{event_id}/seats/block
async fn block_seats(
    State(state): State<Arc<AppState>>,
    _organiser: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SeatIdsRequest>,
) -> ApiResult<Vec<EventSeat>> {
    req.validate()?;
    let seats = state.locks.block_seats(event_id, &req.seat_ids).await?;
    state.invalidate_seats(event_id).await;
    ok(seats)
}

/// POST /api/events/{event_id}/seats/unblock
async fn unblock_seats(
    State(state): State<Arc<AppState>>,
    _organiser: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<SeatIdsRequest>,
) -> ApiResult<Vec<EventSeat>> {
    req.validate()?;
    let seats = state.locks.unblock_seats(event_id, &req.seat_ids).await?;
    state.invalidate_seats(event_id).await;
    ok(seats)
}

/// PUT /api/events/{event_id}/seats/config
async fn configure_event(
    State(state): State<Arc<AppState>>,
    _organiser: AuthUser,
    Path(event_id): Path<Uuid>,
    Json(req): Json<ConfigureEventRequest>,
) -> ApiResult<Configured> {
    let seats_created = state
        .inventory
        .configure_event(event_id, &req.price_by_type)
        .await?;
    state.invalidate_seats(event_id).await;
    ok(Configured {
        event_id,
        seats_created,
    })
}

/// GET /api/venues/{venue_id}/seats
async fn venue_seats(
    State(state): State<Arc<AppState>>,
    Path(venue_id): Path<Uuid>,
) -> ApiResult<Vec<Seat>> {
    ok(state.catalog.venue_seats(venue_id).await?)
}

/// POST /api/venues/{venue_id}/seats
async fn add_venue_seats(
    State(state): State<Arc<AppState>>,
    _organiser: AuthUser,
    Path(venue_id): Path<Uuid>,
    Json(seats): Json<Vec<NewSeat>>,
) -> ApiResult<Vec<Seat>> {
    ok(state.catalog.add_venue_seats(venue_id, seats).await?)
}
