use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{ok, ApiResult};
use crate::error::BookingError;
use crate::middleware::AuthUser;
use crate::models::{Booking, BookingSeat, Refund};
use crate::services::RefundOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", get(user_bookings).post(create_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/seats", get(booking_seats))
        .route("/bookings/{booking_id}/cancel", post(cancel_booking))
        .route("/bookings/{booking_id}/refunds", post(request_refund))
        .route("/events/{event_id}/admission", post(create_admission_booking))
        .route("/refunds/{refund_id}/settle", post(settle_refund))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookingRequest {
    pub event_id: Uuid,
    #[validate(length(min = 1))]
    pub seat_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelBookingRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    pub amount: Decimal,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

async fn owned_booking(state: &AppState, booking_id: Uuid, user: AuthUser) -> Result<Booking, BookingError> {
    let booking = state.bookings.booking(booking_id).await?;
    if booking.user_id != user.user_id {
        return Err(BookingError::NotOwner);
    }
    Ok(booking)
}

/// POST /api/bookings
async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> ApiResult<Booking> {
    req.validate()?;
    let booking = state
        .bookings
        .create_booking(req.event_id, user.user_id, &req.seat_ids)
        .await?;
    state.invalidate_seats(req.event_id).await;
    ok(booking)
}

/// POST /api/events/{event_id}/admission
async fn create_admission_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Booking> {
    ok(state
        .bookings
        .create_admission_booking(event_id, user.user_id)
        .await?)
}

/// GET /api/bookings
async fn user_bookings(State(state): State<Arc<AppState>>, user: AuthUser) -> ApiResult<Vec<Booking>> {
    ok(state.bookings.user_bookings(user.user_id).await?)
}

/// GET /api/bookings/{booking_id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Booking> {
    ok(owned_booking(&state, booking_id, user).await?)
}

/// GET /api/bookings/{booking_id}/seats
async fn booking_seats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Vec<BookingSeat>> {
    owned_booking(&state, booking_id, user).await?;
    ok(state.bookings.booking_seats(booking_id).await?)
}

/// POST /api/bookings/{booking_id}/cancel
async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
    body: Option<Json<CancelBookingRequest>>,
) -> ApiResult<Booking> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;
    let booking = state
        .bookings
        .cancel_booking(booking_id, user.user_id, req.reason)
        .await?;
    state.invalidate_seats(booking.event_id).await;
    ok(booking)
}

/// POST /api/bookings/{booking_id}/refunds
async fn request_refund(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Refund> {
    req.validate()?;
    ok(state
        .bookings
        .request_refund(booking_id, req.amount, req.reason, user.user_id)
        .await?)
}

/// POST /api/refunds/{refund_id}/settle
async fn settle_refund(
    State(state): State<Arc<AppState>>,
    Path(refund_id): Path<Uuid>,
    Json(outcome): Json<RefundOutcome>,
) -> ApiResult<Refund> {
    ok(state.bookings.settle_refund(refund_id, outcome).await?)
}
