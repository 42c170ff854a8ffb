use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::{ok, ApiResult};
use crate::middleware::AuthUser;
use crate::models::{EventRegistration, WaitlistEntry};
use crate::services::RegistrationOutcome;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/{event_id}/registrations", post(register))
        .route("/events/{event_id}/registrations/cancel", post(cancel_registration))
        .route("/events/{event_id}/registrations/{user_id}/approve", post(approve))
        .route("/events/{event_id}/registrations/{user_id}/reject", post(reject))
        .route("/events/{event_id}/registrations/{user_id}/check-in", post(check_in))
        .route("/events/{event_id}/waitlist", get(waitlist).delete(leave_waitlist))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRegistrationRequest {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// POST /api/events/{event_id}/registrations
async fn register(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> ApiResult<RegistrationOutcome> {
    ok(state.registrations.register(event_id, user.user_id).await?)
}

/// POST /api/events/{event_id}/registrations/{user_id}/approve
async fn approve(
    State(state): State<Arc<AppState>>,
    reviewer: AuthUser,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<EventRegistration> {
    ok(state
        .registrations
        .approve(event_id, user_id, reviewer.user_id)
        .await?)
}

/// POST /api/events/{event_id}/registrations/{user_id}/reject
async fn reject(
    State(state): State<Arc<AppState>>,
    reviewer: AuthUser,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<EventRegistration> {
    req.validate()?;
    ok(state
        .registrations
        .reject(event_id, user_id, reviewer.user_id, &req.reason)
        .await?)
}

/// POST /api/events/{event_id}/registrations/cancel
async fn cancel_registration(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    body: Option<Json<CancelRegistrationRequest>>,
) -> ApiResult<EventRegistration> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;
    ok(state
        .registrations
        .cancel(event_id, user.user_id, req.reason)
        .await?)
}

/// POST /api/events/{event_id}/registrations/{user_id}/check-in
async fn check_in(
    State(state): State<Arc<AppState>>,
    staff: AuthUser,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<EventRegistration> {
    ok(state
        .registrations
        .check_in(event_id, user_id, staff.user_id)
        .await?)
}

/// GET /api/events/{event_id}/waitlist
async fn waitlist(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Vec<WaitlistEntry>> {
    ok(state.registrations.waitlist(event_id).await?)
}

/// DELETE /api/events/{event_id}/waitlist
async fn leave_waitlist(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> ApiResult<()> {
    state
        .registrations
        .leave_waitlist(event_id, user.user_id)
        .await?;
    ok(())
}
