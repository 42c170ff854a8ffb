pub mod bookings;
pub mod payment;
pub mod registrations;
pub mod seats;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::BookingError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, BookingError>;

pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse {
        success: true,
        data,
    }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(bookings::routes())
        .merge(payment::routes())
        .merge(registrations::routes())
}

/// Full application router: `/api` routes plus the root and health check.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/api", routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "service": "event_booking",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
