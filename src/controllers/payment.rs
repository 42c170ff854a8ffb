use axum::{extract::State, routing::post, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{ok, ApiResult};
use crate::models::{Booking, Payment, PaymentGateway};
use crate::services::PaymentDetails;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookStatus {
    Captured,
    Failed,
}

/// Callback body posted by the payment gateway adapter.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    pub booking_id: Uuid,
    pub transaction_id: String,
    pub gateway: PaymentGateway,
    pub amount: Decimal,
    pub status: WebhookStatus,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WebhookResult {
    Confirmed { booking: Booking },
    Failed { payment: Payment },
}

/// POST /api/payments/webhook
///
/// Deliveries are idempotent by transaction id, so gateways may retry freely.
async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<PaymentWebhook>,
) -> ApiResult<WebhookResult> {
    info!(
        "Payment webhook: booking {} transaction {} status {:?}",
        hook.booking_id, hook.transaction_id, hook.status
    );

    let details = PaymentDetails {
        gateway: hook.gateway,
        transaction_id: hook.transaction_id,
        amount: hook.amount,
        gateway_response: hook.payload,
    };

    match hook.status {
        WebhookStatus::Captured => {
            let booking = state.bookings.confirm_payment(hook.booking_id, details).await?;
            ok(WebhookResult::Confirmed { booking })
        }
        WebhookStatus::Failed => {
            let payment = state.bookings.fail_payment(hook.booking_id, details).await?;
            ok(WebhookResult::Failed { payment })
        }
    }
}
