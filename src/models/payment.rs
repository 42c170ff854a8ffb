use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

db_enum! {
    PaymentGateway {
        Razorpay => "RAZORPAY",
        Stripe => "STRIPE",
        Paytm => "PAYTM",
    }
}

db_enum! {
    PaymentStatus {
        Pending => "PENDING",
        Captured => "CAPTURED",
        Failed => "FAILED",
        Refunded => "REFUNDED",
    }
}

db_enum! {
    RefundStatus {
        Pending => "PENDING",
        Processed => "PROCESSED",
        Failed => "FAILED",
    }
}

pub const DEFAULT_CURRENCY: &str = "INR";

/// One payment attempt against a booking. `transaction_id` is the gateway's
/// reference and is unique across all payments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub gateway: PaymentGateway,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub gateway_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub gateway_refund_id: Option<String>,
    pub status: RefundStatus,
    pub initiated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Refund {
    pub fn pending(
        payment_id: Uuid,
        amount: Decimal,
        reason: Option<String>,
        initiated_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            amount,
            reason,
            gateway_refund_id: None,
            status: RefundStatus::Pending,
            initiated_by,
            created_at: now,
            processed_at: None,
        }
    }
}

/// Amount of `payment` not yet claimed by a pending or processed refund.
pub fn refundable_amount(payment: &Payment, refunds: &[Refund]) -> Decimal {
    let claimed: Decimal = refunds
        .iter()
        .filter(|r| r.payment_id == payment.id && r.status != RefundStatus::Failed)
        .map(|r| r.amount)
        .sum();
    (payment.amount - claimed).max(Decimal::ZERO)
}
