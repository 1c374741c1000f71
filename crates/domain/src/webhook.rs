//! Ingested payment notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surgecart_core::{OrderId, WebhookEventId};

/// Outcome of the most recent processing attempt.
///
/// `Applied` and `Failed` are terminal once the event is marked processed;
/// `WaitingForOrder` is the explicit non-terminal state for notifications
/// that outran order creation and are eligible for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Failed,
    WaitingForOrder,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied => "applied",
            WebhookOutcome::Failed => "failed",
            WebhookOutcome::WaitingForOrder => "waiting_for_order",
        }
    }
}

/// A payment notification, deduplicated by `idempotency_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    /// Caller-supplied token; the sole deduplication key (globally unique).
    pub idempotency_key: String,
    /// Referenced order, if resolvable at ingestion time.
    pub order_id: Option<OrderId>,
    /// Gateway event type, taken from `payload["type"]` when present.
    pub event_type: Option<String>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub outcome: Option<WebhookOutcome>,
    pub processed_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        id: WebhookEventId,
        idempotency_key: impl Into<String>,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
    ) -> Self {
        let order_id = payload::order_id(&payload);
        let event_type = payload::event_type(&payload).map(str::to_owned);
        Self {
            id,
            idempotency_key: idempotency_key.into(),
            order_id,
            event_type,
            payload,
            processed: false,
            outcome: None,
            processed_at: None,
            received_at,
        }
    }

    /// Eligible for the retry sweep.
    pub fn is_waiting_for_order(&self) -> bool {
        !self.processed && self.outcome == Some(WebhookOutcome::WaitingForOrder)
    }
}

/// Field extraction from raw gateway payloads.
///
/// The core never interprets anything beyond these pre-agreed fields; the
/// rest of the payload is carried opaquely.
pub mod payload {
    use super::*;

    /// The pre-validated payment status; required for ingestion.
    pub fn status(payload: &serde_json::Value) -> Option<&str> {
        payload.get("status").and_then(|v| v.as_str())
    }

    pub fn order_id(payload: &serde_json::Value) -> Option<OrderId> {
        payload
            .get("order_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    pub fn payment_id(payload: &serde_json::Value) -> Option<&str> {
        payload.get("payment_id").and_then(|v| v.as_str())
    }

    pub fn event_type(payload: &serde_json::Value) -> Option<&str> {
        payload.get("type").and_then(|v| v.as_str())
    }
}
