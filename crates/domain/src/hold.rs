//! Stock holds: time-boxed reservations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surgecart_core::{HoldId, ProductId};

/// Hold lifecycle status.
///
/// `active --expire--> Expired` and `active --consume--> Consumed`; both
/// target states are absorbing. A hold is never reactivated or reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldStatus {
    Active,
    Consumed,
    Expired,
}

impl HoldStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HoldStatus::Consumed | HoldStatus::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::Active => "active",
            HoldStatus::Consumed => "consumed",
            HoldStatus::Expired => "expired",
        }
    }
}

/// A reservation of `qty` units against a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: HoldId,
    pub product_id: ProductId,
    pub qty: i64,
    pub status: HoldStatus,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    /// Unique token; exists so an accidental double-insert trips the
    /// store's uniqueness constraint instead of passing silently.
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(
        id: HoldId,
        product_id: ProductId,
        qty: i64,
        expires_at: DateTime<Utc>,
        token: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            product_id,
            qty,
            status: HoldStatus::Active,
            expires_at,
            used_at: None,
            token,
            created_at,
        }
    }

    /// Active and not yet past its TTL.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && self.expires_at > now
    }

    /// Past TTL (regardless of status).
    pub fn is_past_ttl(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Eligible for the expiry sweep: still active, TTL elapsed.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Active && self.is_past_ttl(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn hold_expiring_at(expires_at: DateTime<Utc>) -> Hold {
        Hold::new(
            HoldId::new(),
            ProductId::new(),
            5,
            expires_at,
            "tok".into(),
            Utc::now(),
        )
    }

    #[test]
    fn usable_until_ttl() {
        let now = Utc::now();
        let hold = hold_expiring_at(now + Duration::minutes(2));
        assert!(hold.is_usable_at(now));
        assert!(!hold.is_usable_at(now + Duration::minutes(2)));
    }

    #[test]
    fn terminal_states_are_never_due() {
        let now = Utc::now();
        let mut hold = hold_expiring_at(now - Duration::minutes(1));
        assert!(hold.is_due_for_expiry(now));
        hold.status = HoldStatus::Consumed;
        assert!(!hold.is_due_for_expiry(now));
        hold.status = HoldStatus::Expired;
        assert!(!hold.is_due_for_expiry(now));
    }
}
