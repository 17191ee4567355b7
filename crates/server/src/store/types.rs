use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Store {
    Apple,
    Google,
}

impl Store {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Google => "google",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "apple" => Some(Self::Apple),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

/// Normalized lifecycle state shared by both adapters; see the status
/// normalization table in the store module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Expired,
    Refunded,
    GracePeriod,
    BillingRetry,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Refunded => "refunded",
            Self::GracePeriod => "grace_period",
            Self::BillingRetry => "billing_retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "refunded" => Some(Self::Refunded),
            "grace_period" => Some(Self::GracePeriod),
            "billing_retry" => Some(Self::BillingRetry),
            _ => None,
        }
    }

    /// Statuses that keep an entitlement granted (modulo expiration).
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::GracePeriod | Self::BillingRetry)
    }
}

/// What a client submits for verification. Apple sends the JWS
/// representation, Google the purchase token.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub data: String,
    pub store_product_id: String,
    pub is_subscription: bool,
}

/// A store-verified purchase, normalized across adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub store: Store,
    pub store_transaction_id: String,
    pub store_product_id: String,
    pub purchase_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
    /// Opaque store-returned blob retained for audit.
    pub raw: serde_json::Value,
}

/// Product metadata as returned by a store catalog API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub store_product_id: String,
    pub product_type: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub price_micros: Option<i64>,
    pub currency: Option<String>,
    pub subscription_period: Option<String>,
    pub trial_period: Option<String>,
}
