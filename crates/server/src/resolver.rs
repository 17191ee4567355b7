use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::subscriber::Subscriber;
use crate::models::transaction::Transaction;
use crate::store::types::TransactionStatus;

/// The product-side inputs the resolver needs: which entitlements a product
/// grants, keyed by the product's internal id.
#[derive(Debug, Clone, Default)]
pub struct ProductGrants {
    pub store_product_id: String,
    pub entitlement_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitlementInfo {
    pub id: String,
    pub is_active: bool,
    pub will_renew: bool,
    pub expiration_date: Option<String>,
    pub product_id: String,
    pub store: String,
    pub purchase_date: String,
}

/// The canonical per-subscriber projection; the single source of truth for
/// the `isEntitled` question clients ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub app_user_id: String,
    pub first_seen_at: String,
    pub active_entitlements: BTreeMap<String, EntitlementInfo>,
    pub all_transactions: Vec<Transaction>,
}

struct Candidate {
    info: EntitlementInfo,
    expiration: Option<DateTime<Utc>>,
    purchase: DateTime<Utc>,
}

/// Pure reducer over the full transaction history. Deterministic and
/// side-effect-free; the HTTP layer caches nothing beyond this call.
///
/// Refunded transactions emit no entry at all: a refund revokes the grant
/// retroactively. An expired or lapsed transaction stays visible with
/// `is_active = false`, so clients can distinguish "never subscribed" from
/// "subscription ended".
pub fn resolve(
    subscriber: &Subscriber,
    transactions: &[Transaction],
    grants: &HashMap<String, ProductGrants>,
    now: DateTime<Utc>,
) -> CustomerInfo {
    let mut best: BTreeMap<String, Candidate> = BTreeMap::new();

    for tx in transactions {
        let Some(status) = TransactionStatus::parse(&tx.status) else {
            continue;
        };
        if status == TransactionStatus::Refunded {
            continue;
        }

        let Some(product) = grants.get(&tx.product_id) else {
            continue;
        };

        let expiration = tx.expiration_date.as_deref().and_then(parse_datetime);
        let Some(purchase) = parse_datetime(&tx.purchase_date) else {
            continue;
        };

        let is_active = status.grants_access()
            && match expiration {
                None => true,
                Some(exp) => exp > now,
            };
        let will_renew = status == TransactionStatus::Active && expiration.is_some();

        for name in &product.entitlement_names {
            let candidate = Candidate {
                info: EntitlementInfo {
                    id: name.clone(),
                    is_active,
                    will_renew,
                    expiration_date: tx.expiration_date.clone(),
                    product_id: product.store_product_id.clone(),
                    store: tx.store.clone(),
                    purchase_date: tx.purchase_date.clone(),
                },
                expiration,
                purchase,
            };

            match best.get(name) {
                Some(current) if !beats(&candidate, current) => {}
                _ => {
                    best.insert(name.clone(), candidate);
                }
            }
        }
    }

    CustomerInfo {
        app_user_id: subscriber.app_user_id.clone(),
        first_seen_at: subscriber.created_at.clone(),
        active_entitlements: best
            .into_iter()
            .map(|(name, candidate)| (name, candidate.info))
            .collect(),
        all_transactions: transactions.to_vec(),
    }
}

/// Tie-break: active beats inactive; among equals, the latest expiration
/// (none meaning lifetime, which sorts last); then the latest purchase.
fn beats(a: &Candidate, b: &Candidate) -> bool {
    if a.info.is_active != b.info.is_active {
        return a.info.is_active;
    }
    let exp_order = match (a.expiration, b.expiration) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    };
    match exp_order {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.purchase > b.purchase,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
