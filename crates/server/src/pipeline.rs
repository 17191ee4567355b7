use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::crypto::Cryptor;
use crate::db::DbPool;
use crate::error::{ApiError, ApiResult};
use crate::events;
use crate::models::app::App;
use crate::models::credentials::StoreCredentials;
use crate::models::event::Event;
use crate::models::product::Product;
use crate::models::subscriber::Subscriber;
use crate::models::transaction::Transaction;
use crate::resolver::{self, CustomerInfo, ProductGrants};
use crate::store::types::{Receipt, Store, TransactionRecord, TransactionStatus};
use crate::store::StoreAdapterFactory;

/// A receipt as accepted by `POST /v1/receipts`, already validated by the
/// HTTP layer.
#[derive(Debug, Clone)]
pub struct ReceiptSubmission {
    pub app_user_id: String,
    pub store: Store,
    pub store_product_id: String,
    pub receipt_data: String,
}

/// Verifies a receipt, persists it idempotently, appends the derived event
/// and returns the subscriber's fresh projection.
pub async fn ingest(
    pool: &DbPool,
    factory: &dyn StoreAdapterFactory,
    cryptor: &Cryptor,
    delivery_signal: &Notify,
    app: &App,
    submission: &ReceiptSubmission,
) -> ApiResult<CustomerInfo> {
    let subscriber = ensure_subscriber(pool, &app.id, &submission.app_user_id).await?;

    let product = find_product(pool, &app.id, &submission.store_product_id)
        .await?
        .ok_or_else(|| {
            ApiError::Validation(format!(
                "unknown product \"{}\" for this app",
                submission.store_product_id
            ))
        })?;

    let credentials = StoreCredentials::decrypt_from(cryptor, app)?.unwrap_or_default();
    let adapter = factory.adapter(submission.store, &credentials, &app.bundle_id)?;

    let record = adapter
        .verify_receipt(&Receipt {
            data: submission.receipt_data.clone(),
            store_product_id: product.store_product_id.clone(),
            is_subscription: product.product_type == "subscription",
        })
        .await?;

    // The store's answer is authoritative about which product was bought.
    let product = if record.store_product_id == product.store_product_id {
        product
    } else {
        find_product(pool, &app.id, &record.store_product_id)
            .await?
            .ok_or_else(|| {
                ApiError::Validation(format!(
                    "receipt is for unknown product \"{}\"",
                    record.store_product_id
                ))
            })?
    };

    let outcome = apply_record(pool, app, &subscriber, &product, &record).await?;
    if outcome.is_some() {
        delivery_signal.notify_one();
    }

    customer_info(pool, app, &subscriber).await
}

/// Re-verifies every known transaction of a subscriber against its store and
/// returns the fresh projection. Individual refresh failures are logged and
/// skipped so one dead token cannot block a restore.
pub async fn restore(
    pool: &DbPool,
    factory: &dyn StoreAdapterFactory,
    cryptor: &Cryptor,
    delivery_signal: &Notify,
    app: &App,
    subscriber: &Subscriber,
) -> ApiResult<CustomerInfo> {
    let transactions = transactions_for(pool, &subscriber.id).await?;
    let credentials = StoreCredentials::decrypt_from(cryptor, app)?.unwrap_or_default();

    let mut appended = false;
    for tx in &transactions {
        let Some(store) = Store::parse(&tx.store) else {
            continue;
        };
        let adapter = match factory.adapter(store, &credentials, &app.bundle_id) {
            Ok(adapter) => adapter,
            Err(err) => {
                tracing::warn!(store = tx.store, "restore skipping store: {err}");
                continue;
            }
        };

        let record = match adapter.refresh_transaction(&tx.store_transaction_id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    store_transaction_id = tx.store_transaction_id,
                    "restore refresh failed: {err}"
                );
                continue;
            }
        };

        let Some(product) = product_by_id(pool, &tx.product_id).await? else {
            continue;
        };
        if apply_record(pool, app, subscriber, &product, &record)
            .await?
            .is_some()
        {
            appended = true;
        }
    }

    if appended {
        delivery_signal.notify_one();
    }

    customer_info(pool, app, subscriber).await
}

/// Creates the subscriber on first sight; `(app_id, app_user_id)` is the
/// identity, enforced by the unique index.
pub async fn ensure_subscriber(
    pool: &DbPool,
    app_id: &str,
    app_user_id: &str,
) -> ApiResult<Subscriber> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT OR IGNORE INTO subscribers (id, app_id, app_user_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(app_id)
    .bind(app_user_id)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(sqlx::query_as::<_, Subscriber>(
        "SELECT * FROM subscribers WHERE app_id = ? AND app_user_id = ?",
    )
    .bind(app_id)
    .bind(app_user_id)
    .fetch_one(pool)
    .await?)
}

pub async fn find_subscriber(
    pool: &DbPool,
    app_id: &str,
    app_user_id: &str,
) -> ApiResult<Option<Subscriber>> {
    Ok(sqlx::query_as::<_, Subscriber>(
        "SELECT * FROM subscribers WHERE app_id = ? AND app_user_id = ?",
    )
    .bind(app_id)
    .bind(app_user_id)
    .fetch_optional(pool)
    .await?)
}

async fn find_product(
    pool: &DbPool,
    app_id: &str,
    store_product_id: &str,
) -> ApiResult<Option<Product>> {
    Ok(sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE app_id = ? AND store_product_id = ?",
    )
    .bind(app_id)
    .bind(store_product_id)
    .fetch_optional(pool)
    .await?)
}

async fn product_by_id(pool: &DbPool, product_id: &str) -> ApiResult<Option<Product>> {
    Ok(
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(pool)
            .await?,
    )
}

async fn transactions_for(pool: &DbPool, subscriber_id: &str) -> ApiResult<Vec<Transaction>> {
    Ok(sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE subscriber_id = ? ORDER BY purchase_date DESC",
    )
    .bind(subscriber_id)
    .fetch_all(pool)
    .await?)
}

/// Upserts the verified record keyed by `(store, store_transaction_id)` and
/// appends the derived lifecycle event in the same storage transaction.
/// Returns the appended event, or `None` when the record changed nothing.
pub async fn apply_record(
    pool: &DbPool,
    app: &App,
    subscriber: &Subscriber,
    product: &Product,
    record: &TransactionRecord,
) -> ApiResult<Option<Event>> {
    let now = Utc::now().to_rfc3339();
    let new_expiration = record.expiration_date.map(|dt| dt.to_rfc3339());
    let raw = record.raw.to_string();

    let mut db_tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE store = ? AND store_transaction_id = ?",
    )
    .bind(record.store.as_str())
    .bind(&record.store_transaction_id)
    .fetch_optional(&mut *db_tx)
    .await?;

    let event_type = match &existing {
        Some(existing) => {
            let unchanged = existing.status == record.status.as_str()
                && existing.expiration_date == new_expiration;
            if unchanged {
                return Ok(None);
            }
            derive_transition_event(existing, record)
        }
        None => derive_creation_event(record),
    };

    sqlx::query(
        "INSERT INTO transactions (id, subscriber_id, product_id, store, store_transaction_id, \
         purchase_date, expiration_date, status, raw_receipt, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(store, store_transaction_id) DO UPDATE SET \
         status = excluded.status, expiration_date = excluded.expiration_date, \
         raw_receipt = excluded.raw_receipt, updated_at = excluded.updated_at",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&subscriber.id)
    .bind(&product.id)
    .bind(record.store.as_str())
    .bind(&record.store_transaction_id)
    .bind(record.purchase_date.to_rfc3339())
    .bind(&new_expiration)
    .bind(record.status.as_str())
    .bind(&raw)
    .bind(&now)
    .bind(&now)
    .execute(&mut *db_tx)
    .await?;

    let payload = serde_json::json!({
        "event_type": event_type,
        "app_id": app.id,
        "subscriber": {
            "id": subscriber.id,
            "app_user_id": subscriber.app_user_id,
        },
        "transaction": {
            "store": record.store.as_str(),
            "store_transaction_id": record.store_transaction_id,
            "product_id": product.store_product_id,
            "status": record.status.as_str(),
            "purchase_date": record.purchase_date.to_rfc3339(),
            "expiration_date": new_expiration,
        },
    });

    let event = events::append(&mut db_tx, &app.id, Some(&subscriber.id), event_type, &payload)
        .await
        .map_err(ApiError::Database)?;

    db_tx.commit().await?;

    tracing::debug!(
        event_type,
        sequence = event.sequence,
        store_transaction_id = record.store_transaction_id,
        "applied transaction record"
    );

    Ok(Some(event))
}

/// Loads everything the resolver needs and reduces it at `now`.
pub async fn customer_info(
    pool: &DbPool,
    app: &App,
    subscriber: &Subscriber,
) -> ApiResult<CustomerInfo> {
    let transactions = transactions_for(pool, &subscriber.id).await?;

    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT p.id, p.store_product_id, e.name FROM products p \
         JOIN product_entitlements pe ON pe.product_id = p.id \
         JOIN entitlements e ON e.id = pe.entitlement_id \
         WHERE p.app_id = ?",
    )
    .bind(&app.id)
    .fetch_all(pool)
    .await?;

    let mut grants: HashMap<String, ProductGrants> = HashMap::new();
    for (product_id, store_product_id, entitlement_name) in rows {
        let entry = grants.entry(product_id).or_insert_with(|| ProductGrants {
            store_product_id,
            entitlement_names: Vec::new(),
        });
        entry.entitlement_names.push(entitlement_name);
    }

    Ok(resolver::resolve(subscriber, &transactions, &grants, Utc::now()))
}

fn derive_creation_event(record: &TransactionRecord) -> &'static str {
    match record.status {
        TransactionStatus::Active if record.expiration_date.is_some() => events::INITIAL_PURCHASE,
        TransactionStatus::Active => events::NON_RENEWING_PURCHASE,
        _ => events::TRANSACTION_CREATED,
    }
}

/// Fixed transition table from `(prev_status, new_status, expiration_extended)`
/// to the event taxonomy. Anything unlisted degrades to TRANSACTION_UPDATED.
fn derive_transition_event(existing: &Transaction, record: &TransactionRecord) -> &'static str {
    use TransactionStatus::*;

    let prev = TransactionStatus::parse(&existing.status);
    let new = record.status;
    let extended = expiration_extended(existing.expiration_date.as_deref(), record.expiration_date);

    match (prev, new) {
        (Some(Refunded), Refunded) => events::TRANSACTION_UPDATED,
        (_, Refunded) => events::REFUND,
        (Some(Expired), Expired) => events::TRANSACTION_UPDATED,
        (_, Expired) => events::EXPIRATION,
        (Some(Active), GracePeriod) | (Some(BillingRetry), GracePeriod) => {
            events::GRACE_PERIOD_ENTERED
        }
        (Some(Active), BillingRetry) | (Some(GracePeriod), BillingRetry) => events::BILLING_ISSUE,
        (Some(Active), Active) if extended => events::RENEWAL,
        (Some(GracePeriod), Active) | (Some(BillingRetry), Active) => {
            if extended {
                events::RENEWAL
            } else {
                events::UNCANCELLATION
            }
        }
        (Some(Refunded), Active) | (Some(Expired), Active) => events::UNCANCELLATION,
        _ => events::TRANSACTION_UPDATED,
    }
}

fn expiration_extended(prev: Option<&str>, new: Option<DateTime<Utc>>) -> bool {
    match (prev.and_then(parse_rfc3339), new) {
        (Some(prev), Some(new)) => new > prev,
        (None, Some(_)) => true,
        _ => false,
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Arc, Mutex};

    use crate::error::ApiError;
    use crate::models::credentials::StoreCredentials;
    use crate::store::types::{
        ProductRecord, Receipt, Store, TransactionRecord, TransactionStatus,
    };
    use crate::store::{StoreAdapter, StoreAdapterFactory, StoreError};
    use chrono::{Duration, Utc};

    /// Canned adapter: hands back whatever record the test scripted, for both
    /// verification and refresh.
    pub struct FakeAdapter {
        record: Mutex<TransactionRecord>,
    }

    impl FakeAdapter {
        pub fn set_record(&self, record: TransactionRecord) {
            *self.record.lock().unwrap() = record;
        }
    }

    #[async_trait::async_trait]
    impl StoreAdapter for FakeAdapter {
        async fn verify_receipt(&self, _receipt: &Receipt) -> Result<TransactionRecord, StoreError> {
            Ok(self.record.lock().unwrap().clone())
        }

        async fn fetch_products(&self) -> Result<Vec<ProductRecord>, StoreError> {
            Ok(vec![])
        }

        async fn refresh_transaction(
            &self,
            _store_transaction_id: &str,
        ) -> Result<TransactionRecord, StoreError> {
            Ok(self.record.lock().unwrap().clone())
        }
    }

    pub struct FakeFactory {
        pub adapter: Arc<FakeAdapter>,
    }

    impl FakeFactory {
        pub fn with_record(record: TransactionRecord) -> Self {
            Self {
                adapter: Arc::new(FakeAdapter {
                    record: Mutex::new(record),
                }),
            }
        }
    }

    impl StoreAdapterFactory for FakeFactory {
        fn adapter(
            &self,
            _store: Store,
            _credentials: &StoreCredentials,
            _bundle_id: &str,
        ) -> Result<Arc<dyn StoreAdapter>, ApiError> {
            Ok(self.adapter.clone())
        }
    }

    pub fn record(
        store_transaction_id: &str,
        store_product_id: &str,
        status: TransactionStatus,
        expires_in_secs: Option<i64>,
    ) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            store: Store::Apple,
            store_transaction_id: store_transaction_id.to_string(),
            store_product_id: store_product_id.to_string(),
            purchase_date: now - Duration::minutes(1),
            expiration_date: expires_in_secs.map(|s| now + Duration::seconds(s)),
            status,
            raw: serde_json::json!({"fixture": true}),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db;

    struct TestEnv {
        pool: DbPool,
        cryptor: Cryptor,
        signal: Notify,
        app: App,
    }

    async fn env() -> TestEnv {
        let pool = db::connect("sqlite::memory:").await.unwrap();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO apps (id, name, platform, bundle_id, created_at, updated_at) \
             VALUES ('app-1', 'Demo', 'apple', 'com.demo', ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO entitlements (id, app_id, name, created_at) VALUES ('ent-1', 'app-1', 'pro', ?)",
        )
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO products (id, app_id, store_product_id, product_type, subscription_period, created_at) \
             VALUES ('prod-1', 'app-1', 'com.demo.pro.annual', 'subscription', 'P1Y', ?)",
        )
        .bind(&now)
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO product_entitlements (product_id, entitlement_id) VALUES ('prod-1', 'ent-1')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let app = sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = 'app-1'")
            .fetch_one(&pool)
            .await
            .unwrap();

        TestEnv {
            pool,
            cryptor: Cryptor::new(b"an-absolutely-minimal-32-byte-key!!").unwrap(),
            signal: Notify::new(),
            app,
        }
    }

    fn submission() -> ReceiptSubmission {
        ReceiptSubmission {
            app_user_id: "u1".to_string(),
            store: Store::Apple,
            store_product_id: "com.demo.pro.annual".to_string(),
            receipt_data: "fixture-jws".to_string(),
        }
    }

    async fn event_types(pool: &DbPool) -> Vec<(i64, String)> {
        sqlx::query_as::<_, (i64, String)>(
            "SELECT sequence, event_type FROM events ORDER BY sequence",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_purchase_grants_entitlement() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400 * 365),
        ));

        let info = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        assert!(info.active_entitlements["pro"].is_active);
        assert_eq!(info.all_transactions.len(), 1);

        let events = event_types(&env.pool).await;
        assert_eq!(events, vec![(1, "INITIAL_PURCHASE".to_string())]);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400),
        ));

        let first = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();
        let second = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&env.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(event_types(&env.pool).await.len(), 1);
        assert_eq!(
            serde_json::to_value(&first.all_transactions).unwrap(),
            serde_json::to_value(&second.all_transactions).unwrap()
        );
        assert_eq!(first.active_entitlements, second.active_entitlements);
    }

    #[tokio::test]
    async fn test_refund_revokes_entitlement() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400),
        ));
        ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        factory.adapter.set_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Refunded,
            Some(86_400),
        ));
        let info = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        assert!(!info.active_entitlements.contains_key("pro"));
        let events = event_types(&env.pool).await;
        assert_eq!(events.last().unwrap().1, "REFUND");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_renewal_extension_emits_renewal() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400),
        ));
        ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        factory.adapter.set_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400 * 30),
        ));
        ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        assert_eq!(event_types(&env.pool).await.last().unwrap().1, "RENEWAL");
    }

    #[tokio::test]
    async fn test_restore_applies_expiration() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::GracePeriod,
            Some(86_400 * 3),
        ));
        ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        // The store has since closed the subscription out.
        factory.adapter.set_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Expired,
            Some(-60),
        ));

        let subscriber = find_subscriber(&env.pool, "app-1", "u1").await.unwrap().unwrap();
        let info = restore(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &subscriber,
        )
        .await
        .unwrap();

        assert!(!info.active_entitlements["pro"].is_active);
        assert_eq!(event_types(&env.pool).await.last().unwrap().1, "EXPIRATION");
    }

    #[tokio::test]
    async fn test_unknown_product_is_rejected() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(86_400),
        ));
        let mut bad = submission();
        bad.store_product_id = "com.demo.unknown".to_string();

        let err = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &bad,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_grace_period_entry_event() {
        let env = env().await;
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Active,
            Some(60),
        ));
        ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        factory.adapter.set_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::GracePeriod,
            Some(86_400 * 3),
        ));
        let info = ingest(
            &env.pool,
            &factory,
            &env.cryptor,
            &env.signal,
            &env.app,
            &submission(),
        )
        .await
        .unwrap();

        // Still entitled while in grace.
        assert!(info.active_entitlements["pro"].is_active);
        assert_eq!(
            event_types(&env.pool).await.last().unwrap().1,
            "GRACE_PERIOD_ENTERED"
        );
    }

    #[test]
    fn test_transition_table() {
        use TransactionStatus::*;
        let now = Utc::now();

        let existing = |status: &str, expires_in: Option<i64>| Transaction {
            id: "t".into(),
            subscriber_id: "s".into(),
            product_id: "p".into(),
            store: "apple".into(),
            store_transaction_id: "st".into(),
            purchase_date: now.to_rfc3339(),
            expiration_date: expires_in.map(|s| (now + chrono::Duration::seconds(s)).to_rfc3339()),
            status: status.into(),
            raw_receipt: None,
            created_at: now.to_rfc3339(),
            updated_at: now.to_rfc3339(),
        };

        let rec = |status, expires_in: Option<i64>| TransactionRecord {
            store: Store::Apple,
            store_transaction_id: "st".into(),
            store_product_id: "sp".into(),
            purchase_date: now,
            expiration_date: expires_in.map(|s| now + chrono::Duration::seconds(s)),
            status,
            raw: serde_json::json!({}),
        };

        // Refund and expiration dominate.
        assert_eq!(
            derive_transition_event(&existing("active", Some(60)), &rec(Refunded, Some(60))),
            "REFUND"
        );
        assert_eq!(
            derive_transition_event(&existing("grace_period", Some(-60)), &rec(Expired, Some(-60))),
            "EXPIRATION"
        );
        // Billing lifecycle.
        assert_eq!(
            derive_transition_event(&existing("active", Some(-1)), &rec(GracePeriod, Some(-1))),
            "GRACE_PERIOD_ENTERED"
        );
        assert_eq!(
            derive_transition_event(&existing("grace_period", Some(-1)), &rec(BillingRetry, Some(-1))),
            "BILLING_ISSUE"
        );
        // Recovery with a pushed-out expiration is a renewal; without one, an
        // uncancellation.
        assert_eq!(
            derive_transition_event(&existing("billing_retry", Some(-1)), &rec(Active, Some(3600))),
            "RENEWAL"
        );
        assert_eq!(
            derive_transition_event(&existing("grace_period", Some(3600)), &rec(Active, Some(3600))),
            "UNCANCELLATION"
        );
        // Same-status fallthrough.
        assert_eq!(
            derive_transition_event(&existing("active", Some(3600)), &rec(Active, Some(60))),
            "TRANSACTION_UPDATED"
        );

        assert_eq!(derive_creation_event(&rec(Active, Some(60))), "INITIAL_PURCHASE");
        assert_eq!(derive_creation_event(&rec(Active, None)), "NON_RENEWING_PURCHASE");
        assert_eq!(derive_creation_event(&rec(Refunded, None)), "TRANSACTION_CREATED");
    }
}
