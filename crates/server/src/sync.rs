use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::crypto::Cryptor;
use crate::db::DbPool;
use crate::error::{ApiError, ApiResult};
use crate::events;
use crate::models::app::App;
use crate::models::credentials::StoreCredentials;
use crate::store::types::{ProductRecord, Store};
use crate::store::StoreAdapterFactory;

#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub synced: usize,
    pub products: Vec<String>,
}

/// Reconciles one app's product catalog with its store(s). Products missing
/// from the store response are marked stale, never deleted; the store may be
/// hiding them transiently.
pub async fn run_app_sync(
    pool: &DbPool,
    cryptor: &Cryptor,
    factory: &dyn StoreAdapterFactory,
    app: &App,
) -> ApiResult<SyncSummary> {
    let credentials =
        StoreCredentials::decrypt_from(cryptor, app)?.ok_or(ApiError::CredentialMissing)?;

    let mut stores = Vec::new();
    if credentials.apple.is_some() {
        stores.push(Store::Apple);
    }
    if credentials.google.is_some() {
        stores.push(Store::Google);
    }
    if stores.is_empty() {
        return Err(ApiError::CredentialMissing);
    }

    let mut records: Vec<ProductRecord> = Vec::new();
    for store in stores {
        let adapter = factory.adapter(store, &credentials, &app.bundle_id)?;
        records.extend(adapter.fetch_products().await.map_err(ApiError::from)?);
    }

    let now = Utc::now().to_rfc3339();
    let mut synced = Vec::with_capacity(records.len());

    for record in &records {
        sqlx::query(
            "INSERT INTO products (id, app_id, store_product_id, product_type, display_name, \
             description, price_micros, currency, subscription_period, trial_period, \
             last_synced_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(app_id, store_product_id) DO UPDATE SET \
             product_type = excluded.product_type, display_name = excluded.display_name, \
             description = excluded.description, price_micros = excluded.price_micros, \
             currency = excluded.currency, subscription_period = excluded.subscription_period, \
             trial_period = excluded.trial_period, last_synced_at = excluded.last_synced_at, \
             stale_since = NULL",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&app.id)
        .bind(&record.store_product_id)
        .bind(&record.product_type)
        .bind(&record.display_name)
        .bind(&record.description)
        .bind(record.price_micros)
        .bind(&record.currency)
        .bind(&record.subscription_period)
        .bind(&record.trial_period)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await?;

        synced.push(record.store_product_id.clone());
    }

    // Everything the store stopped mentioning becomes stale.
    let placeholders = if synced.is_empty() {
        String::new()
    } else {
        format!(
            " AND store_product_id NOT IN ({})",
            vec!["?"; synced.len()].join(", ")
        )
    };
    let stale_sql = format!(
        "UPDATE products SET stale_since = ? WHERE app_id = ? AND stale_since IS NULL{placeholders}"
    );
    let mut stale_query = sqlx::query(&stale_sql).bind(&now).bind(&app.id);
    for id in &synced {
        stale_query = stale_query.bind(id);
    }
    stale_query.execute(pool).await?;

    let summary = SyncSummary {
        synced: synced.len(),
        products: synced,
    };

    let mut db_tx = pool.begin().await?;
    events::append(
        &mut db_tx,
        &app.id,
        None,
        events::PRODUCT_SYNCED,
        &serde_json::json!({
            "synced": summary.synced,
            "products": summary.products,
        }),
    )
    .await?;
    db_tx.commit().await?;

    tracing::info!(app_id = app.id, synced = summary.synced, "product sync complete");

    Ok(summary)
}

/// Background loop: refreshes every credentialed app's catalog on a fixed
/// interval. The same sync path also runs on demand from the API.
pub struct ProductSyncScheduler {
    pool: DbPool,
    cryptor: Arc<Cryptor>,
    factory: Arc<dyn StoreAdapterFactory>,
    interval: Duration,
}

impl ProductSyncScheduler {
    pub fn new(
        pool: DbPool,
        cryptor: Arc<Cryptor>,
        factory: Arc<dyn StoreAdapterFactory>,
        interval: Duration,
    ) -> Self {
        Self {
            pool,
            cryptor,
            factory,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "product sync scheduler started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    tracing::info!("product sync scheduler stopping");
                    return;
                }
            }
            if let Err(err) = self.sync_all().await {
                tracing::error!("product sync sweep: {err}");
            }
        }
    }

    async fn sync_all(&self) -> ApiResult<()> {
        let apps = sqlx::query_as::<_, App>(
            "SELECT * FROM apps WHERE store_credentials_encrypted IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        for app in apps {
            if let Err(err) =
                run_app_sync(&self.pool, &self.cryptor, self.factory.as_ref(), &app).await
            {
                tracing::warn!(app_id = app.id, "product sync failed: {err}");
            }
        }
        Ok(())
    }
}
