use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::{db_error, ApiError, ApiResult};
use crate::models::product::{CreateProduct, Product, PRODUCT_TYPES};
use crate::sync;

pub async fn create_product(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
    Json(input): Json<CreateProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let app = auth.require_app(&app_id)?;

    if !PRODUCT_TYPES.contains(&input.product_type.as_str()) {
        return Err(ApiError::Validation(format!(
            "product_type must be one of {PRODUCT_TYPES:?}"
        )));
    }
    // Subscriptions carry a period; nothing else does.
    match (
        input.product_type.as_str(),
        input.subscription_period.as_deref(),
    ) {
        ("subscription", None) => {
            return Err(ApiError::Validation(
                "subscription products require subscription_period".to_string(),
            ))
        }
        ("subscription", Some(_)) => {}
        (_, Some(_)) => {
            return Err(ApiError::Validation(
                "only subscription products may carry subscription_period".to_string(),
            ))
        }
        (_, None) => {}
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO products (id, app_id, store_product_id, product_type, display_name, \
         subscription_period, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&app.id)
    .bind(&input.store_product_id)
    .bind(&input.product_type)
    .bind(&input.display_name)
    .bind(&input.subscription_period)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .map_err(|e| db_error(e, "a product with this store_product_id already exists"))?;

    for entitlement_id in &input.entitlement_ids {
        let known: Option<String> =
            sqlx::query_scalar("SELECT id FROM entitlements WHERE id = ? AND app_id = ?")
                .bind(entitlement_id)
                .bind(&app.id)
                .fetch_optional(&mut *tx)
                .await?;
        if known.is_none() {
            return Err(ApiError::Validation(format!(
                "unknown entitlement \"{entitlement_id}\""
            )));
        }

        sqlx::query("INSERT INTO product_entitlements (product_id, entitlement_id) VALUES (?, ?)")
            .bind(&id)
            .bind(entitlement_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let product = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn list_products(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
) -> ApiResult<Json<Vec<Product>>> {
    let app = auth.require_app(&app_id)?;
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE app_id = ? ORDER BY created_at DESC",
    )
    .bind(&app.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(products))
}

/// On-demand catalog reconciliation; the scheduler runs the same path.
pub async fn sync_products(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
) -> ApiResult<Json<sync::SyncSummary>> {
    let app = auth.require_app(&app_id)?;
    let summary =
        sync::run_app_sync(&state.pool, &state.cryptor, state.adapters.as_ref(), app).await?;
    Ok(Json(summary))
}
