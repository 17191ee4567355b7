use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::ApiResult;
use crate::models::product::Product;

/// Client-facing product projection with resolved entitlement names.
#[derive(Debug, Serialize)]
pub struct OfferingProduct {
    pub store_product_id: String,
    pub product_type: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub price_micros: Option<i64>,
    pub currency: Option<String>,
    pub subscription_period: Option<String>,
    pub trial_period: Option<String>,
    pub entitlements: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OfferingsResponse {
    pub offerings: Vec<OfferingProduct>,
}

pub async fn get_offerings(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
) -> ApiResult<Json<OfferingsResponse>> {
    let app = auth.require_app(&app_id)?;

    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE app_id = ? AND stale_since IS NULL ORDER BY created_at",
    )
    .bind(&app.id)
    .fetch_all(&state.pool)
    .await?;

    let mut offerings = Vec::with_capacity(products.len());
    for product in products {
        let entitlements: Vec<String> = sqlx::query_scalar(
            "SELECT e.name FROM entitlements e \
             JOIN product_entitlements pe ON pe.entitlement_id = e.id \
             WHERE pe.product_id = ?",
        )
        .bind(&product.id)
        .fetch_all(&state.pool)
        .await?;

        offerings.push(OfferingProduct {
            store_product_id: product.store_product_id,
            product_type: product.product_type,
            display_name: product.display_name,
            description: product.description,
            price_micros: product.price_micros,
            currency: product.currency,
            subscription_period: product.subscription_period,
            trial_period: product.trial_period,
            entitlements,
        });
    }

    Ok(Json(OfferingsResponse { offerings }))
}
