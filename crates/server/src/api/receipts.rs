use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pipeline::{self, ReceiptSubmission};
use crate::resolver::CustomerInfo;
use crate::store::types::Store;

#[derive(Debug, Deserialize)]
pub struct SubmitReceipt {
    /// Optional; the bearer key already names the app.
    pub app_id: Option<String>,
    pub app_user_id: String,
    pub store: String,
    pub product_id: String,
    /// Google purchase token.
    pub receipt_data: Option<String>,
    /// Apple StoreKit 2 JWS.
    pub jws_representation: Option<String>,
}

pub async fn submit_receipt(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Json(input): Json<SubmitReceipt>,
) -> ApiResult<Json<CustomerInfo>> {
    if let Some(app_id) = &input.app_id {
        auth.require_app(app_id)?;
    }
    let app = &auth.app;

    let store = Store::parse(&input.store)
        .ok_or_else(|| ApiError::Validation(format!("unknown store \"{}\"", input.store)))?;

    let receipt_data = input
        .receipt_data
        .or(input.jws_representation)
        .filter(|data| !data.is_empty())
        .ok_or_else(|| {
            ApiError::Validation("receipt_data or jws_representation is required".to_string())
        })?;

    if input.app_user_id.trim().is_empty() {
        return Err(ApiError::Validation("app_user_id must not be empty".to_string()));
    }

    let submission = ReceiptSubmission {
        app_user_id: input.app_user_id,
        store,
        store_product_id: input.product_id,
        receipt_data,
    };

    let info = pipeline::ingest(
        &state.pool,
        state.adapters.as_ref(),
        &state.cryptor,
        &state.delivery_signal,
        app,
        &submission,
    )
    .await?;

    Ok(Json(info))
}
