use axum::extract::{Path, State};
use axum::Json;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pipeline;
use crate::resolver::CustomerInfo;

/// Returns the resolver's projection for a subscriber.
pub async fn get_subscriber(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_user_id): Path<String>,
) -> ApiResult<Json<CustomerInfo>> {
    let subscriber = pipeline::find_subscriber(&state.pool, &auth.app.id, &app_user_id)
        .await?
        .ok_or(ApiError::NotFound("subscriber"))?;

    let info = pipeline::customer_info(&state.pool, &auth.app, &subscriber).await?;
    Ok(Json(info))
}

/// Re-verifies every known transaction against its store and returns the
/// fresh projection.
pub async fn restore_subscriber(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_user_id): Path<String>,
) -> ApiResult<Json<CustomerInfo>> {
    let subscriber = pipeline::find_subscriber(&state.pool, &auth.app.id, &app_user_id)
        .await?
        .ok_or(ApiError::NotFound("subscriber"))?;

    let info = pipeline::restore(
        &state.pool,
        state.adapters.as_ref(),
        &state.cryptor,
        &state.delivery_signal,
        &auth.app,
        &subscriber,
    )
    .await?;

    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use crate::api::test_helpers::*;
    use crate::pipeline::test_support::{record, FakeFactory};
    use crate::store::types::TransactionStatus;
    use axum::http::StatusCode;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_subscriber_is_404() {
        let state = test_state().await;
        let (_app_id, key) = create_test_app(&state).await;

        let response = send(&state, "GET", "/v1/subscribers/ghost", Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_subscriber_after_purchase() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;
        seed_pro_product(&state, &app_id, &key).await;

        send(
            &state,
            "POST",
            "/v1/receipts",
            Some(&key),
            Some(serde_json::json!({
                "app_user_id": "u1",
                "store": "apple",
                "product_id": "com.demo.pro.annual",
                "jws_representation": "header.payload.sig",
            })),
        )
        .await;

        let response = send(&state, "GET", "/v1/subscribers/u1", Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["app_user_id"], "u1");
        assert_eq!(body["active_entitlements"]["pro"]["is_active"], true);
        assert_eq!(body["all_transactions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grace_then_expiration_via_restore() {
        let factory = FakeFactory::with_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::GracePeriod,
            Some(86_400 * 3),
        ));
        let adapter = factory.adapter.clone();
        let state = test_state_with(Arc::new(factory)).await;
        let (app_id, key) = create_test_app(&state).await;
        seed_pro_product(&state, &app_id, &key).await;

        let response = send(
            &state,
            "POST",
            "/v1/receipts",
            Some(&key),
            Some(serde_json::json!({
                "app_user_id": "u1",
                "store": "apple",
                "product_id": "com.demo.pro.annual",
                "jws_representation": "header.payload.sig",
            })),
        )
        .await;
        let body = json_body(response).await;
        assert_eq!(body["active_entitlements"]["pro"]["is_active"], true);

        // The grace window has since lapsed; the store reports expiration.
        adapter.set_record(record(
            "tx-1",
            "com.demo.pro.annual",
            TransactionStatus::Expired,
            Some(-60),
        ));

        let response = send(&state, "POST", "/v1/subscribers/u1/restore", Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["active_entitlements"]["pro"]["is_active"], false);

        let last_event: String = sqlx::query_scalar(
            "SELECT event_type FROM events WHERE app_id = ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(&app_id)
        .fetch_one(&state.pool)
        .await
        .unwrap();
        assert_eq!(last_event, "EXPIRATION");
    }
}
