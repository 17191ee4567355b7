use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::ApiResult;
use crate::events;
use crate::models::event::Event;

#[derive(Deserialize)]
pub struct EventsQuery {
    /// Sequence cursor; events strictly after it are returned.
    pub since: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_events(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<Event>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let since = query.since.unwrap_or(0);

    let events = events::list_since(&state.pool, &auth.app.id, since, limit).await?;
    Ok(Json(events))
}

#[cfg(test)]
mod tests {
    use crate::api::test_helpers::*;
    use axum::http::StatusCode;

    async fn submit_receipts(state: &crate::api::AppState, key: &str, n: usize) {
        for i in 0..n {
            // Distinct transactions so each submission appends one event.
            let record = crate::pipeline::test_support::record(
                &format!("tx-{i}"),
                "com.demo.pro.annual",
                crate::store::types::TransactionStatus::Active,
                Some(86_400),
            );
            let factory_state = state.clone();
            let app = sqlx::query_as::<_, crate::models::app::App>(
                "SELECT a.* FROM apps a JOIN api_keys k ON k.app_id = a.id WHERE k.key_hash = ?",
            )
            .bind(crate::api::auth::hash_api_key(key))
            .fetch_one(&factory_state.pool)
            .await
            .unwrap();

            let factory = crate::pipeline::test_support::FakeFactory::with_record(record);
            crate::pipeline::ingest(
                &state.pool,
                &factory,
                &state.cryptor,
                &state.delivery_signal,
                &app,
                &crate::pipeline::ReceiptSubmission {
                    app_user_id: "u1".to_string(),
                    store: crate::store::types::Store::Apple,
                    store_product_id: "com.demo.pro.annual".to_string(),
                    receipt_data: "fixture".to_string(),
                },
            )
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_events_page_by_sequence_cursor() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;
        seed_pro_product(&state, &app_id, &key).await;
        submit_receipts(&state, &key, 3).await;

        let response = send(&state, "GET", "/v1/events?since=1", Some(&key), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let sequences: Vec<i64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["sequence"].as_i64().unwrap())
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_the_key_app() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;
        seed_pro_product(&state, &app_id, &key).await;
        submit_receipts(&state, &key, 1).await;

        let (_other_app, other_key) = create_test_app(&state).await;
        let response = send(&state, "GET", "/v1/events", Some(&other_key), None).await;
        let body = json_body(response).await;
        assert!(body.as_array().unwrap().is_empty());
    }
}
