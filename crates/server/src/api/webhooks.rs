use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::webhook::{CreateWebhook, WebhookEndpoint};

pub async fn create_webhook(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Json(input): Json<CreateWebhook>,
) -> ApiResult<(StatusCode, Json<WebhookEndpoint>)> {
    if !input.url.starts_with("http://") && !input.url.starts_with("https://") {
        return Err(ApiError::Validation("url must be http(s)".to_string()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let secret = input
        .secret
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("whsec_{}", uuid::Uuid::new_v4().simple()));
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO webhook_endpoints (id, app_id, url, secret, active, delivery_cursor, created_at) \
         VALUES (?, ?, ?, ?, 1, 0, ?)",
    )
    .bind(&id)
    .bind(&auth.app.id)
    .bind(&input.url)
    .bind(&secret)
    .bind(&now)
    .execute(&state.pool)
    .await?;

    let endpoint =
        sqlx::query_as::<_, WebhookEndpoint>("SELECT * FROM webhook_endpoints WHERE id = ?")
            .bind(&id)
            .fetch_one(&state.pool)
            .await?;

    // A fresh endpoint may already have a backlog to work through.
    state.delivery_signal.notify_one();

    Ok((StatusCode::CREATED, Json(endpoint)))
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
) -> ApiResult<Json<Vec<WebhookEndpoint>>> {
    let webhooks = sqlx::query_as::<_, WebhookEndpoint>(
        "SELECT * FROM webhook_endpoints WHERE app_id = ? ORDER BY created_at DESC",
    )
    .bind(&auth.app.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(webhooks))
}
