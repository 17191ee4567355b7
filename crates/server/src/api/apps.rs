use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::auth::{generate_api_key, hash_api_key, AuthenticatedApp};
use crate::api::AppState;
use crate::error::{db_error, ApiError, ApiResult};
use crate::models::app::{App, CreateApp, PLATFORMS};

#[derive(Serialize)]
pub struct CreatedApp {
    #[serde(flatten)]
    pub app: App,
    /// Shown exactly once; only its hash is stored.
    pub api_key: String,
}

/// Bootstrap endpoint: registers an app and mints its API key.
pub async fn create_app(
    State(state): State<AppState>,
    Json(input): Json<CreateApp>,
) -> ApiResult<(StatusCode, Json<CreatedApp>)> {
    if !PLATFORMS.contains(&input.platform.as_str()) {
        return Err(ApiError::Validation(format!(
            "platform must be one of {PLATFORMS:?}"
        )));
    }
    if input.name.trim().is_empty() || input.bundle_id.trim().is_empty() {
        return Err(ApiError::Validation(
            "name and bundle_id must not be empty".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let api_key = generate_api_key();
    let now = chrono::Utc::now().to_rfc3339();

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO apps (id, name, platform, bundle_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&input.name)
    .bind(&input.platform)
    .bind(&input.bundle_id)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO api_keys (id, app_id, key_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&id)
        .bind(hash_api_key(&api_key))
        .bind(&now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let app = sqlx::query_as::<_, App>("SELECT * FROM apps WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.pool)
        .await?;

    tracing::info!(app_id = app.id, name = app.name, "app registered");

    Ok((StatusCode::CREATED, Json(CreatedApp { app, api_key })))
}

/// The key is app-scoped, so the listing is the caller's own app.
pub async fn list_apps(auth: AuthenticatedApp) -> ApiResult<Json<Vec<App>>> {
    Ok(Json(vec![auth.app]))
}

/// Deletes an app and everything under it (the schema cascades).
pub async fn delete_app(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
) -> ApiResult<StatusCode> {
    let app = auth.require_app(&app_id)?;
    sqlx::query("DELETE FROM apps WHERE id = ?")
        .bind(&app.id)
        .execute(&state.pool)
        .await
        .map_err(|e| db_error(e, "app is referenced"))?;
    Ok(StatusCode::NO_CONTENT)
}
