use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::auth::AuthenticatedApp;
use crate::api::AppState;
use crate::error::{db_error, ApiError, ApiResult};
use crate::models::entitlement::{CreateEntitlement, Entitlement};

pub async fn create_entitlement(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
    Json(input): Json<CreateEntitlement>,
) -> ApiResult<(StatusCode, Json<Entitlement>)> {
    let app = auth.require_app(&app_id)?;
    if input.name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".to_string()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    sqlx::query(
        "INSERT INTO entitlements (id, app_id, name, description, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&app.id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(&now)
    .execute(&state.pool)
    .await
    .map_err(|e| db_error(e, "an entitlement with this name already exists"))?;

    let entitlement = sqlx::query_as::<_, Entitlement>("SELECT * FROM entitlements WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.pool)
        .await?;

    Ok((StatusCode::CREATED, Json(entitlement)))
}

pub async fn list_entitlements(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path(app_id): Path<String>,
) -> ApiResult<Json<Vec<Entitlement>>> {
    let app = auth.require_app(&app_id)?;
    let entitlements = sqlx::query_as::<_, Entitlement>(
        "SELECT * FROM entitlements WHERE app_id = ? ORDER BY created_at DESC",
    )
    .bind(&app.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(entitlements))
}

/// Entitlements are removed explicitly; product links cascade.
pub async fn delete_entitlement(
    State(state): State<AppState>,
    auth: AuthenticatedApp,
    Path((app_id, entitlement_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let app = auth.require_app(&app_id)?;
    let deleted = sqlx::query("DELETE FROM entitlements WHERE id = ? AND app_id = ?")
        .bind(&entitlement_id)
        .bind(&app.id)
        .execute(&state.pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("entitlement"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::api::test_helpers::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_create_and_list_entitlements() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;

        let response = send(
            &state,
            "POST",
            &format!("/v1/apps/{app_id}/entitlements"),
            Some(&key),
            Some(serde_json::json!({"name": "pro", "description": "Pro access"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(
            &state,
            "GET",
            &format!("/v1/apps/{app_id}/entitlements"),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "pro");
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let response = send(
                &state,
                "POST",
                &format!("/v1/apps/{app_id}/entitlements"),
                Some(&key),
                Some(serde_json::json!({"name": "pro"})),
            )
            .await;
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_delete_entitlement() {
        let state = test_state().await;
        let (app_id, key) = create_test_app(&state).await;

        let response = send(
            &state,
            "POST",
            &format!("/v1/apps/{app_id}/entitlements"),
            Some(&key),
            Some(serde_json::json!({"name": "pro"})),
        )
        .await;
        let ent_id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = send(
            &state,
            "DELETE",
            &format!("/v1/apps/{app_id}/entitlements/{ent_id}"),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(
            &state,
            "DELETE",
            &format!("/v1/apps/{app_id}/entitlements/{ent_id}"),
            Some(&key),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
