use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::api::AppState;
use crate::error::ApiError;
use crate::models::app::App;

/// Bearer-key authentication. The key is stored only as a SHA-256 hash; a
/// hit scopes the request to exactly one app.
pub struct AuthenticatedApp {
    pub app: App,
}

impl AuthenticatedApp {
    /// App-scoped routes 404 on a foreign app id rather than leaking its
    /// existence.
    pub fn require_app(&self, app_id: &str) -> Result<&App, ApiError> {
        if self.app.id == app_id {
            Ok(&self.app)
        } else {
            Err(ApiError::NotFound("app"))
        }
    }
}

pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn generate_api_key() -> String {
    format!("ocat_{}", uuid::Uuid::new_v4().simple())
}

impl FromRequestParts<AppState> for AuthenticatedApp {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Auth("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Auth("Authorization must be a Bearer key".to_string()))?;

        let app = sqlx::query_as::<_, App>(
            "SELECT a.* FROM apps a \
             JOIN api_keys k ON k.app_id = a.id \
             WHERE k.key_hash = ? AND k.revoked_at IS NULL",
        )
        .bind(hash_api_key(token))
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::Auth("invalid API key".to_string()))?;

        Ok(AuthenticatedApp { app })
    }
}
