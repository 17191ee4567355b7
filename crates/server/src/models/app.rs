use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct App {
    pub id: String,
    pub name: String,
    pub platform: String,
    pub bundle_id: String,
    #[serde(skip_serializing)]
    pub store_credentials_encrypted: Option<String>,
    #[serde(skip_serializing)]
    pub last_event_sequence: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApp {
    pub name: String,
    pub platform: String,
    pub bundle_id: String,
}

pub const PLATFORMS: &[&str] = &["apple", "google", "cross"];
