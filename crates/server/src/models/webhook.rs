use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEndpoint {
    pub id: String,
    pub app_id: String,
    pub url: String,
    pub secret: String,
    pub active: i64,
    /// Highest event sequence acknowledged as delivered.
    pub delivery_cursor: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhook {
    pub url: String,
    /// Generated when omitted.
    #[serde(default)]
    pub secret: Option<String>,
}
