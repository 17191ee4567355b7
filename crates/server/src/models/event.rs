use serde::{Deserialize, Serialize};

/// Immutable domain event. `sequence` is strictly monotonic per app with no
/// holes; webhook delivery cursors are defined over it.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: String,
    pub app_id: String,
    pub subscriber_id: Option<String>,
    pub event_type: String,
    pub payload: String,
    pub sequence: i64,
    pub created_at: String,
}
