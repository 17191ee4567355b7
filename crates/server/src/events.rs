use sqlx::{Sqlite, Transaction as DbTx};

use crate::db::DbPool;
use crate::models::event::Event;

// Event taxonomy. Specialized lifecycle events are derived from status
// transitions in the pipeline; TRANSACTION_* are the generic fallbacks.
pub const INITIAL_PURCHASE: &str = "INITIAL_PURCHASE";
pub const RENEWAL: &str = "RENEWAL";
pub const PRODUCT_CHANGE: &str = "PRODUCT_CHANGE";
pub const CANCELLATION: &str = "CANCELLATION";
pub const UNCANCELLATION: &str = "UNCANCELLATION";
pub const BILLING_ISSUE: &str = "BILLING_ISSUE";
pub const GRACE_PERIOD_ENTERED: &str = "GRACE_PERIOD_ENTERED";
pub const EXPIRATION: &str = "EXPIRATION";
pub const REFUND: &str = "REFUND";
pub const NON_RENEWING_PURCHASE: &str = "NON_RENEWING_PURCHASE";
pub const TRANSACTION_CREATED: &str = "TRANSACTION_CREATED";
pub const TRANSACTION_UPDATED: &str = "TRANSACTION_UPDATED";
pub const PRODUCT_SYNCED: &str = "PRODUCT_SYNCED";

/// Appends one event inside the caller's storage transaction, allocating the
/// next per-app sequence. The `apps` row update serializes concurrent
/// appends for the same app; sequences come out gapless.
pub async fn append(
    db_tx: &mut DbTx<'_, Sqlite>,
    app_id: &str,
    subscriber_id: Option<&str>,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<Event, sqlx::Error> {
    let now = chrono::Utc::now().to_rfc3339();

    let updated = sqlx::query(
        "UPDATE apps SET last_event_sequence = last_event_sequence + 1, updated_at = ? WHERE id = ?",
    )
    .bind(&now)
    .bind(app_id)
    .execute(&mut **db_tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }

    let sequence: i64 =
        sqlx::query_scalar("SELECT last_event_sequence FROM apps WHERE id = ?")
            .bind(app_id)
            .fetch_one(&mut **db_tx)
            .await?;

    let event = Event {
        id: uuid::Uuid::new_v4().to_string(),
        app_id: app_id.to_string(),
        subscriber_id: subscriber_id.map(String::from),
        event_type: event_type.to_string(),
        payload: payload.to_string(),
        sequence,
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO events (id, app_id, subscriber_id, event_type, payload, sequence, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id)
    .bind(&event.app_id)
    .bind(&event.subscriber_id)
    .bind(&event.event_type)
    .bind(&event.payload)
    .bind(event.sequence)
    .bind(&event.created_at)
    .execute(&mut **db_tx)
    .await?;

    Ok(event)
}

/// Page of the app's log after a sequence cursor, oldest first.
pub async fn list_since(
    pool: &DbPool,
    app_id: &str,
    since: i64,
    limit: i64,
) -> Result<Vec<Event>, sqlx::Error> {
    sqlx::query_as::<_, Event>(
        "SELECT * FROM events WHERE app_id = ? AND sequence > ? ORDER BY sequence ASC LIMIT ?",
    )
    .bind(app_id)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
}
