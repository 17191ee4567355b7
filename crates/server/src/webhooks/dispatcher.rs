use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use reqwest::Client;
use tokio::sync::{watch, Notify};

use crate::crypto;
use crate::db::DbPool;
use crate::models::event::Event;
use crate::models::webhook::WebhookEndpoint;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Supervisor wake period; the ingest path also nudges via Notify.
    pub poll_interval: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub batch_size: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            request_timeout: Duration::from_secs(10),
            batch_size: 100,
        }
    }
}

enum Disposition {
    Success,
    Retriable(String),
    NonRetriable(String),
}

enum DeliveryOutcome {
    /// Cursor may advance past the event.
    Settled,
    /// Endpoint vanished or was deactivated mid-flight.
    Stopped,
}

/// Consumes the per-app event log on behalf of registered endpoints. One
/// worker per endpoint at a time; deliveries within an endpoint are strictly
/// ordered by sequence, endpoints are independent.
pub struct WebhookDispatcher {
    pool: DbPool,
    client: Client,
    config: DispatcherConfig,
    signal: Arc<Notify>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl WebhookDispatcher {
    pub fn new(pool: DbPool, signal: Arc<Notify>, config: DispatcherConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            pool,
            client,
            config,
            signal,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("webhook dispatcher started");
        loop {
            tokio::select! {
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => {
                    tracing::info!("webhook dispatcher stopping");
                    return;
                }
            }
            if let Err(err) = self.spawn_workers().await {
                tracing::error!("webhook supervisor: {err}");
            }
        }
    }

    /// Starts a worker for every active endpoint with pending events that
    /// does not already have one running.
    async fn spawn_workers(&self) -> Result<(), sqlx::Error> {
        let pending = sqlx::query_as::<_, WebhookEndpoint>(
            "SELECT we.* FROM webhook_endpoints we \
             JOIN apps a ON a.id = we.app_id \
             WHERE we.active = 1 AND a.last_event_sequence > we.delivery_cursor",
        )
        .fetch_all(&self.pool)
        .await?;

        for endpoint in pending {
            {
                let mut in_flight = self.in_flight.lock().unwrap();
                if !in_flight.insert(endpoint.id.clone()) {
                    continue;
                }
            }

            let pool = self.pool.clone();
            let client = self.client.clone();
            let config = self.config.clone();
            let in_flight = self.in_flight.clone();
            let endpoint_id = endpoint.id.clone();

            tokio::spawn(async move {
                drain_endpoint(&pool, &client, &config, &endpoint_id).await;
                in_flight.lock().unwrap().remove(&endpoint_id);
            });
        }

        Ok(())
    }
}

/// Delivers every pending event for one endpoint in sequence order, then
/// returns. The cursor never advances past an undelivered retriable event.
pub async fn drain_endpoint(
    pool: &DbPool,
    client: &Client,
    config: &DispatcherConfig,
    endpoint_id: &str,
) {
    loop {
        let Ok(Some(endpoint)) = fetch_active_endpoint(pool, endpoint_id).await else {
            return;
        };

        let events = match sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE app_id = ? AND sequence > ? ORDER BY sequence ASC LIMIT ?",
        )
        .bind(&endpoint.app_id)
        .bind(endpoint.delivery_cursor)
        .bind(config.batch_size)
        .fetch_all(pool)
        .await
        {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(endpoint_id, "failed to read event batch: {err}");
                return;
            }
        };

        if events.is_empty() {
            return;
        }

        for event in events {
            match deliver_with_retries(pool, client, config, &endpoint, &event).await {
                DeliveryOutcome::Settled => {
                    if let Err(err) = advance_cursor(pool, endpoint_id, event.sequence).await {
                        tracing::error!(endpoint_id, "failed to advance cursor: {err}");
                        return;
                    }
                }
                DeliveryOutcome::Stopped => return,
            }
        }
    }
}

async fn fetch_active_endpoint(
    pool: &DbPool,
    endpoint_id: &str,
) -> Result<Option<WebhookEndpoint>, sqlx::Error> {
    sqlx::query_as::<_, WebhookEndpoint>(
        "SELECT * FROM webhook_endpoints WHERE id = ? AND active = 1",
    )
    .bind(endpoint_id)
    .fetch_optional(pool)
    .await
}

async fn deliver_with_retries(
    pool: &DbPool,
    client: &Client,
    config: &DispatcherConfig,
    endpoint: &WebhookEndpoint,
    event: &Event,
) -> DeliveryOutcome {
    let body = delivery_body(event);
    let signature = crypto::sign(body.as_bytes(), &endpoint.secret);

    for attempt in 1..=config.max_attempts {
        let disposition = post_event(client, endpoint, event, &body, &signature, attempt).await;

        match disposition {
            Disposition::Success => {
                tracing::debug!(
                    endpoint_id = endpoint.id,
                    sequence = event.sequence,
                    attempt,
                    "webhook delivered"
                );
                return DeliveryOutcome::Settled;
            }
            Disposition::NonRetriable(error) => {
                tracing::warn!(
                    endpoint_id = endpoint.id,
                    sequence = event.sequence,
                    "webhook rejected, not retrying: {error}"
                );
                record_dead_letter(pool, endpoint, event, attempt, &error).await;
                return DeliveryOutcome::Settled;
            }
            Disposition::Retriable(error) => {
                if attempt == config.max_attempts {
                    tracing::warn!(
                        endpoint_id = endpoint.id,
                        sequence = event.sequence,
                        "webhook retries exhausted: {error}"
                    );
                    record_dead_letter(pool, endpoint, event, attempt, &error).await;
                    return DeliveryOutcome::Settled;
                }

                tokio::time::sleep(backoff_delay(config, attempt)).await;

                // A deactivated endpoint finishes its current attempt and
                // stops; the cursor stays put for a later reactivation.
                match fetch_active_endpoint(pool, &endpoint.id).await {
                    Ok(Some(_)) => {}
                    _ => return DeliveryOutcome::Stopped,
                }
            }
        }
    }

    DeliveryOutcome::Stopped
}

async fn post_event(
    client: &Client,
    endpoint: &WebhookEndpoint,
    event: &Event,
    body: &str,
    signature: &str,
    attempt: u32,
) -> Disposition {
    let result = client
        .post(&endpoint.url)
        .header("Content-Type", "application/json")
        .header("X-OpenCat-Signature", format!("sha256={signature}"))
        .header("X-OpenCat-Event-Id", &event.id)
        .header("X-OpenCat-Event-Type", &event.event_type)
        .header("X-OpenCat-Delivery-Attempt", attempt.to_string())
        .body(body.to_string())
        .send()
        .await;

    match result {
        Ok(response) => classify_status(response.status()),
        Err(err) => Disposition::Retriable(err.to_string()),
    }
}

fn classify_status(status: reqwest::StatusCode) -> Disposition {
    if status.is_success() {
        return Disposition::Success;
    }
    match status.as_u16() {
        408 | 425 | 429 => Disposition::Retriable(format!("HTTP {status}")),
        code if code >= 500 => Disposition::Retriable(format!("HTTP {status}")),
        _ => Disposition::NonRetriable(format!("HTTP {status}")),
    }
}

/// Exponential backoff with up to 25% jitter on top.
fn backoff_delay(config: &DispatcherConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(config.max_delay);
    exp.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25))
}

fn delivery_body(event: &Event) -> String {
    let payload: serde_json::Value =
        serde_json::from_str(&event.payload).unwrap_or(serde_json::Value::Null);

    serde_json::json!({
        "event": {
            "id": event.id,
            "type": event.event_type,
            "sequence": event.sequence,
            "created_at": event.created_at,
        },
        "app_id": event.app_id,
        "subscriber": payload.get("subscriber"),
        "transaction": payload.get("transaction"),
    })
    .to_string()
}

async fn advance_cursor(pool: &DbPool, endpoint_id: &str, sequence: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE webhook_endpoints SET delivery_cursor = ? WHERE id = ? AND delivery_cursor < ?",
    )
    .bind(sequence)
    .bind(endpoint_id)
    .bind(sequence)
    .execute(pool)
    .await?;
    Ok(())
}

async fn record_dead_letter(
    pool: &DbPool,
    endpoint: &WebhookEndpoint,
    event: &Event,
    attempts: u32,
    error: &str,
) {
    let result = sqlx::query(
        "INSERT INTO webhook_dead_letters (id, endpoint_id, event_id, attempts, last_error, failed_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&endpoint.id)
    .bind(&event.id)
    .bind(attempts as i64)
    .bind(error)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await;

    if let Err(err) = result {
        tracing::error!(endpoint_id = endpoint.id, "failed to record dead letter: {err}");
    }
}
