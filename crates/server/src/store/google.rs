use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::types::{ProductRecord, Receipt, Store, TransactionRecord, TransactionStatus};
use super::{StoreAdapter, StoreError, CATALOG_TIMEOUT, VERIFY_TIMEOUT};

const PUBLISHER_BASE: &str = "https://androidpublisher.googleapis.com/androidpublisher/v3";

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Google Play adapter. Verification goes through the Android Publisher API
/// with a short-lived OAuth2 token minted from the service account key.
pub struct GoogleAdapter {
    client: Client,
    catalog_client: Client,
    service_account: ServiceAccountKey,
    package_name: String,
}

impl GoogleAdapter {
    pub fn new(service_account_json: String, package_name: String) -> Result<Self, serde_json::Error> {
        let service_account: ServiceAccountKey = serde_json::from_str(&service_account_json)?;
        Ok(Self {
            client: Client::builder()
                .timeout(VERIFY_TIMEOUT)
                .build()
                .unwrap_or_default(),
            catalog_client: Client::builder()
                .timeout(CATALOG_TIMEOUT)
                .build()
                .unwrap_or_default(),
            service_account,
            package_name,
        })
    }

    async fn get_access_token(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": self.service_account.client_email,
            "scope": "https://www.googleapis.com/auth/androidpublisher",
            "aud": self.service_account.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let jwt = jsonwebtoken::encode(
            &header,
            &claims,
            &jsonwebtoken::EncodingKey::from_rsa_pem(self.service_account.private_key.as_bytes())
                .map_err(|e| StoreError::Rejected {
                    code: "invalid_key".to_string(),
                    message: e.to_string(),
                })?,
        )
        .map_err(|e| StoreError::Rejected {
            code: "jwt_sign".to_string(),
            message: e.to_string(),
        })?;

        let response = self
            .client
            .post(&self.service_account.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Rejected {
                code: status.as_u16().to_string(),
                message: "OAuth token exchange failed".to_string(),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    async fn get_json(&self, token: &str, url: &str) -> Result<serde_json::Value, StoreError> {
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(verify_error(status, body));
        }
        Ok(response.json().await?)
    }

    async fn subscription_record(
        &self,
        purchase_token: &str,
    ) -> Result<TransactionRecord, StoreError> {
        let token = self.get_access_token().await?;
        let url = format!(
            "{PUBLISHER_BASE}/applications/{}/purchases/subscriptionsv2/tokens/{}",
            self.package_name, purchase_token
        );
        let body = self.get_json(&token, &url).await?;
        parse_subscription(purchase_token, &body, Utc::now())
    }

    async fn product_record(
        &self,
        purchase_token: &str,
        store_product_id: &str,
    ) -> Result<TransactionRecord, StoreError> {
        let token = self.get_access_token().await?;
        let url = format!(
            "{PUBLISHER_BASE}/applications/{}/purchases/products/{}/tokens/{}",
            self.package_name, store_product_id, purchase_token
        );
        let body = self.get_json(&token, &url).await?;
        parse_product(purchase_token, store_product_id, &body)
    }
}

#[async_trait::async_trait]
impl StoreAdapter for GoogleAdapter {
    async fn verify_receipt(&self, receipt: &Receipt) -> Result<TransactionRecord, StoreError> {
        if receipt.is_subscription {
            self.subscription_record(&receipt.data).await
        } else {
            self.product_record(&receipt.data, &receipt.store_product_id)
                .await
        }
    }

    async fn fetch_products(&self) -> Result<Vec<ProductRecord>, StoreError> {
        let token = self.get_access_token().await?;
        let url = format!(
            "{PUBLISHER_BASE}/applications/{}/inappproducts",
            self.package_name
        );
        let response = self
            .catalog_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(verify_error(status, body));
        }
        let body: serde_json::Value = response.json().await?;

        let empty = vec![];
        Ok(body["inappproduct"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(parse_catalog_entry)
            .collect())
    }

    async fn refresh_transaction(
        &self,
        store_transaction_id: &str,
    ) -> Result<TransactionRecord, StoreError> {
        // The purchase token is the transaction identity on Play.
        self.subscription_record(store_transaction_id).await
    }
}

/// Maps a `purchases.subscriptionsv2` response onto the normalized status
/// set. Unknown subscription states map to expired.
fn parse_subscription(
    purchase_token: &str,
    body: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<TransactionRecord, StoreError> {
    let purchase_date = body["startTime"]
        .as_str()
        .and_then(parse_rfc3339)
        .ok_or_else(|| StoreError::ReceiptInvalid("missing startTime".to_string()))?;

    let line_item = body["lineItems"]
        .as_array()
        .and_then(|items| items.first())
        .ok_or_else(|| StoreError::ReceiptInvalid("subscription has no line items".to_string()))?;

    let store_product_id = line_item["productId"]
        .as_str()
        .ok_or_else(|| StoreError::ReceiptInvalid("line item has no productId".to_string()))?
        .to_string();
    let expiration_date = line_item["expiryTime"].as_str().and_then(parse_rfc3339);

    let status = match body["subscriptionState"].as_str().unwrap_or("") {
        "SUBSCRIPTION_STATE_ACTIVE" => TransactionStatus::Active,
        "SUBSCRIPTION_STATE_IN_GRACE_PERIOD" => TransactionStatus::GracePeriod,
        "SUBSCRIPTION_STATE_ON_HOLD" => TransactionStatus::BillingRetry,
        "SUBSCRIPTION_STATE_CANCELED" => match expiration_date {
            Some(expiry) if expiry > now => TransactionStatus::Active,
            _ => TransactionStatus::Expired,
        },
        _ => TransactionStatus::Expired,
    };

    Ok(TransactionRecord {
        store: Store::Google,
        store_transaction_id: purchase_token.to_string(),
        store_product_id,
        purchase_date,
        expiration_date,
        status,
        raw: body.clone(),
    })
}

/// Maps a `purchases.products` response for one-time purchases. A pending
/// purchase (state 2) has not completed payment and must not grant access,
/// so it lands on `expired` like every other unknown state; billing retry is
/// a subscription-only notion.
fn parse_product(
    purchase_token: &str,
    store_product_id: &str,
    body: &serde_json::Value,
) -> Result<TransactionRecord, StoreError> {
    let purchase_date = body["purchaseTimeMillis"]
        .as_str()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| StoreError::ReceiptInvalid("missing purchaseTimeMillis".to_string()))?;

    let status = match body["purchaseState"].as_i64() {
        Some(0) => TransactionStatus::Active,
        Some(1) => TransactionStatus::Refunded,
        _ => TransactionStatus::Expired,
    };

    let store_transaction_id = body["orderId"]
        .as_str()
        .unwrap_or(purchase_token)
        .to_string();

    Ok(TransactionRecord {
        store: Store::Google,
        store_transaction_id,
        store_product_id: store_product_id.to_string(),
        purchase_date,
        expiration_date: None,
        status,
        raw: body.clone(),
    })
}

fn parse_catalog_entry(entry: &serde_json::Value) -> Option<ProductRecord> {
    let sku = entry["sku"].as_str()?;
    let is_subscription = entry["purchaseType"].as_str() == Some("subscription")
        || entry["subscriptionPeriod"].as_str().is_some();

    let listing = &entry["listings"]["en-US"];
    let default_price = &entry["defaultPrice"];

    Some(ProductRecord {
        store_product_id: sku.to_string(),
        product_type: if is_subscription {
            "subscription".to_string()
        } else {
            "one_time".to_string()
        },
        display_name: listing["title"].as_str().map(String::from),
        description: listing["description"].as_str().map(String::from),
        price_micros: default_price["priceMicros"]
            .as_str()
            .and_then(|p| p.parse().ok()),
        currency: default_price["currency"].as_str().map(String::from),
        subscription_period: entry["subscriptionPeriod"].as_str().map(String::from),
        trial_period: entry["trialPeriod"].as_str().map(String::from),
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn verify_error(status: reqwest::StatusCode, body: String) -> StoreError {
    if status.is_server_error() || status.as_u16() == 429 {
        return StoreError::Unavailable(format!("Play API {status}"));
    }
    match status.as_u16() {
        400 | 404 | 410 => StoreError::ReceiptInvalid(format!("Play API rejected token: {status}")),
        _ => {
            let code = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"]["status"].as_str().map(String::from))
                .unwrap_or_else(|| status.as_u16().to_string());
            StoreError::Rejected {
                code,
                message: format!("Play API {status}"),
            }
        }
    }
}
