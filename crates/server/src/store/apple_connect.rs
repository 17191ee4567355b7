use reqwest::Client;

use super::types::ProductRecord;
use super::{StoreError, CATALOG_TIMEOUT};
use crate::models::credentials::AppleCredentials;

const CONNECT_BASE: &str = "https://api.appstoreconnect.apple.com";

/// App Store Connect catalog client. Walks subscription groups and in-app
/// purchases and flattens them into normalized product records.
pub struct AppleConnectClient {
    client: Client,
    credentials: AppleCredentials,
    bundle_id: String,
}

impl AppleConnectClient {
    pub fn new(credentials: AppleCredentials, bundle_id: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(CATALOG_TIMEOUT)
                .build()
                .unwrap_or_default(),
            credentials,
            bundle_id,
        }
    }

    fn generate_jwt(&self) -> Result<String, StoreError> {
        use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": self.credentials.issuer_id,
            "iat": now,
            "exp": now + 1200,
            "aud": "appstoreconnect-v1",
        });

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.credentials.key_id.clone());

        encode(
            &header,
            &claims,
            &EncodingKey::from_ec_pem(self.credentials.private_key.as_bytes()).map_err(|e| {
                StoreError::Rejected {
                    code: "invalid_key".to_string(),
                    message: e.to_string(),
                }
            })?,
        )
        .map_err(|e| StoreError::Rejected {
            code: "jwt_sign".to_string(),
            message: e.to_string(),
        })
    }

    pub async fn fetch_products(&self) -> Result<Vec<ProductRecord>, StoreError> {
        let jwt = self.generate_jwt()?;
        let mut products = Vec::new();

        let app_id = self.find_app_id(&jwt).await?;
        tracing::debug!(app_id, bundle_id = self.bundle_id, "resolved Connect app");

        products.extend(self.fetch_subscriptions(&jwt, &app_id).await?);
        products.extend(self.fetch_in_app_purchases(&jwt, &app_id).await?);

        Ok(products)
    }

    async fn get_json(&self, jwt: &str, url: &str) -> Result<serde_json::Value, StoreError> {
        let response = self.client.get(url).bearer_auth(jwt).send().await?;
        let status = response.status();
        if !status.is_success() {
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(StoreError::Unavailable(format!("Connect API {status}")));
            }
            return Err(StoreError::Rejected {
                code: status.as_u16().to_string(),
                message: format!("Connect API {status} for {url}"),
            });
        }
        Ok(response.json().await?)
    }

    async fn find_app_id(&self, jwt: &str) -> Result<String, StoreError> {
        let url = format!("{CONNECT_BASE}/v1/apps?filter[bundleId]={}", self.bundle_id);
        let resp = self.get_json(jwt, &url).await?;

        resp["data"][0]["id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| StoreError::Rejected {
                code: "app_not_found".to_string(),
                message: format!("no Connect app for bundle {}", self.bundle_id),
            })
    }

    async fn fetch_subscriptions(
        &self,
        jwt: &str,
        app_id: &str,
    ) -> Result<Vec<ProductRecord>, StoreError> {
        let mut products = Vec::new();

        let groups_url = format!("{CONNECT_BASE}/v1/apps/{app_id}/subscriptionGroups");
        let groups_resp = self.get_json(jwt, &groups_url).await?;
        let empty = vec![];
        let groups = groups_resp["data"].as_array().unwrap_or(&empty);

        for group in groups {
            let Some(group_id) = group["id"].as_str() else {
                continue;
            };

            let subs_url =
                format!("{CONNECT_BASE}/v1/subscriptionGroups/{group_id}/subscriptions");
            let subs_resp = self.get_json(jwt, &subs_url).await?;
            let empty_subs = vec![];
            let subs = subs_resp["data"].as_array().unwrap_or(&empty_subs);

            for sub in subs {
                let Some(sub_id) = sub["id"].as_str() else {
                    continue;
                };
                let attrs = &sub["attributes"];
                let Some(product_id) = attrs["productId"].as_str() else {
                    continue;
                };
                let name = attrs["name"].as_str().unwrap_or(product_id);

                let (display_name, description) = self
                    .fetch_subscription_localization(jwt, sub_id)
                    .await
                    .unwrap_or((name.to_string(), None));

                let price = self.fetch_subscription_price(jwt, sub_id).await.ok();
                let period = self.fetch_subscription_period(jwt, sub_id).await.ok();
                let trial = self
                    .fetch_introductory_offer(jwt, sub_id)
                    .await
                    .ok()
                    .flatten();

                products.push(ProductRecord {
                    store_product_id: product_id.to_string(),
                    product_type: "subscription".to_string(),
                    display_name: Some(display_name),
                    description,
                    price_micros: price.as_ref().map(|(micros, _)| *micros),
                    currency: price.map(|(_, currency)| currency),
                    subscription_period: period,
                    trial_period: trial,
                });
            }
        }

        Ok(products)
    }

    async fn fetch_subscription_localization(
        &self,
        jwt: &str,
        sub_id: &str,
    ) -> Result<(String, Option<String>), StoreError> {
        let url = format!("{CONNECT_BASE}/v1/subscriptions/{sub_id}/subscriptionLocalizations");
        let resp = self.get_json(jwt, &url).await?;
        let empty = vec![];
        let localizations = resp["data"].as_array().unwrap_or(&empty);

        let loc = localizations
            .iter()
            .find(|l| l["attributes"]["locale"].as_str() == Some("en-US"))
            .or_else(|| localizations.first())
            .ok_or_else(|| StoreError::Rejected {
                code: "no_localizations".to_string(),
                message: format!("subscription {sub_id} has no localizations"),
            })?;

        let name = loc["attributes"]["name"].as_str().unwrap_or_default().to_string();
        let desc = loc["attributes"]["description"].as_str().map(String::from);
        Ok((name, desc))
    }

    async fn fetch_subscription_price(
        &self,
        jwt: &str,
        sub_id: &str,
    ) -> Result<(i64, String), StoreError> {
        let url = format!("{CONNECT_BASE}/v1/subscriptions/{sub_id}/prices");
        let resp = self.get_json(jwt, &url).await?;

        let price = resp["data"]
            .as_array()
            .and_then(|prices| prices.first())
            .ok_or_else(|| StoreError::Rejected {
                code: "no_prices".to_string(),
                message: format!("subscription {sub_id} has no prices"),
            })?;

        let price_point_url = price["relationships"]["subscriptionPricePoint"]["links"]["related"]
            .as_str()
            .ok_or_else(|| StoreError::Rejected {
                code: "no_price_point".to_string(),
                message: "price is missing its price point link".to_string(),
            })?;

        let pp_resp = self.get_json(jwt, price_point_url).await?;
        let amount: f64 = pp_resp["data"]["attributes"]["customerPrice"]
            .as_str()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0.0);
        let price_micros = (amount * 1_000_000.0) as i64;

        let currency = match pp_resp["data"]["relationships"]["territory"]["links"]["related"]
            .as_str()
        {
            Some(territory_url) if !territory_url.is_empty() => {
                let t_resp = self.get_json(jwt, territory_url).await?;
                t_resp["data"]["attributes"]["currency"]
                    .as_str()
                    .unwrap_or("USD")
                    .to_string()
            }
            _ => "USD".to_string(),
        };

        Ok((price_micros, currency))
    }

    async fn fetch_subscription_period(
        &self,
        jwt: &str,
        sub_id: &str,
    ) -> Result<String, StoreError> {
        let url = format!("{CONNECT_BASE}/v1/subscriptions/{sub_id}");
        let resp = self.get_json(jwt, &url).await?;

        let period = resp["data"]["attributes"]["subscriptionPeriod"]
            .as_str()
            .unwrap_or("ONE_MONTH");

        Ok(connect_period_to_iso(period).to_string())
    }

    async fn fetch_introductory_offer(
        &self,
        jwt: &str,
        sub_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let url = format!("{CONNECT_BASE}/v1/subscriptions/{sub_id}/introductoryOffers");
        let resp = self.get_json(jwt, &url).await?;

        Ok(resp["data"]
            .as_array()
            .and_then(|offers| offers.first())
            .and_then(|offer| offer["attributes"]["duration"].as_str())
            .map(|duration| connect_period_to_iso(duration).to_string()))
    }

    async fn fetch_in_app_purchases(
        &self,
        jwt: &str,
        app_id: &str,
    ) -> Result<Vec<ProductRecord>, StoreError> {
        let url = format!("{CONNECT_BASE}/v2/apps/{app_id}/inAppPurchasesV2");
        let resp = self.get_json(jwt, &url).await?;
        let empty = vec![];
        let iaps = resp["data"].as_array().unwrap_or(&empty);
        let mut products = Vec::new();

        for iap in iaps {
            let attrs = &iap["attributes"];
            let Some(product_id) = attrs["productId"].as_str() else {
                continue;
            };
            let name = attrs["name"].as_str().unwrap_or(product_id);

            let product_type = match attrs["inAppPurchaseType"].as_str().unwrap_or("CONSUMABLE") {
                "NON_CONSUMABLE" => "one_time",
                _ => "consumable",
            };

            products.push(ProductRecord {
                store_product_id: product_id.to_string(),
                product_type: product_type.to_string(),
                display_name: Some(name.to_string()),
                description: None,
                price_micros: None,
                currency: None,
                subscription_period: None,
                trial_period: None,
            });
        }

        Ok(products)
    }
}

fn connect_period_to_iso(period: &str) -> &str {
    match period {
        "THREE_DAYS" => "P3D",
        "ONE_WEEK" => "P1W",
        "TWO_WEEKS" => "P2W",
        "ONE_MONTH" => "P1M",
        "TWO_MONTHS" => "P2M",
        "THREE_MONTHS" => "P3M",
        "SIX_MONTHS" => "P6M",
        "ONE_YEAR" => "P1Y",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_period_mapping() {
        assert_eq!(connect_period_to_iso("ONE_MONTH"), "P1M");
        assert_eq!(connect_period_to_iso("ONE_YEAR"), "P1Y");
        assert_eq!(connect_period_to_iso("P2W"), "P2W");
    }
}
