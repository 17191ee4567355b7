pub mod apple;
pub mod apple_connect;
pub mod chain;
pub mod google;
pub mod types;

use std::sync::Arc;

use thiserror::Error;

use crate::error::ApiError;
use crate::models::credentials::StoreCredentials;
use types::{ProductRecord, Receipt, Store, TransactionRecord};

/// Per-attempt timeout for store verification calls.
pub const VERIFY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
/// Per-page timeout for product catalog fetches.
pub const CATALOG_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum StoreError {
    /// Signature or parse failure: the receipt itself is bad.
    #[error("invalid receipt: {0}")]
    ReceiptInvalid(String),

    /// The store answered with an error we cannot interpret.
    #[error("store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Timeout or 5xx; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReceiptInvalid(msg) => ApiError::ReceiptInvalid(msg),
            StoreError::Rejected { code, message } => ApiError::StoreRejected {
                store_code: code,
                message,
            },
            StoreError::Unavailable(msg) => ApiError::StoreUnavailable(msg),
        }
    }
}

/// Capability set implemented once per store. Adapters are stateless: they
/// are constructed per call from decrypted credentials.
#[async_trait::async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn verify_receipt(&self, receipt: &Receipt) -> Result<TransactionRecord, StoreError>;

    async fn fetch_products(&self) -> Result<Vec<ProductRecord>, StoreError>;

    /// Polls current subscription state for renewals and billing transitions
    /// that were never pushed through a receipt.
    async fn refresh_transaction(
        &self,
        store_transaction_id: &str,
    ) -> Result<TransactionRecord, StoreError>;
}

/// Seam between the pipeline and concrete adapters; tests install fakes here.
pub trait StoreAdapterFactory: Send + Sync {
    fn adapter(
        &self,
        store: Store,
        credentials: &StoreCredentials,
        bundle_id: &str,
    ) -> Result<Arc<dyn StoreAdapter>, ApiError>;
}

/// Production factory: builds adapters from an app's decrypted credentials.
pub struct DefaultAdapterFactory {
    /// DER-encoded pinned Apple root CA; absent means Apple verification
    /// cannot run and reports missing credentials.
    apple_root_ca: Option<Vec<u8>>,
}

impl DefaultAdapterFactory {
    pub fn new(apple_root_ca: Option<Vec<u8>>) -> Self {
        Self { apple_root_ca }
    }
}

impl StoreAdapterFactory for DefaultAdapterFactory {
    fn adapter(
        &self,
        store: Store,
        credentials: &StoreCredentials,
        bundle_id: &str,
    ) -> Result<Arc<dyn StoreAdapter>, ApiError> {
        match store {
            Store::Apple => {
                let creds = credentials
                    .apple
                    .clone()
                    .ok_or(ApiError::CredentialMissing)?;
                let roots = self
                    .apple_root_ca
                    .clone()
                    .map(|der| vec![der])
                    .ok_or(ApiError::CredentialMissing)?;
                Ok(Arc::new(apple::AppleAdapter::new(
                    creds,
                    bundle_id.to_string(),
                    apple::AppleEnvironment::Production,
                    roots,
                )))
            }
            Store::Google => {
                let creds = credentials
                    .google
                    .clone()
                    .ok_or(ApiError::CredentialMissing)?;
                let adapter = google::GoogleAdapter::new(
                    creds.service_account_json,
                    bundle_id.to_string(),
                )
                .map_err(|e| ApiError::Validation(format!("invalid service account: {e}")))?;
                Ok(Arc::new(adapter))
            }
        }
    }
}
