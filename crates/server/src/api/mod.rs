pub mod apps;
pub mod auth;
pub mod credentials;
pub mod entitlements;
pub mod events;
pub mod health;
pub mod offerings;
pub mod products;
pub mod receipts;
pub mod subscribers;
pub mod webhooks;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::crypto::Cryptor;
use crate::db::DbPool;
use crate::store::StoreAdapterFactory;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub cryptor: Arc<Cryptor>,
    pub adapters: Arc<dyn StoreAdapterFactory>,
    /// Nudges the webhook dispatcher when new events land.
    pub delivery_signal: Arc<Notify>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/v1/apps", post(apps::create_app).get(apps::list_apps))
        .route("/v1/apps/{app_id}", delete(apps::delete_app))
        .route(
            "/v1/apps/{app_id}/credentials",
            put(credentials::put_credentials).get(credentials::get_credentials),
        )
        .route(
            "/v1/apps/{app_id}/entitlements",
            post(entitlements::create_entitlement).get(entitlements::list_entitlements),
        )
        .route(
            "/v1/apps/{app_id}/entitlements/{entitlement_id}",
            delete(entitlements::delete_entitlement),
        )
        .route(
            "/v1/apps/{app_id}/products",
            post(products::create_product).get(products::list_products),
        )
        .route("/v1/apps/{app_id}/products/sync", post(products::sync_products))
        .route("/v1/apps/{app_id}/offerings", get(offerings::get_offerings))
        .route("/v1/subscribers/{app_user_id}", get(subscribers::get_subscriber))
        .route(
            "/v1/subscribers/{app_user_id}/restore",
            post(subscribers::restore_subscriber),
        )
        .route("/v1/receipts", post(receipts::submit_receipt))
        .route(
            "/v1/webhooks",
            post(webhooks::create_webhook).get(webhooks::list_webhooks),
        )
        .route("/v1/events", get(events::list_events))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
