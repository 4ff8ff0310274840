pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod providers;
pub mod services;
pub mod stacks;
pub mod utils;
pub mod validation;

use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::middleware::rate_limit::{self, IpRateLimiter};
use crate::providers::lenco::LencoClient;
use crate::services::liquidity::LiquidityGuard;
use crate::services::onramp::OnrampService;
use crate::services::oracle::PriceOracle;
use crate::services::settlement::SettlementEngine;
use crate::stacks::StacksClient;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub oracle: Arc<PriceOracle>,
    pub lenco: Arc<LencoClient>,
    pub stacks: Arc<StacksClient>,
    pub liquidity: Arc<LiquidityGuard>,
    pub engine: Arc<SettlementEngine>,
    /// Present only when a signer sidecar is configured.
    pub onramp: Option<Arc<OnrampService>>,
    pub limiter: Arc<IpRateLimiter>,
    pub started_at: Instant,
}

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/prices", get(handlers::prices::get_prices))
        .route("/api/prices/:token", get(handlers::prices::get_price))
        .route(
            "/api/prices/:token/history",
            get(handlers::prices::get_history),
        )
        .route("/api/offramp/banks", get(handlers::offramp::banks))
        .route("/api/offramp/rate", get(handlers::offramp::rate))
        .route("/api/offramp/liquidity", get(handlers::offramp::liquidity))
        .route(
            "/api/offramp/verify-account",
            post(handlers::offramp::verify_account),
        )
        .route(
            "/api/offramp/initialize",
            post(handlers::offramp::initialize),
        )
        .route("/api/offramp/notify-tx", post(handlers::offramp::notify_tx))
        .route(
            "/api/offramp/lenco-webhook",
            post(handlers::offramp::lenco_webhook),
        )
        .route(
            "/api/offramp/status/:reference",
            get(handlers::offramp::status),
        )
        .route("/api/offramp/history", get(handlers::offramp::history))
        .route("/api/onramp/rate", get(handlers::onramp::rate))
        .route("/api/onramp/initialize", post(handlers::onramp::initialize))
        .route(
            "/api/onramp/monnify-webhook",
            post(handlers::onramp::monnify_webhook),
        )
        .route(
            "/api/onramp/status/:reference",
            get(handlers::onramp::status),
        )
        .route("/api/onramp/history", get(handlers::onramp::history))
        .route(
            "/api/transactions",
            get(handlers::transactions::list).post(handlers::transactions::create),
        )
        .route(
            "/api/transactions/stats",
            get(handlers::transactions::stats),
        )
        .route("/api/transactions/:id", get(handlers::transactions::get))
        .route(
            "/api/transactions/:id/status",
            patch(handlers::transactions::update_status),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit::rate_limit,
        ));

    let internal = Router::new()
        .route(
            "/api/offramp/confirm-receipt",
            post(handlers::offramp::confirm_receipt),
        )
        .route("/api/prices/refresh", post(handlers::prices::refresh))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_internal_key,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .merge(api)
        .merge(internal);

    if let Some(origin) = state.config.server.allowed_origin.clone() {
        app = app.layer(cors_layer(&origin));
    }

    app.with_state(state)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match origin.parse::<HeaderValue>() {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            tracing::warn!(origin, "ALLOWED_ORIGIN is not a valid header value, allowing any");
            layer.allow_origin(Any)
        }
    }
}
