use anyhow::Context;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stackswap::config::Config;
use stackswap::db;
use stackswap::middleware::rate_limit::IpRateLimiter;
use stackswap::providers::lenco::LencoClient;
use stackswap::services::indexer::ChainIndexer;
use stackswap::services::liquidity::LiquidityGuard;
use stackswap::services::onramp::OnrampService;
use stackswap::services::oracle::PriceOracle;
use stackswap::services::settlement::SettlementEngine;
use stackswap::stacks::{SignerClient, StacksClient, StacksWallet};
use stackswap::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = db::create_pool(&config)
        .await
        .context("failed to connect to Postgres")?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("database migrations completed");

    let oracle = Arc::new(PriceOracle::new(config.price.clone(), pool.clone()));
    let lenco = Arc::new(LencoClient::new(config.lenco.clone()));
    let stacks = Arc::new(StacksClient::new(config.stacks.api_url.clone()));
    let liquidity = Arc::new(LiquidityGuard::new(
        lenco.clone(),
        config.lenco.min_balance_ngn,
    ));
    let engine = Arc::new(SettlementEngine::new(
        pool.clone(),
        oracle.clone(),
        lenco.clone(),
        liquidity.clone(),
        stacks.clone(),
        config.clone(),
    ));

    let onramp = config.stacks.signer_url.clone().map(|signer_url| {
        let wallet: Arc<dyn StacksWallet> = Arc::new(SignerClient::new(signer_url));
        Arc::new(OnrampService::new(
            pool.clone(),
            oracle.clone(),
            stacks.clone(),
            wallet,
            config.clone(),
        ))
    });
    if onramp.is_none() {
        tracing::info!("STACKS_SIGNER_URL not set, onramp sends disabled");
    }

    let cancel = CancellationToken::new();

    tokio::spawn(oracle.clone().run_refresh_loop(cancel.clone()));

    if config.indexer_enabled() {
        let platform = config.stacks.platform_address.clone().unwrap_or_default();
        let indexer = ChainIndexer::new(engine.clone(), stacks.clone(), &config.stacks, platform);
        tokio::spawn(indexer.run(cancel.clone()));
    } else {
        tracing::warn!("indexer disabled: platform address or internal key not configured");
    }

    let limiter = Arc::new(IpRateLimiter::new(
        config.rate_limit.window_ms,
        config.rate_limit.max_requests,
    ));

    let state = AppState {
        db: pool,
        config: config.clone(),
        oracle,
        lenco,
        stacks,
        liquidity,
        engine,
        onramp,
        limiter,
        started_at: Instant::now(),
    };

    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, env = %config.server.env, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel))
    .await?;

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(err) => {
            tracing::error!(error = %err, "unable to listen for shutdown signal");
        }
    }
    cancel.cancel();
}
