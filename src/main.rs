//! AgriConnect Backend Server
//!
//! Serves the authentication, KYC, order and settlement APIs and runs the
//! escrow release and key expiry jobs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;

use agriconnect_server::app::{build_state, notifier_from_config, storage_from_config, Collaborators};
use agriconnect_server::config::Config;
use agriconnect_server::db::{create_pool, run_migrations};
use agriconnect_server::escrow::{escrow_release_job, kv_sweeper};
use agriconnect_server::gateway::SimulatedPaymentGateway;
use agriconnect_server::middleware::RateLimiter;
use agriconnect_server::routes::{app_router, HttpOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(environment = config.environment.as_str(), "Starting AgriConnect server");

    let notifier = notifier_from_config(&config);
    let gateway = Arc::new(SimulatedPaymentGateway::new());

    let collaborators = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, &config.database_url_masked(), config.db_max_connections)
                .await
                .context("database connection failed")?;
            run_migrations(&pool).await.context("migrations failed")?;
            Collaborators::postgres(pool, notifier, gateway)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Collaborators::in_memory(notifier, gateway)
        }
    }
    .with_storage(storage_from_config(&config));

    let app_state = build_state(&config, &collaborators).context("invalid ENCRYPTION_KEY")?;

    // Start escrow release job in background
    let engine = app_state.settlement_engine.clone();
    let release_interval = Duration::from_secs(config.escrow_release_interval_seconds);
    tokio::spawn(async move {
        escrow_release_job(engine, release_interval).await;
        tracing::error!("Escrow release job exited unexpectedly");
    });

    // Start key sweeper in background
    let kv = collaborators.kv.clone();
    tokio::spawn(async move {
        kv_sweeper(kv, Duration::from_secs(60)).await;
        tracing::error!("Key sweeper exited unexpectedly");
    });

    let rate_limiter = RateLimiter::new(config.rate_limit_rps);
    let limiter_cleanup = rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(300)).await;
            limiter_cleanup.cleanup(Duration::from_secs(600));
        }
    });

    let app = app_router(
        app_state,
        rate_limiter,
        &HttpOptions {
            webhook_secret: config.webhook_secret.clone(),
            cors_allowed_origins: config.cors_allowed_origins.clone(),
            hsts: config.environment.is_production(),
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
