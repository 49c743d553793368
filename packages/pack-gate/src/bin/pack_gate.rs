//! pack-gate binary.

use pack_gate::{create_router, AppState, Config};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pack-gate");

    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("pack-gate").required(false))
        .add_source(
            config::Environment::with_prefix("PACK_GATE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("public_prefixes")
                .with_list_parse_key("cors_origins")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_else(|e| {
            // Fall back only when no config exists; parsing errors fail hard.
            let err_str = format!("{e}");
            if err_str.contains("not found") {
                warn!(error = %e, "No config file found, using defaults");
                Config::default()
            } else {
                error!(error = %e, "FATAL: Config error, fix PACK_GATE_* env vars or pack-gate.toml");
                std::process::exit(1);
            }
        });

    if config.service_api_key.is_empty() {
        warn!("PACK_GATE_SERVICE_API_KEY not set, partner endpoints are unprotected (dev mode)");
    } else {
        info!("Partner API key auth enabled");
    }

    info!(
        renderer = %config.renderer_url,
        content_prefix = %config.content_prefix,
        "Configuration loaded"
    );

    let bind_address = config.bind_address.clone();
    let sweep_interval = Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1));
    let state = Arc::new(AppState::new(config).map_err(|e| {
        error!(error = %e, "FATAL: could not initialise gate");
        e
    })?);

    if let Err(e) = state.verifier.warm().await {
        warn!(error = %e, "Identity keys not cached at startup, will retry on first request");
    }

    let cancel = CancellationToken::new();
    tokio::spawn(
        Arc::clone(&state.limiter).run_sweeper(sweep_interval, cancel.clone()),
    );

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    let state_sig = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            state_sig.ready.store(false, Ordering::Relaxed);
        })
        .await?;

    info!("HTTP server stopped, in-flight deliveries drained");
    cancel.cancel();

    info!("pack-gate shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
