//! Corkboard server binary.

use anyhow::{Context, Result};
use clap::Parser;
use corkboard_core::config::AppConfig;
use corkboard_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for in-flight handlers before giving up.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Corkboard - versioned blob slots with change fan-out
#[derive(Parser, Debug)]
#[command(name = "corkboardd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CORKBOARD_CONFIG",
        default_value = "config/corkboard.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Corkboard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration. The file is optional; every setting has a default
    // and env vars override.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("CORKBOARD_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .apply_env_overrides()
        .context("invalid environment override")?;

    match config.validate() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("Configuration warning: {}", warning);
            }
        }
        Err(error) => anyhow::bail!("invalid configuration: {error}"),
    }

    let addr: SocketAddr = config.server.bind_addr().context("invalid bind address")?;

    // Opening the state creates the storage root; failing here is fatal.
    let state = AppState::new(config)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(root = %state.store.root().display(), "Storage initialized");

    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!("Listening on {}", addr);

    // The accept loop runs as its own task: the shutdown sequence below
    // refuses new handshakes and drains in-flight handlers while the
    // listener is still accepting, and stops the accept loop last.
    let mut server = tokio::spawn(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            result.context("server task failed")?.context("server error")?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining in-flight requests");
            state.begin_shutdown();
            match state.gate.drain(SHUTDOWN_DRAIN_TIMEOUT).await {
                Some(_guard) => tracing::info!("in-flight requests drained"),
                None => tracing::warn!(
                    timeout_secs = SHUTDOWN_DRAIN_TIMEOUT.as_secs(),
                    "drain timed out, shutting down anyway"
                ),
            }
            // Let per-connection writers flush queued acks.
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.abort();
            let _ = server.await;
        }
    }

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
