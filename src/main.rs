//! camgrid - Camera grid supervisor
//!
//! Main entry point.

use camgrid::{config_store, recovery_loop::RecoveryLoop, state::AppConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camgrid=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camgrid v{}", env!("CARGO_PKG_VERSION"));

    let app_config = AppConfig::default();

    let exit_code = match run(&app_config).await {
        Ok(()) => {
            tracing::info!("camgrid stopped");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, fatal = e.is_fatal(), code = e.code(), "camgrid exiting");
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(app_config: &AppConfig) -> camgrid::Result<()> {
    let config = config_store::load_config(&app_config.config_path).await?;
    tracing::info!(
        log_level = %config.display.log_level,
        surface = ?config.surface(),
        "Layout ready"
    );

    let recovery = RecoveryLoop::from_config(&config).await?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    recovery.run(cancel).await
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
