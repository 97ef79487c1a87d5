//! # Reel Server
//!
//! Main entry point for the Reel command processor.
//!
//! Loads layered configuration, opens the SQLite command queue, restores any
//! work left over from the previous run and drains it until interrupted.

use reel_config::ConfigLoader;
use reel_core::{init_tracing, ReelResult};
use reel_server::{startup, AppBuilder};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let loader = match ConfigLoader::from_default_location() {
        Ok(loader) => loader,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let config = loader.get().await;

    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }
    reel_commands::register_metrics();

    startup::print_banner();
    info!("Starting Reel Server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    if let Err(e) = run(loader).await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run(loader: ConfigLoader) -> ReelResult<()> {
    let config = loader.get().await;
    let app = AppBuilder::new().with_config(config).build().await?;

    let report = app.start().await?;
    startup::print_startup_info(&app.config().commands, &report);

    shutdown_signal().await;

    app.shutdown().await?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
