//! graceful-server
//!
//! Demo service: serves a greeting until SIGINT/SIGTERM, then drains
//! in-flight requests within the configured grace period.
//!
//! ```text
//! graceful-server [--config server.toml] [--addr 127.0.0.1:8080]
//! ```
//!
//! The bind address is taken from `--addr`, then `$HTTP_ADDR`, then the
//! config file.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{routing::get, Router};
use clap::Parser;
use tower_http::trace::TraceLayer;

use graceful_server::config::{env, load_config, ServerConfig};
use graceful_server::observability::logging;
use graceful_server::{AxumEngine, Options, Server};

#[derive(Parser)]
#[command(name = "graceful-server")]
#[command(about = "HTTP server with graceful shutdown", long_about = None)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address, overrides config and $HTTP_ADDR.
    #[arg(short, long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    config.listener.bind_address = match cli.addr {
        Some(addr) => addr,
        None => env::get("$HTTP_ADDR", &config.listener.bind_address),
    };

    logging::init(&config.logging)?;

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        grace_period_secs = config.shutdown.grace_period_secs,
        "Configuration loaded"
    );

    let app = Router::new()
        .route("/", get(|| async { "Hello from graceful-server!" }))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http());

    let mut engine = AxumEngine::new(config.listener.bind_address.clone(), app)
        .with_max_connections(config.listener.max_connections);
    if let Some(timeout) = config.listener.request_timeout() {
        engine = engine.with_request_timeout(timeout);
    }

    let options = Options::new().with_grace_period(config.shutdown.grace_period());
    let server = Arc::new(Server::wrap(engine, options));

    let serving = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.start().await }
    });

    server.wait().await;
    server.shutdown().await;
    serving.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
