use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use packwright::config::{Config, LogFormat};
use packwright::embedding::HttpEmbedder;
use packwright::llm::HttpLlmGateway;
use packwright::pipeline::AppContext;
use packwright::registry::HttpModRegistry;
use packwright::server;
use packwright::store::RestStore;

/// AI modpack assembly and crash-analysis engine.
#[derive(Debug, Parser)]
#[command(name = "packwright", version)]
struct Cli {
    /// Override the configured server port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "packwright starting..."
    );

    // Initialize the store client
    let store = match RestStore::new(&config.store, &config.request) {
        Ok(s) => {
            info!(url = %config.store.url, "store client initialized");
            Arc::new(s.with_auth_key(config.auth.jwt_secret.clone()))
        }
        Err(e) => {
            error!(error = %e, "failed to initialize store client");
            return Err(e.into());
        }
    };

    // Initialize the LLM gateway
    let gateway = match HttpLlmGateway::new(&config.llm, config.request.clone()) {
        Ok(g) => {
            info!(base_url = %config.llm.base_url, model = %config.llm.model, "LLM gateway initialized");
            Arc::new(g)
        }
        Err(e) => {
            error!(error = %e, "failed to initialize LLM gateway");
            return Err(e.into());
        }
    };

    // Initialize the embedder
    let embedder = match HttpEmbedder::new(&config.llm, &config.request) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(error = %e, "failed to initialize embedder");
            return Err(e.into());
        }
    };

    // Initialize the registry client
    let registry = match HttpModRegistry::new(&config.registry, config.request.clone()) {
        Ok(r) => {
            info!(base_url = %config.registry.base_url, "registry client initialized");
            Arc::new(r)
        }
        Err(e) => {
            error!(error = %e, "failed to initialize registry client");
            return Err(e.into());
        }
    };

    let port = config.server.port;
    let context = Arc::new(AppContext::new(
        config, store, gateway, embedder, registry,
    ));

    let app = server::router(context);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "server ready");

    axum::serve(listener, app).await?;

    info!("server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
