//! Loom server entry point.

use std::sync::Arc;

use loom::cli::{Cli, Command};
use loom::config::LoomConfig;
use loom::engine::local::DispatchRetryPolicy;
use loom::engine::{ExecutionEngine, LocalEngine};
use loom::http_server::{self, AppState};
use loom::notifier::HttpNotifier;
use loom::service::Service;
use loom::store::{InMemoryStore, Store};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    match cli.command {
        Command::Init { config } => {
            if config.exists() {
                eprintln!("refusing to overwrite existing config at {}", config.display());
                std::process::exit(1);
            }
            if let Err(e) = std::fs::write(&config, LoomConfig::render_starter_toml()) {
                eprintln!("failed to write {}: {e}", config.display());
                std::process::exit(1);
            }
            println!("wrote starter configuration to {}", config.display());
        }
        Command::Serve { config } => {
            let config = match LoomConfig::load(&config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("configuration error:\n{e}");
                    std::process::exit(1);
                }
            };
            init_tracing();
            if let Err(e) = run(config).await {
                tracing::error!(target: "loom::server", error = %e, "server exited with error");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

async fn run(config: LoomConfig) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)?;

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::with_data_dir(&config.data_dir)?);
    let notifier = Arc::new(HttpNotifier::new(config.dispatch_timeout(), config.dry_run_timeout()));

    let retry_policy = DispatchRetryPolicy {
        max_attempts: config.dispatch_max_attempts,
        base_delay: std::time::Duration::from_millis(config.dispatch_base_delay_ms),
    };
    let engine: Arc<dyn ExecutionEngine> = Arc::new(LocalEngine::new(store.clone(), notifier.clone(), retry_policy));
    engine.rehydrate().await?;

    let service = Arc::new(Service::new(store, engine, notifier.clone(), notifier));
    let app = http_server::router(AppState { service });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(target: "loom::server", addr = %config.bind_addr, "loom-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
