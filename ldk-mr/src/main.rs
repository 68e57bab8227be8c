//! ldk-mr (Market Research) - comparable pricing and competitor tracking service

use anyhow::{Context, Result};
use clap::Parser;
use ldk_common::api::auth::load_shared_secret;
use ldk_common::config::{RootFolderInitializer, RootFolderResolver};
use ldk_common::db::{init_database, seed_settings_from_config};
use ldk_common::events::EventBus;
use ldk_mr::db::job_runs::fail_interrupted_runs;
use ldk_mr::source::{AutoDevClient, ComparableSource};
use ldk_mr::{build_router, AppState, DEFAULT_PORT, MODULE_NAME};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ldk-mr", version, about = "LotDesk Market Research")]
struct Args {
    /// HTTP listen port
    #[arg(long, env = "LDK_MR_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Root folder holding lotdesk.db (overrides env and TOML)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "LDK_MR_BIND", default_value = "127.0.0.1")]
    bind: String,

    /// Serve the API without background jobs
    #[arg(long)]
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = RootFolderResolver::new(MODULE_NAME);
    let config = resolver.load_config();

    // RUST_LOG wins over the TOML level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting LotDesk Market Research ({}) v{} [{}] built {} ({})",
        MODULE_NAME,
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = args.root_folder.unwrap_or_else(|| resolver.resolve());
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path).await?;
    seed_settings_from_config(&pool, &config).await?;

    let interrupted = fail_interrupted_runs(&pool, ldk_common::time::now()).await?;
    if interrupted > 0 {
        warn!("Marked {} job run(s) from a previous process as failed", interrupted);
    }

    let shared_secret = load_shared_secret(&pool).await?;
    if shared_secret == 0 {
        info!("API authentication disabled (shared_secret = 0)");
    }

    // The API key is read from settings per request, so it can be set after startup
    let client =
        AutoDevClient::from_settings(pool.clone()).context("Failed to build Auto.dev client")?;
    let source: Arc<dyn ComparableSource> = Arc::new(client);

    let state = AppState::new(pool, EventBus::new(1000), shared_secret, source);

    let cancel = CancellationToken::new();
    let jobs = if args.no_scheduler {
        info!("Background jobs disabled (--no-scheduler)");
        Vec::new()
    } else {
        state.scheduler.start(cancel.clone())
    };

    let app = build_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("{} listening on http://{}", MODULE_NAME, addr);
    info!("Health check: http://{}/health", addr);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for job in jobs {
        let _ = job.await;
    }

    Ok(())
}
