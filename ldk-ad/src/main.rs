//! ldk-ad (Admin Desk) - dealership inventory and consignment service

use anyhow::{Context, Result};
use clap::Parser;
use ldk_ad::{build_router, AppState, DEFAULT_PORT, MODULE_NAME};
use ldk_common::api::auth::load_shared_secret;
use ldk_common::config::{RootFolderInitializer, RootFolderResolver};
use ldk_common::db::{init_database, seed_settings_from_config};
use ldk_common::events::EventBus;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ldk-ad", version, about = "LotDesk Admin Desk")]
struct Args {
    /// HTTP listen port
    #[arg(long, env = "LDK_AD_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Root folder holding lotdesk.db (overrides env and TOML)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "LDK_AD_BIND", default_value = "127.0.0.1")]
    bind: String,
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
        "Starting LotDesk Admin Desk ({}) v{} [{}] built {} ({})",
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

    let shared_secret = load_shared_secret(&pool).await?;
    if shared_secret == 0 {
        info!("API authentication disabled (shared_secret = 0)");
    }

    let state = AppState::new(pool, EventBus::new(1000), shared_secret);
    let app = build_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("{} listening on http://{}", MODULE_NAME, addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
