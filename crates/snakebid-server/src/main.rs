// snakebid server entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config (copying defaults on first run)
// 3. Open the database
// 4. Recover state and spawn the auction engine
// 5. Spawn the WebSocket server task
// 6. Wait for Ctrl+C
// 7. Cleanup on exit

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use snakebid_core::config;
use snakebid_core::store::{SqliteStore, Store};
use snakebid_server::session::ServerContext;
use snakebid_server::ws_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("snakebid starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: league={}, {} teams, {} budget, {} roster slots",
        config.league.name,
        config.league.teams.len(),
        config.league.initial_budget,
        config.league.max_roster_size
    );
    if config.credentials.admin_secret.is_none() {
        info!("No admin secret configured; administrative reset is disabled");
    }

    // 3. Open database
    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open_with_timeout(&config.db_path, config.db_timeout)
            .context("failed to open database")?,
    );
    info!("Database opened at {}", config.db_path);

    // 4. Recover and spawn the engine
    let (engine, mut engine_task) =
        snakebid_app::spawn(store.clone(), config.rules(), config.request_timeout)
            .await
            .context("failed to start the auction engine")?;

    // 5. Spawn WebSocket server task
    let ws_port = config.ws_port;
    let ctx = ServerContext::new(engine, store, Arc::new(config.credentials.clone()));
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(ws_port, ctx).await {
            error!("WebSocket server error on port {}: {}", ws_port, e);
        }
    });
    info!("Auction ready. WebSocket server listening on 127.0.0.1:{}", ws_port);

    // 6. Run until interrupted
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("Shutdown requested");

    // 7. Cleanup. Open connections still hold engine handles, so the engine
    // gets a short grace period and is then aborted.
    ws_handle.abort();
    if tokio::time::timeout(Duration::from_secs(2), &mut engine_task)
        .await
        .is_err()
    {
        engine_task.abort();
    }

    info!("snakebid shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to `logs/snakebid.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("snakebid.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snakebid=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
