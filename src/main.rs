use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use postbox::adapters::imap::TlsTransport;
use postbox::adapters::sqlite;
use postbox::config::AppConfig;
use postbox::services::processor::LogProcessor;
use postbox::state::Daemon;
use postbox::PostboxError;

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("postbox=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run().await {
        error!("Fatal: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), PostboxError> {
    let config = AppConfig::load()?;

    let db = sqlite::create_pool(&config.daemon.database_path)?;
    let conn = db.get()?;
    sqlite::initialize_schema(&conn)?;
    drop(conn);

    let idle_timeout = Duration::from_secs(config.imap.idle_timeout_minutes * 60);
    let transport = Arc::new(TlsTransport::new(idle_timeout));
    let daemon = Daemon::new(db, &config.daemon, transport, Arc::new(LogProcessor));

    daemon.clone().start().await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| PostboxError::Io(e.to_string()))?;
    info!("Interrupt received, draining workers");
    daemon.stop().await;

    Ok(())
}
