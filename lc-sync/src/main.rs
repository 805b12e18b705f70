//! Query a SPARQL endpoint for patient data and synchronize it into LibreClinica.
use envconfig::Envconfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use lc_sync::config::{Config, SyncConfig};
use lc_sync::error::{ConfigError, SyncError};
use lc_sync::pipeline;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), SyncError> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().map_err(ConfigError::from)?;
    let config = SyncConfig::load(&config)?;

    match pipeline::run(&config).await {
        Ok(summary) => {
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed(),
                "sync finished"
            );
            Ok(())
        }
        Err(e) => {
            error!("sync aborted: {}", e);
            Err(e)
        }
    }
}
