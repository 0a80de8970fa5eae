use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nested_set_sink::config::load_config;
use nested_set_sink::database::Database;
use nested_set_sink::retry_tx;
use nested_set_sink::sync::{SyncOutcome, Synchronizer};

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "SINK_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let database = Database::new(&config.database).await?;
    let synchronizer = Synchronizer::new(config.sink.clone());

    info!(
        table = %config.sink.table_name,
        log_table = %config.sink.log_table_name,
        interval = ?config.app.sync_interval,
        "Starting nested-set sink"
    );

    let mut interval = tokio::time::interval(config.app.sync_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let outcome =
                    retry_tx!(database.pool, tx, synchronizer.synchronize(&mut tx).await).await;
                match outcome {
                    Ok(SyncOutcome::NoPending) => {}
                    Ok(outcome) => info!(?outcome, "synchronization cycle finished"),
                    Err(error) => error!(?error, "synchronization cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
