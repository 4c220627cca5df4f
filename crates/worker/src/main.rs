use shared::config::{BucketIds, LogFormat, WorkerConfig};
use shared::logging::init_tracing;
use shared::repos::Store;
use tokio::signal;
use tokio::time::{self, Duration};
use tracing::{error, info};

mod reconcile;

const DEFAULT_LOG_FILTER: &str = "worker=debug,shared=info";

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(LogFormat::Text, DEFAULT_LOG_FILTER);
            error!("failed to read worker config: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format, DEFAULT_LOG_FILTER);

    // The worker never touches files; bucket ids only satisfy the store.
    let store = match Store::connect(
        &config.backend,
        config.collections.clone(),
        BucketIds::local_defaults(),
    ) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to build backend client: {err}");
            std::process::exit(1);
        }
    };

    if config.run_once {
        info!("worker running a single reconciliation pass");
        if reconcile::run_reconcile_tick(&store, config.topic_batch)
            .await
            .is_err()
        {
            std::process::exit(1);
        }
        return;
    }

    info!(
        "worker starting (tick every {} seconds, {} topics per tick)",
        config.tick_seconds, config.topic_batch
    );

    let mut ticker = time::interval(Duration::from_secs(config.tick_seconds));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let _ = reconcile::run_reconcile_tick(&store, config.topic_batch).await;
            }
        }
    }
}
