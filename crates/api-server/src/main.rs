use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api_server::http::{self, AppState, RateLimiter};
use shared::backend::AppwriteClient;
use shared::config::ApiConfig;
use shared::llm::GeminiGateway;
use shared::logging::init_tracing;
use shared::repos::Store;
use tracing::{error, info};

const DEFAULT_LOG_FILTER: &str = "api_server=debug,shared=info,axum=info";
const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match ApiConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            init_tracing(shared::config::LogFormat::Text, DEFAULT_LOG_FILTER);
            error!("failed to read config: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(config.log_format, DEFAULT_LOG_FILTER);

    let store = match Store::connect(
        &config.backend,
        config.collections.clone(),
        config.buckets.clone(),
    ) {
        Ok(store) => store,
        Err(err) => {
            error!("failed to build backend client: {err}");
            std::process::exit(1);
        }
    };

    let accounts = match AppwriteClient::new(&config.backend) {
        Ok(client) => client,
        Err(err) => {
            error!("failed to build account client: {err}");
            std::process::exit(1);
        }
    };

    let chat_model = match GeminiGateway::new(config.gemini.clone()) {
        Ok(gateway) => gateway,
        Err(err) => {
            error!("failed to build gemini gateway: {err}");
            std::process::exit(1);
        }
    };

    let rate_limiter = RateLimiter::default();
    let _pruner = rate_limiter.spawn_pruner(RATE_LIMIT_PRUNE_INTERVAL);

    let app = http::build_router(AppState {
        store,
        accounts: Arc::new(accounts),
        chat_model: Arc::new(chat_model),
        rate_limiter,
        chat_history_limit: config.chat_history_limit,
    });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid API_BIND_ADDR {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "api server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    if let Err(err) = axum::serve(listener, app).await {
        error!("server stopped: {err}");
        std::process::exit(1);
    }
}
