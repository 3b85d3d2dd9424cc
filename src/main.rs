use splicer::{api, config::Config, environment::Environment, logging, metrics};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize logging
    logging::init_logger("splicer");

    // Initialize metrics
    metrics::init_metrics();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Slicing at {}s with {}s overflow, {} workers per query",
        config.slice_size_secs, config.overflow_secs, config.workers_per_query
    );

    let env = match Environment::from_config(config) {
        Ok(env) => env,
        Err(e) => {
            error!("Failed to build environment: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = api::start_server(env).await {
        error!("Server stopped: {}", e);
        std::process::exit(1);
    }
}
