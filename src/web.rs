#![cfg(not(tarpaulin_include))]

use learnlab::app;
use learnlab::config::Config;
use std::env;

/// Main entry point for the web server
///
/// Loads `.env`, initializes logging and serves the API until Ctrl-C.
///
/// # Arguments
/// * Optional bind address (e.g. `0.0.0.0:8080`), overriding `LEARNLAB_BIND`
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = Config::from_env();

    let args: Vec<String> = env::args().collect();
    if args.len() >= 2 {
        config.bind = args[1].clone();
    }

    log::info!(
        "starting learnlab (data dir {}, persistence {})",
        config.data_dir.display(),
        if config.persist { "on" } else { "off" }
    );
    app::run(config).await
}
