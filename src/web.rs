#![cfg(not(tarpaulin_include))]

use storysheet::{app, config::Config};

/// Main entry point for the API server
///
/// Reads configuration from the environment, opens the configured storage
/// backend and serves the API until interrupted.
///
/// # Environment
/// * `RUST_LOG` - log filter, `info` when unset
/// * See [`Config::from_lookup`] for the remaining variables
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    app::run(config).await
}
