#![cfg(not(tarpaulin_include))]

use inventario::{Config, app};

/// Main entry point for the web application
///
/// Reads the configuration from the environment, loads the inventory and
/// serves it until the process is stopped. A spreadsheet that cannot be
/// loaded aborts startup.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    app::run(config).await
}
