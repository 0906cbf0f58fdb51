use anyhow::Result;

use tally_lights::config::{Config, Role};
use tally_lights::service::TallyService;
use tally_lights::{light, protocol};

#[tokio::main]
async fn main() -> Result<()> {
    // Print the light protocol schema and exit
    if std::env::args().any(|arg| arg == "--schema") {
        println!("{}", serde_json::to_string_pretty(&protocol::schema())?);
        return Ok(());
    }

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logger
    env_logger::init();

    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    log::info!("Initializing on {}...", host);

    let config = Config::load()?;

    match config.role {
        Role::BaseStation => {
            log::info!(
                "Base station for lights at {}, switcher mode {}",
                config.base_station_addr(),
                config.mode
            );
            TallyService::new(config)?.start().await
        }
        Role::Light => {
            log::info!("Light on channel {}", config.light.channel);
            light::run(&config).await
        }
    }
}
