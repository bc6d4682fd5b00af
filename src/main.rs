use anyhow::Result;
use clap::Parser;
use log::{debug, info};

use icsfusion::app::Application;
use icsfusion::cli::Cli;
use icsfusion::config::{get_config_path, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();
    icsfusion::init_logger(cli.log_level.as_deref());
    if let Ok(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => get_config_path()?,
    };
    let config = Config::load(Some(config_path.as_path()))?;
    info!("Starting icsfusion v{}", env!("CARGO_PKG_VERSION"));

    Application::new(config, config_path).run(cli.command).await
}
