//! Capture fusion CLI entry point.

use clap::Parser;

use capture_fusion::cli::{handle_error, Cli, Commands};
use capture_fusion::infrastructure::config::ConfigLoader;
use capture_fusion::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let result = match cli.command {
        Commands::Replay(args) => capture_fusion::cli::commands::replay::execute(args, &config, cli.json).await,
        Commands::Lease(args) => capture_fusion::cli::commands::lease::execute(args, &config, cli.json).await,
        Commands::Config(args) => capture_fusion::cli::commands::config::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
