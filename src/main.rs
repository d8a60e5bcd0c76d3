use anyhow::Result;
use dotenvy::dotenv;

use mediagate::cli::{apply_serve_overrides, render_formats_table, Cli, Commands};
use mediagate::core::config::{self, ServerConfig};
use mediagate::core::logging::{init_logger, log_configuration};
use mediagate::core::web_server::run_server;
use mediagate::download::orchestrator::{Orchestrator, RetrievalRequest};
use mediagate::download::ytdlp;

/// Main entry point
///
/// Parses CLI arguments and dispatches to the chosen subcommand; `serve` when
/// none is given.
///
/// # Errors
/// Returns an error if initialization fails (logging, configuration, bind).
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env before any config static is read
    let _ = dotenv();

    let cli = Cli::parse_args();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH, &config::LOG_LEVEL)?;

    let config = ServerConfig::from_env()?;

    match cli.command {
        None => run_serve(config).await,
        Some(Commands::Serve {
            bind,
            scratch_dir,
            store_dir,
        }) => run_serve(apply_serve_overrides(config, bind, scratch_dir, store_dir)).await,
        Some(Commands::Formats { url, json }) => run_formats(config, url, json).await,
        Some(Commands::CheckExtractor) => {
            let version = ytdlp::check_extractor(&config.extractor).await?;
            println!("extractor version: {}", version);
            Ok(())
        }
    }
}

async fn run_serve(config: ServerConfig) -> Result<()> {
    log_configuration(&config);
    run_server(config).await
}

async fn run_formats(config: ServerConfig, url: String, json: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(&config);
    let request = RetrievalRequest::new(url, None, "cli");
    let formats = orchestrator.list_formats(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&formats)?);
    } else {
        print!("{}", render_formats_table(&formats));
    }
    Ok(())
}
