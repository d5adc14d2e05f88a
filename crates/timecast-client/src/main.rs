//! timecast CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use timecast_client::cli::{Cli, Command, ConfigAction};
use timecast_client::commands;
use timecast_client::commands::send::{OutputMode, parse_fire_at};
use timecast_client::config::ClientConfig;
use timecast_client::error::ClientResult;
use timecast_client::socket::ServerClient;
use timecast_core::{TracingConfig, TracingOutputFormat, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let source = cli.config.clone().unwrap_or_else(ClientConfig::default_path);
    let mut config = match cli.config {
        Some(ref path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };
    cli.apply_overrides(&mut config);
    if let Command::Serve(ref args) = cli.command {
        args.apply(&mut config);
    }

    // The daemon logs per [logging]; one-shot commands stay quiet unless asked.
    let log_config = match (&cli.command, cli.debug) {
        (Command::Serve(_), debug) => {
            let log_config = config.logging.tracing_config()?;
            if debug {
                log_config.with_level(Level::DEBUG)
            } else {
                log_config
            }
        }
        (_, true) => TracingConfig::cli_debug(),
        (_, false) => TracingConfig::default()
            .with_level(Level::WARN)
            .with_format(TracingOutputFormat::Compact),
    };
    init_tracing(log_config)?;

    let output = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    match cli.command {
        Command::Serve(_) => commands::server::run(&config).await,
        Command::Info => commands::send::info(&ServerClient::from_config(&config)?, output).await,
        Command::Ping => commands::send::ping(&ServerClient::from_config(&config)?, output).await,
        Command::Publish { channel, payload } => {
            let client = ServerClient::from_config(&config)?;
            commands::send::publish(&client, &channel, &payload, output).await
        }
        Command::Schedule {
            channel,
            payload,
            at,
            delay,
        } => {
            let client = ServerClient::from_config(&config)?;
            let fire_at = parse_fire_at(at.as_deref(), delay)?;
            commands::send::schedule(&client, fire_at, &channel, &payload, output).await
        }
        Command::Listen { channels, count } => {
            let client = ServerClient::from_config(&config)?;
            commands::send::listen(&client, &channels, count, output).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, &source),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&source),
        },
    }
}
