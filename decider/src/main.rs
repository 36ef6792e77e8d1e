mod config;
mod telemetry;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Args)]
struct CliArgs {
    /// Path to the YAML config file
    #[arg(long)]
    config: PathBuf,
}

#[derive(Parser)]
enum CliCommand {
    /// Serve the feature file over HTTP
    Server(CliArgs),
    /// Write the feature file from the key-value store
    Watch(CliArgs),
}

impl CliCommand {
    fn args(&self) -> &CliArgs {
        match self {
            CliCommand::Server(args) | CliCommand::Watch(args) => args,
        }
    }
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("server error: {0}")]
    Server(#[from] server::ServerError),
    #[error("invalid store config: {0}")]
    StoreConfig(#[from] store::config::ValidationError),
    #[error("the watch command needs a store section in the config")]
    MissingStoreConfig,
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let config = match Config::from_file(&cli.args().config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = telemetry::init_logging(config.common.logging.as_ref());
    if let Some(metrics_config) = &config.common.metrics
        && let Err(e) = telemetry::init_metrics(metrics_config)
    {
        tracing::error!(error = %e, "Metrics disabled");
    }

    match run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand, config: Config) -> Result<(), CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli {
        CliCommand::Server(_) => {
            tracing::info!(namespace = %config.namespace, "Starting feature server");
            runtime.block_on(server::run(config.server, &config.namespace))?;
        }
        CliCommand::Watch(_) => {
            let store_config = config.store.ok_or(CliError::MissingStoreConfig)?;
            store_config.validate()?;
            runtime.block_on(store::run(store_config, &config.namespace));
        }
    }

    Ok(())
}
