use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use rsync_deploy::config::{Cli, Commands, DeployRequest};
use rsync_deploy::deployer::Deployer;
use rsync_deploy::environment::DeployConfig;
use rsync_deploy::error::DeployError;
use rsync_deploy::runner::ProcessRunner;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<DeployError>()
                .map(DeployError::exit_code)
                .unwrap_or(2);
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config_path();
    let config = DeployConfig::load(&config_path)?;

    match cli.command {
        Commands::Deploy(args) => {
            let request = DeployRequest::from_args(args);
            tracing::debug!(?request, config = %config_path.display(), "deploy requested");

            let stdout = io::stdout();
            let mut deployer = Deployer::new(&cli.config_root, ProcessRunner, stdout.lock());
            deployer
                .deploy(&config, &request)
                .with_context(|| format!("Deploy to '{}' did not complete", request.environment))?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr; `RUST_LOG` overrides the level picked by `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "rsync_deploy=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
