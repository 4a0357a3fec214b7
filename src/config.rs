//! CLI arguments and the per-invocation deploy request.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::command::tokenize;

/// Config file name looked up inside the config root
pub const CONFIG_FILE: &str = "deploy.toml";

/// Deploy your project via rsync
#[derive(Parser, Debug)]
#[command(name = "rsync-deploy")]
#[command(version)]
#[command(about = "Deploy your project via rsync")]
pub struct Cli {
    /// Directory holding deploy.toml and the rsync_exclude files
    #[arg(long, global = true, default_value = "config")]
    pub config_root: PathBuf,

    /// Config file (default: <config-root>/deploy.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy your project via rsync
    #[command(name = "project:deploy")]
    Deploy(DeployArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// The environment where you want to deploy the project
    pub env: String,

    /// Do the deployment
    #[arg(long)]
    pub go: bool,

    /// Options to pass to the rsync executable
    #[arg(long, allow_hyphen_values = true)]
    pub rsync_options: Option<String>,

    /// Force sync of vendor dir
    #[arg(long)]
    pub force_vendor: bool,
}

impl Cli {
    /// Config file path, defaulting to `<config-root>/deploy.toml`
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.config_root.join(CONFIG_FILE))
    }
}

/// What one invocation asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub environment: String,
    /// `false` runs rsync with `--dry-run` and skips post-deploy operations
    pub execute_for_real: bool,
    /// Tokens appended after the environment's rsync options
    pub extra_rsync_options: Option<Vec<String>>,
    pub force_vendor: bool,
}

impl DeployRequest {
    /// Create DeployRequest from CLI arguments
    pub fn from_args(args: DeployArgs) -> Self {
        let extra_rsync_options = args
            .rsync_options
            .as_deref()
            .map(tokenize)
            .filter(|tokens| !tokens.is_empty());

        Self {
            environment: args.env,
            execute_for_real: args.go,
            extra_rsync_options,
            force_vendor: args.force_vendor,
        }
    }
}
