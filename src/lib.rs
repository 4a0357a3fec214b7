//! # rsync-deploy
//!
//! Deploys a project to a named environment: an rsync sync phase over ssh,
//! followed by optional post-deploy commands run through a single ssh
//! session.
//!
//! ## Features
//!
//! - Environments loaded from `deploy.toml`, looked up by name
//! - Dry run by default, real transfer with `--go`
//! - Global and per-environment rsync exclude files
//! - Line-streamed child output with per-process timeouts
//!
//! ## Usage
//!
//! ```ignore
//! use rsync_deploy::deployer::Deployer;
//! use rsync_deploy::environment::DeployConfig;
//! use rsync_deploy::runner::ProcessRunner;
//!
//! let config = DeployConfig::load(&config_root.join("deploy.toml"))?;
//! let mut deployer = Deployer::new(&config_root, ProcessRunner, std::io::stdout());
//! let report = deployer.deploy(&config, &request)?;
//! ```

/// Sync and post-deploy command synthesis
pub mod command;

/// CLI arguments and deploy requests
pub mod config;

/// Deployment orchestration
pub mod deployer;

/// Deployment environment configuration
pub mod environment;

/// Error types for deployment operations
pub mod error;

/// Exclude file discovery
pub mod excludes;

/// Child process execution with streamed output
pub mod runner;
