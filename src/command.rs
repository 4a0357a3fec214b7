//! Argument vectors for the sync and post-deploy phases.
//!
//! Everything here is pure: the same environment, request and exclude files
//! always produce the same tokens.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DeployRequest;
use crate::environment::EnvironmentConfig;

/// Sync executable
pub const RSYNC: &str = "rsync";

/// Remote shell executable
pub const SSH: &str = "ssh";

/// Source token; the trailing slash makes rsync copy directory contents
pub const SOURCE: &str = "./";

/// Token added by `--force-vendor`
pub const INCLUDE_VENDOR: &str = "--include=vendor";

/// A single subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    tokens: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a spec for `program` with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            tokens: vec![program.into()],
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.tokens.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Executable name
    #[inline]
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// Arguments after the executable
    #[inline]
    pub fn arguments(&self) -> &[String] {
        &self.tokens[1..]
    }

    /// All tokens, executable first
    #[inline]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[inline]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

/// Split an option string into tokens.
///
/// Any run of whitespace separates tokens and empty tokens are dropped.
/// Quotes and backslashes are ordinary characters, so an option value
/// cannot contain whitespace.
pub fn tokenize(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

/// Build the rsync invocation for an environment.
///
/// `excludes` must already be ordered global first, then per-environment.
pub fn build_sync_command(
    env: &EnvironmentConfig,
    request: &DeployRequest,
    excludes: &[PathBuf],
) -> CommandSpec {
    let mut spec = CommandSpec::new(RSYNC).timeout(env.timeout);

    if !request.execute_for_real {
        spec = spec.arg("--dry-run");
    }

    spec = spec.args(env.rsync_options.iter().cloned());

    // After the environment defaults so they win on conflicting flags
    if let Some(extra) = &request.extra_rsync_options {
        spec = spec.args(extra.iter().cloned());
    }

    if request.force_vendor {
        spec = spec.arg(INCLUDE_VENDOR);
    }

    for exclude in excludes {
        spec = spec.arg(format!("--exclude-from={}", exclude.display()));
    }

    spec.arg("-e")
        .arg(format!("{} -p {}", SSH, env.port))
        .arg(SOURCE)
        .arg(format!("{}:{}", env.remote(), env.dir))
}

/// Build the ssh invocation running post-deploy operations.
///
/// Returns `None` for dry runs and for environments without operations.
pub fn build_post_deploy_command(
    env: &EnvironmentConfig,
    request: &DeployRequest,
) -> Option<CommandSpec> {
    if !request.execute_for_real || env.post_deploy_operations.is_empty() {
        return None;
    }

    let mut spec = CommandSpec::new(SSH)
        .timeout(env.timeout)
        .arg(format!("-p {}", env.port))
        .arg(env.remote())
        .args(["cd", env.dir.as_str(), ";"]);

    for operation in &env.post_deploy_operations {
        spec = spec.args(tokenize(operation)).arg(";");
    }

    Some(spec)
}
