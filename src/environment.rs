//! Deployment environments loaded from `deploy.toml`.
//!
//! Each `[environments.<name>]` table describes one target. Tables are kept
//! raw until looked up, so a malformed environment only fails the deploys
//! that select it.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::command::tokenize;
use crate::error::DeployError;

/// Options used when an environment does not set `rsync_options`
pub const DEFAULT_RSYNC_OPTIONS: &str = "-azC --force --delete --progress";

/// Validated connection and sync parameters for one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Remote login; `None` lets ssh pick the user from its own config
    pub user: Option<String>,
    /// Remote target directory
    pub dir: String,
    /// Default rsync option tokens
    pub rsync_options: Vec<String>,
    /// Per-process bound; `None` means unbounded
    pub timeout: Option<Duration>,
    pub post_deploy_operations: Vec<String>,
}

impl EnvironmentConfig {
    /// `user@host`, or just `host` when no user is configured
    pub fn remote(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEnvironment {
    host: Option<String>,
    port: Option<i64>,
    user: Option<String>,
    dir: Option<String>,
    rsync_options: Option<String>,
    #[serde(default)]
    timeout: i64,
    #[serde(default)]
    post_deploy_operations: Operations,
}

/// `post_deploy_operations` as either one command or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Operations {
    One(String),
    Many(Vec<String>),
}

impl Default for Operations {
    fn default() -> Self {
        Operations::Many(Vec::new())
    }
}

impl From<Operations> for Vec<String> {
    fn from(operations: Operations) -> Self {
        match operations {
            Operations::One(operation) => vec![operation],
            Operations::Many(operations) => operations,
        }
    }
}

/// All environments, in the order they appear in the config file
#[derive(Debug, Clone, Default)]
pub struct DeployConfig {
    environments: Vec<(String, toml::Value)>,
}

impl DeployConfig {
    /// Load environments from a TOML file
    pub fn load(path: &Path) -> Result<Self, DeployError> {
        let content = fs::read_to_string(path).map_err(|source| DeployError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content).map_err(|e| match e {
            DeployError::ConfigParse { message, .. } => DeployError::ConfigParse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Parse environments from TOML text
    pub fn parse(content: &str) -> Result<Self, DeployError> {
        let invalid = |message: String| DeployError::ConfigParse {
            path: None,
            message,
        };

        let mut table: toml::Table = content
            .parse()
            .map_err(|e: toml::de::Error| invalid(e.to_string()))?;

        let environments = match table.remove("environments") {
            Some(toml::Value::Table(envs)) => envs.into_iter().collect(),
            Some(_) => return Err(invalid("'environments' must be a table".to_string())),
            None => Vec::new(),
        };

        if let Some(key) = table.keys().next() {
            return Err(invalid(format!("unknown top-level key '{key}'")));
        }

        Ok(Self { environments })
    }

    /// Environment names in file order
    pub fn names(&self) -> Vec<String> {
        self.environments.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Look up and validate a single environment
    pub fn environment(&self, name: &str) -> Result<EnvironmentConfig, DeployError> {
        let value = self
            .environments
            .iter()
            .find(|(env, _)| env == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DeployError::UnknownEnvironment {
                name: name.to_string(),
                valid: self.names(),
            })?;

        let raw: RawEnvironment =
            value
                .try_into()
                .map_err(|e: toml::de::Error| DeployError::InvalidEnvironment {
                    env: name.to_string(),
                    message: e.message().to_string(),
                })?;

        let env = validate(name, raw)?;
        debug!(environment = %env.name, remote = %env.remote(), dir = %env.dir, "resolved environment");
        Ok(env)
    }
}

fn validate(name: &str, raw: RawEnvironment) -> Result<EnvironmentConfig, DeployError> {
    let invalid = |field: &'static str, reason: &str| DeployError::InvalidField {
        env: name.to_string(),
        field,
        reason: reason.to_string(),
    };
    let missing = |field: &'static str| DeployError::MissingField {
        env: name.to_string(),
        field,
    };

    let host = raw.host.ok_or_else(|| missing("host"))?;
    if host.trim().is_empty() {
        return Err(invalid("host", "must not be empty"));
    }

    let dir = raw.dir.ok_or_else(|| missing("dir"))?;
    if dir.trim().is_empty() {
        return Err(invalid("dir", "must not be empty"));
    }

    let port = raw.port.ok_or_else(|| missing("port"))?;
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| invalid("port", "must be between 1 and 65535"))?;

    let timeout = u64::try_from(raw.timeout)
        .map_err(|_| invalid("timeout", "must be zero or a positive number of seconds"))?;

    Ok(EnvironmentConfig {
        name: name.to_string(),
        host,
        port,
        user: raw.user.filter(|u| !u.is_empty()),
        dir,
        rsync_options: tokenize(raw.rsync_options.as_deref().unwrap_or(DEFAULT_RSYNC_OPTIONS)),
        timeout: (timeout > 0).then(|| Duration::from_secs(timeout)),
        post_deploy_operations: raw.post_deploy_operations.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[environments.staging]
host = "stg.example.com"
port = 22
user = "deploy"
dir = "/srv/app"
rsync_options = "-az --delete"
timeout = 0
post_deploy_operations = ["echo done"]

[environments.prod]
host = "example.com"
port = 2222
dir = "/var/www/app"
timeout = 120

[environments.broken]
host = "broken.example.com"
dir = "/srv"
"#;

    fn config() -> DeployConfig {
        DeployConfig::parse(CONFIG).unwrap()
    }

    // ==================== Lookup tests ====================

    #[test]
    fn test_environment_staging() {
        let env = config().environment("staging").unwrap();

        assert_eq!(env.name, "staging");
        assert_eq!(env.host, "stg.example.com");
        assert_eq!(env.port, 22);
        assert_eq!(env.user.as_deref(), Some("deploy"));
        assert_eq!(env.dir, "/srv/app");
        assert_eq!(env.rsync_options, vec!["-az", "--delete"]);
        assert_eq!(env.timeout, None);
        assert_eq!(env.post_deploy_operations, vec!["echo done"]);
    }

    #[test]
    fn test_environment_defaults() {
        let env = config().environment("prod").unwrap();

        assert_eq!(env.user, None);
        assert_eq!(env.rsync_options, tokenize(DEFAULT_RSYNC_OPTIONS));
        assert_eq!(env.timeout, Some(Duration::from_secs(120)));
        assert!(env.post_deploy_operations.is_empty());
    }

    #[test]
    fn test_unknown_environment_lists_names_in_file_order() {
        let err = config().environment("qa").unwrap_err();

        match err {
            DeployError::UnknownEnvironment { name, valid } => {
                assert_eq!(name, "qa");
                assert_eq!(valid, vec!["staging", "prod", "broken"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_file_order_preserved_when_not_alphabetical() {
        let config = DeployConfig::parse(
            "[environments.zeta]\nhost='z'\nport=22\ndir='/z'\n\
             [environments.alpha]\nhost='a'\nport=22\ndir='/a'\n",
        )
        .unwrap();

        assert_eq!(config.names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_empty_config_has_no_environments() {
        let config = DeployConfig::parse("").unwrap();
        let err = config.environment("staging").unwrap_err();

        assert!(matches!(
            err,
            DeployError::UnknownEnvironment { ref valid, .. } if valid.is_empty()
        ));
    }

    // ==================== Validation tests ====================

    #[test]
    fn test_missing_port() {
        let err = config().environment("broken").unwrap_err();
        assert!(matches!(
            err,
            DeployError::MissingField { field: "port", .. }
        ));
    }

    #[test]
    fn test_broken_environment_does_not_affect_others() {
        assert!(config().environment("staging").is_ok());
    }

    #[test]
    fn test_missing_host() {
        let config = DeployConfig::parse("[environments.a]\nport = 22\ndir = '/srv'\n").unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(
            err,
            DeployError::MissingField { field: "host", .. }
        ));
    }

    #[test]
    fn test_missing_dir() {
        let config = DeployConfig::parse("[environments.a]\nhost = 'h'\nport = 22\n").unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(err, DeployError::MissingField { field: "dir", .. }));
    }

    #[test]
    fn test_port_out_of_range() {
        for port in ["0", "-1", "70000"] {
            let toml = format!("[environments.a]\nhost = 'h'\ndir = '/srv'\nport = {port}\n");
            let err = DeployConfig::parse(&toml)
                .unwrap()
                .environment("a")
                .unwrap_err();
            assert!(
                matches!(err, DeployError::InvalidField { field: "port", .. }),
                "port {port}: {err:?}"
            );
        }
    }

    #[test]
    fn test_port_wrong_type() {
        let config =
            DeployConfig::parse("[environments.a]\nhost = 'h'\ndir = '/srv'\nport = '22'\n")
                .unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(err, DeployError::InvalidEnvironment { .. }));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_negative_timeout() {
        let config = DeployConfig::parse(
            "[environments.a]\nhost = 'h'\ndir = '/srv'\nport = 22\ntimeout = -5\n",
        )
        .unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(
            err,
            DeployError::InvalidField { field: "timeout", .. }
        ));
    }

    #[test]
    fn test_empty_user_is_absent() {
        let config = DeployConfig::parse(
            "[environments.a]\nhost = 'h'\ndir = '/srv'\nport = 22\nuser = ''\n",
        )
        .unwrap();
        let env = config.environment("a").unwrap();
        assert_eq!(env.user, None);
        assert_eq!(env.remote(), "h");
    }

    #[test]
    fn test_single_post_deploy_operation_string() {
        let config = DeployConfig::parse(
            "[environments.a]\nhost = 'h'\ndir = '/srv'\nport = 22\npost_deploy_operations = 'echo done'\n",
        )
        .unwrap();
        let env = config.environment("a").unwrap();
        assert_eq!(env.post_deploy_operations, vec!["echo done"]);
    }

    #[test]
    fn test_post_deploy_operations_wrong_type() {
        let config = DeployConfig::parse(
            "[environments.a]\nhost = 'h'\ndir = '/srv'\nport = 22\npost_deploy_operations = 3\n",
        )
        .unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(err, DeployError::InvalidEnvironment { .. }));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let config = DeployConfig::parse(
            "[environments.a]\nhost = 'h'\ndir = '/srv'\nport = 22\npassword = 'x'\n",
        )
        .unwrap();
        let err = config.environment("a").unwrap_err();
        assert!(matches!(err, DeployError::InvalidEnvironment { .. }));
    }

    // ==================== Parse/load tests ====================

    #[test]
    fn test_parse_rejects_unknown_top_level_key() {
        let err = DeployConfig::parse("verbose = true\n").unwrap_err();
        assert!(matches!(
            err,
            DeployError::ConfigParse { path: None, ref message } if message.contains("verbose")
        ));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_parse_rejects_non_table_environments() {
        assert!(DeployConfig::parse("environments = 3\n").is_err());
    }

    #[test]
    fn test_parse_rejects_invalid_toml() {
        assert!(DeployConfig::parse("[environments.a\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deploy.toml");
        fs::write(&path, CONFIG).unwrap();

        let config = DeployConfig::load(&path).unwrap();
        assert_eq!(config.names(), vec!["staging", "prod", "broken"]);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = DeployConfig::load(&temp.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, DeployError::ConfigRead { .. }));
    }

    #[test]
    fn test_load_invalid_file_names_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("deploy.toml");
        fs::write(&path, "environments = [").unwrap();

        let err = DeployConfig::load(&path).unwrap_err();
        assert!(matches!(err, DeployError::ConfigParse { path: Some(_), .. }));
        assert!(err.to_string().contains("deploy.toml"));
    }
}
