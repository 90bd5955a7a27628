//! Configuration management
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file, then
//! `TELEMETRY_QUERY__SECTION__FIELD` environment variables. The
//! conventional `CLOUDFLARE_ACCOUNT_ID` / `CLOUDFLARE_API_TOKEN` variables
//! fill in the account section when it is otherwise unset.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::context::AccountContext;
use crate::error::Result;
use crate::models::View;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "TELEMETRY_QUERY";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telemetry API configuration
    pub api: ApiConfig,

    /// Account to query
    pub account: AccountConfig,

    /// Defaults for queries built on the command line
    pub query: QueryDefaults,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path`, or from the platform config
    /// directory when no path is given
    ///
    /// An explicit path must exist; the platform default is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Self::default())?;

        let mut builder = config::Config::builder().add_source(defaults);
        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => match default_config_path() {
                Some(path) => builder.add_source(config::File::from(path).required(false)),
                None => builder,
            },
        };

        let mut config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.account.fill_from_env();
        Ok(config)
    }
}

/// `<config dir>/telemetry-query/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "telemetry-query", "telemetry-query")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Telemetry API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API root; account and endpoint segments are appended
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudflare.com/client/v4".to_string(),
            timeout_secs: 30,
            user_agent: concat!("telemetry-query/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Account configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Active account id
    pub account_id: Option<String>,
    /// API token
    pub api_token: Option<String>,
}

impl AccountConfig {
    fn fill_from_env(&mut self) {
        if self.account_id.is_none() {
            self.account_id = std::env::var("CLOUDFLARE_ACCOUNT_ID").ok();
        }
        if self.api_token.is_none() {
            self.api_token = std::env::var("CLOUDFLARE_API_TOKEN").ok();
        }
    }

    /// The active account, if an account id is configured
    ///
    /// A missing token yields an empty bearer token; the backend will
    /// reject it, which surfaces as a transmission error.
    pub fn context(&self) -> Option<AccountContext> {
        let account_id = self.account_id.as_deref().filter(|id| !id.trim().is_empty())?;
        Some(AccountContext::new(
            account_id,
            self.api_token.clone().unwrap_or_default(),
        ))
    }
}

/// Defaults for command-line queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDefaults {
    /// View used when `--view` is not given
    pub view: View,
    /// Window used when `--last` is not given (humantime syntax)
    pub last: String,
    /// Datasets to search
    pub datasets: Vec<String>,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        Self {
            view: View::default(),
            last: "1h".to_string(),
            datasets: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.query.view, View::Calculations);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[api]
base_url = "http://localhost:9999/client/v4"

[account]
account_id = "from-file"
api_token = "file-token"

[query]
view = "events"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:9999/client/v4");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.query.view, View::Events);

        let ctx = config.account.context().unwrap();
        assert_eq!(ctx.account_id, "from-file");
        assert_eq!(ctx.api_token, "file-token");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/telemetry-query.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_account_has_no_context() {
        let account = AccountConfig {
            account_id: Some(String::new()),
            api_token: Some("token".to_string()),
        };
        assert!(account.context().is_none());
    }
}
