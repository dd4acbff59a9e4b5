//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles environment detection, the
//! optional `<stem>.<env>.toml` override file and `TASKCHAIN__*` variables.

use super::error::{ConfigResult, ConfigurationError};
use super::TaskchainConfig;
use crate::constants::{ENV_PREFIX, ENV_VAR_ENVIRONMENT};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Builder for a validated [`TaskchainConfig`]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    environment: String,
    env_overrides: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with environment auto-detection and env var overrides enabled
    pub fn new() -> Self {
        Self {
            file: None,
            environment: Self::detect_environment(),
            env_overrides: true,
        }
    }

    /// Base TOML file. It must exist; its environment override is optional.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Explicit environment, useful for tests that must not touch process env
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn without_env_overrides(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Load, merge and validate the configuration
    pub fn load(&self) -> ConfigResult<TaskchainConfig> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            if !path.is_file() {
                return Err(ConfigurationError::ConfigFileNotFound { path: path.clone() });
            }
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));

            let override_path = Self::override_path(path, &self.environment);
            debug!(
                environment = %self.environment,
                override_file = %override_path.display(),
                "Looking for environment override file"
            );
            builder = builder.add_source(
                File::from(override_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        if self.env_overrides {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: TaskchainConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            environment = %self.environment,
            config = %Self::sanitize_config_for_logging(&config),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Detect the deployment environment from `TASKCHAIN_ENV`
    pub fn detect_environment() -> String {
        std::env::var(ENV_VAR_ENVIRONMENT).unwrap_or_else(|_| "development".to_string())
    }

    /// `config/taskchain.toml` + `test` -> `config/taskchain.test.toml`
    pub fn override_path(path: &Path, environment: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{stem}.{environment}.toml"))
    }

    /// JSON view of the configuration with database credentials masked
    pub fn sanitize_config_for_logging(config: &TaskchainConfig) -> serde_json::Value {
        let mut value = serde_json::json!(config);
        if let Some(url) = value.pointer_mut("/database/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(Self::mask_url_credentials(raw));
            }
        }
        value
    }

    fn mask_url_credentials(url: &str) -> String {
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://[MASKED]{}", &url[..scheme_end], &url[at..])
            }
            _ => url.to_string(),
        }
    }
}
