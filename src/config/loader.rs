//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate, lowest precedence
//! first:
//!
//! 1. Built-in defaults ([`PipelineConfig::default`])
//! 2. TOML file at `PIPELINE_CONFIG_PATH`, else `config/pipeline.toml` if present
//! 3. `PIPELINE__<SECTION>__<KEY>` environment variables
//! 4. Legacy deployment variables: `RABBITMQ_HOST`, `RABBITMQ_USER`,
//!    `RABBITMQ_PASSWORD`, `DATABASE_URL`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::PipelineConfig;

/// File read when `PIPELINE_CONFIG_PATH` is unset; optional
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

const LEGACY_OVERRIDES: [(&str, &str); 4] = [
    ("RABBITMQ_HOST", "broker.host"),
    ("RABBITMQ_USER", "broker.username"),
    ("RABBITMQ_PASSWORD", "broker.password"),
    ("DATABASE_URL", "database.url"),
];

/// Builds a validated [`PipelineConfig`] from files and environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env: HashMap<String, String>,
}

impl ConfigLoader {
    /// Loader over the process environment
    pub fn from_env() -> Self {
        Self::with_env(std::env::vars().collect())
    }

    /// Loader over an explicit variable map; keeps tests off the process environment
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self { path: None, env }
    }

    /// Read this file instead of `PIPELINE_CONFIG_PATH` / the default path
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Load configuration from the process environment
    pub fn load() -> ConfigResult<PipelineConfig> {
        Self::from_env().build()
    }

    pub fn build(&self) -> ConfigResult<PipelineConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&PipelineConfig::default())?);

        let explicit = self
            .path
            .clone()
            .or_else(|| self.env.get("PIPELINE_CONFIG_PATH").map(PathBuf::from));
        builder = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigurationError::ConfigFileNotFound { path });
                }
                debug!(path = %path.display(), "Loading configuration file");
                builder.add_source(File::from(path).format(FileFormat::Toml).required(true))
            }
            None => builder.add_source(
                File::from(Path::new(DEFAULT_CONFIG_PATH))
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            Environment::with_prefix("PIPELINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(self.env.clone().into_iter().collect())),
        );

        for (variable, key) in LEGACY_OVERRIDES {
            builder = builder.set_override_option(key, self.env.get(variable).cloned())?;
        }

        let config: PipelineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(config = %config.sanitized(), "Configuration loaded");
        Ok(config)
    }
}
