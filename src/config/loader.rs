//! Configuration Loader
//!
//! Layers configuration sources with the `config` crate, later sources winning:
//!
//! 1. compiled defaults
//! 2. `{dir}/consolidator.toml`
//! 3. `{dir}/consolidator.{environment}.toml`
//! 4. the file named by `CONSOLIDATOR_CONFIG_PATH`, if set
//! 5. `CONSOLIDATOR_*` environment variables, `__` separating nested keys
//!    (`CONSOLIDATOR_STORE__BACKEND=postgres`)

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::ConsolidatorConfig;
use crate::error::{ConsolidationError, Result};

const ENV_PREFIX: &str = "CONSOLIDATOR";
const CONFIG_PATH_VAR: &str = "CONSOLIDATOR_CONFIG_PATH";
const FILE_STEM: &str = "consolidator";
const SENSITIVE_KEYS: &[&str] = &["database_url", "password", "secret", "token"];

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_dir: Option<PathBuf>,
    environment: Option<String>,
    explicit_file: Option<PathBuf>,
    env_overrides: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_file = Some(path.into());
        self
    }

    /// Use these variables instead of the process environment
    ///
    /// Keys keep their `CONSOLIDATOR_` prefix. Tests use this to avoid
    /// mutating global state.
    pub fn with_env_overrides(mut self, vars: HashMap<String, String>) -> Self {
        self.env_overrides = Some(vars);
        self
    }

    pub fn load(&self) -> Result<ConsolidatorConfig> {
        let environment = self.resolve_environment();
        let config_dir = self.config_dir.clone().unwrap_or_else(|| PathBuf::from("config"));

        let defaults = Config::try_from(&ConsolidatorConfig::default()).map_err(config_error)?;
        let mut builder = Config::builder()
            .add_source(defaults)
            .add_source(toml_file(&config_dir.join(format!("{FILE_STEM}.toml")), false))
            .add_source(toml_file(
                &config_dir.join(format!("{FILE_STEM}.{environment}.toml")),
                false,
            ));

        if let Some(path) = self.resolve_explicit_file() {
            builder = builder.add_source(toml_file(&path, true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(self.env_overrides.clone()),
        );

        let mut loaded: ConsolidatorConfig = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)?;

        if loaded.environment.is_empty() {
            loaded.environment = environment;
        }
        loaded.validate()?;

        debug!(
            environment = %loaded.environment,
            config = %sanitized(&loaded),
            "Configuration loaded"
        );
        Ok(loaded)
    }

    fn resolve_environment(&self) -> String {
        if let Some(environment) = &self.environment {
            return environment.clone();
        }
        self.lookup_var("CONSOLIDATOR_ENV")
            .or_else(|| self.lookup_var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string())
    }

    fn resolve_explicit_file(&self) -> Option<PathBuf> {
        self.explicit_file
            .clone()
            .or_else(|| self.lookup_var(CONFIG_PATH_VAR).map(PathBuf::from))
    }

    fn lookup_var(&self, key: &str) -> Option<String> {
        match &self.env_overrides {
            Some(vars) => vars.get(key).cloned(),
            None => env::var(key).ok(),
        }
    }
}

fn toml_file(path: &Path, required: bool) -> File<config::FileSourceFile, FileFormat> {
    File::from(path).format(FileFormat::Toml).required(required)
}

fn config_error(err: config::ConfigError) -> ConsolidationError {
    ConsolidationError::configuration(err.to_string())
}

/// JSON rendition of the configuration with credentials masked
pub fn sanitized(config: &ConsolidatorConfig) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    mask_sensitive(&mut value);
    value
}

fn mask_sensitive(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                let key = key.to_lowercase();
                if SENSITIVE_KEYS.iter().any(|pattern| key.contains(pattern)) && !field.is_null() {
                    *field = serde_json::Value::String("***".to_string());
                } else {
                    mask_sensitive(field);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(mask_sensitive),
        _ => {}
    }
}
