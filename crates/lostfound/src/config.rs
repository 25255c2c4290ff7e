//! Layered configuration: defaults, optional TOML file, then environment.

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::backend::DEFAULT_SUBSCRIPTION_BUFFER;
use crate::messaging::{DEFAULT_HISTORY_LIMIT, MAX_FEED_LIMIT, SEARCH_HISTORY_LIMIT};

pub const APP_NAME: &str = "lostfound";

const DATABASE_FILE: &str = "lostfound.db";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when neither `RUST_LOG` nor a verbosity flag is given.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `lostfound.db` in the data directory.
    pub path: Option<String>,
}

/// Page sizes and channel capacity for the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub history_limit: usize,
    pub feed_limit: usize,
    pub search_history_limit: usize,
    pub subscription_buffer: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            feed_limit: MAX_FEED_LIMIT,
            search_history_limit: SEARCH_HISTORY_LIMIT,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve the config file (`--config` may name a file or a directory)
    /// and the data directory.
    pub fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
        })
    }

    pub fn database_file(&self, cfg: &AppConfig) -> Result<PathBuf> {
        match cfg.database.path {
            Some(ref path) => expand_str_path(path),
            None => Ok(self.data_dir.join(DATABASE_FILE)),
        }
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}",
            self.config_file.display(),
            self.data_dir.display()
        )
    }
}

/// Load configuration from `path` (missing file is fine) with `LOSTFOUND__*`
/// environment overrides.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    load_config_with_prefix(path, &env_prefix())
}

fn load_config_with_prefix(path: &Path, prefix: &str) -> Result<AppConfig> {
    let defaults = MessagingConfig::default();
    let built = Config::builder()
        .set_default("logging.level", "info")?
        .set_default("messaging.history_limit", defaults.history_limit as i64)?
        .set_default("messaging.feed_limit", defaults.feed_limit as i64)?
        .set_default(
            "messaging.search_history_limit",
            defaults.search_history_limit as i64,
        )?
        .set_default(
            "messaging.subscription_buffer",
            defaults.subscription_buffer as i64,
        )?
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("loading config from {}", path.display()))?;

    built
        .try_deserialize()
        .context("parsing configuration")
}

pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n\n",
        path.display()
    )
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::config_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::data_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME.to_ascii_uppercase()
}
