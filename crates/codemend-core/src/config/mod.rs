mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

/// Used when neither `--config` nor `CODEMEND_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting values are unusable.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first out-of-range setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.embedding_dimension == 0 {
            bail!("index.embedding_dimension must be positive");
        }
        if self.index.top_k == 0 {
            bail!("index.top_k must be positive");
        }
        if self.index.concurrency == 0 {
            bail!("index.concurrency must be positive");
        }
        if self.index.extensions.is_empty() {
            bail!("index.extensions must not be empty");
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            bail!("llm.temperature must be within 0.0..=1.0");
        }
        Ok(())
    }
}

/// Priority: `--config` argument > `CODEMEND_CONFIG` env > [`DEFAULT_CONFIG_PATH`].
#[must_use]
pub fn resolve_config_path(cli: Option<&Path>) -> PathBuf {
    if let Some(path) = cli {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("CODEMEND_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
