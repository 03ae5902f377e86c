//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/studyweave/config.toml)
//! 3. Project config (.studyweave/config.toml)
//! 4. Environment variables (STUDYWEAVE_* prefix)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::Config;
use crate::types::{Result, StudyError};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with the full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // e.g. STUDYWEAVE_CLIENT_MODEL -> client.model
        figment = figment.merge(Env::prefixed("STUDYWEAVE_").split('_').lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| StudyError::Config(format!("configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only (plus defaults).
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| StudyError::Config(format!("configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Path to the global config file (~/.config/studyweave/config.toml)
    pub fn global_config_path() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("studyweave").join("config.toml"))
    }

    /// Path to the project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".studyweave/config.toml")
    }
}
