//! Configuration loading for skonrad-daemon.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use skonrad_core::DB_FILE_NAME;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub registry: Option<RegistryConfig>,
    pub indexing: Option<IndexingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RegistryConfig {
    /// Location of the shared directories database.
    pub database: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct IndexingConfig {
    /// Render video thumbnails for every file during directory init.
    pub preload_thumbnails: Option<bool>,
    /// Hours between full directory refreshes.
    pub refresh_period_hours: Option<u64>,
}

/// Default period of the consistency refresh (missed FS events recovery).
pub const DEFAULT_REFRESH_PERIOD_HOURS: u64 = 24;

impl Config {
    /// Path of the shared registry database.
    pub fn registry_db_path(&self) -> Result<PathBuf> {
        if let Some(path) = self
            .registry
            .as_ref()
            .and_then(|registry| registry.database.clone())
        {
            return Ok(path);
        }
        let dirs = ProjectDirs::from("", "", "skonrad")
            .context("could not determine config directory")?;
        Ok(dirs.config_dir().join(DB_FILE_NAME))
    }

    pub fn preload_thumbnails(&self) -> bool {
        self.indexing
            .as_ref()
            .and_then(|indexing| indexing.preload_thumbnails)
            .unwrap_or(false)
    }

    pub fn refresh_period(&self) -> Duration {
        let hours = self
            .indexing
            .as_ref()
            .and_then(|indexing| indexing.refresh_period_hours)
            .unwrap_or(DEFAULT_REFRESH_PERIOD_HOURS);
        Duration::from_secs(hours * 60 * 60)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "skonrad").context("could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("failed to parse config file as TOML")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(!config.preload_thumbnails());
        assert_eq!(
            config.refresh_period(),
            Duration::from_secs(DEFAULT_REFRESH_PERIOD_HOURS * 60 * 60)
        );
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [registry]
            database = "/tmp/skonrad-test/registry.db"

            [indexing]
            preload_thumbnails = true
            refresh_period_hours = 6
            "#,
        )
        .unwrap();

        assert_eq!(
            config.registry_db_path().unwrap(),
            PathBuf::from("/tmp/skonrad-test/registry.db")
        );
        assert!(config.preload_thumbnails());
        assert_eq!(config.refresh_period(), Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let config = load_config(Path::new("/nonexistent/skonrad.toml")).unwrap();
        assert!(!config.preload_thumbnails());
    }
}
