//! Configuration for todolis

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::clock::WeekStart;
use crate::randomizer::RandomizerSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub randomizer: RandomizerConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded activity photos
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,

    /// Prefix of the URLs handed out for stored photos
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomizerConfig {
    #[serde(default = "default_roll_delay_ms")]
    pub roll_delay_ms: u64,

    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_min_activities")]
    pub min_activities: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub week_start: WeekStart,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Signed-in user, written by `login`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("todolis.sqlite")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("activity.images")
}

fn default_public_base_url() -> String {
    "file://activity.images".to_string()
}

fn default_roll_delay_ms() -> u64 {
    2000
}

fn default_stagger_ms() -> u64 {
    300
}

fn default_history_limit() -> usize {
    10
}

fn default_min_activities() -> usize {
    2
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for RandomizerConfig {
    fn default() -> Self {
        Self {
            roll_delay_ms: default_roll_delay_ms(),
            stagger_ms: default_stagger_ms(),
            history_limit: default_history_limit(),
            min_activities: default_min_activities(),
        }
    }
}

impl RandomizerConfig {
    pub fn settings(&self) -> RandomizerSettings {
        RandomizerSettings {
            roll_delay: Duration::from_millis(self.roll_delay_ms),
            stagger: Duration::from_millis(self.stagger_ms),
            history_limit: self.history_limit,
            min_activities: self.min_activities,
        }
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(env_path) = std::env::var("TODOLIS_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        let local = PathBuf::from("todolis.toml");
        if local.exists() {
            return Ok(local);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("todolis");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let with_comments = format!(
            "# todolis configuration\n\n\
             {}\n\
             # week_start may be \"monday\" or \"sunday\"\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }
}
