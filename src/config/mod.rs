//! Configuration management for vocab-drill

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::auth::UserProfile;
use crate::sync::SyncSettings;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signed-in learner, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Copied onto the remote document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Base URL of the remote document store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Directory holding `book{N}.json` vocabulary files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_dir: Option<PathBuf>,

    /// Sync timing
    pub sync: SyncSettings,
}

impl Config {
    /// Load configuration from disk, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            serde_json::from_str(&contents).with_context(|| "Failed to parse config.json")
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let contents =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "vocab-drill")
            .context("Failed to determine config directory")?;
        Ok(proj_dirs.config_dir().join("config.json"))
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "vocab-drill")
            .context("Failed to determine data directory")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// Directory of the local progress store
    pub fn store_dir() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("store"))
    }

    /// Profile sent with synced progress, if any detail is configured
    pub fn profile(&self) -> Option<UserProfile> {
        if self.email.is_none() && self.display_name.is_none() {
            return None;
        }
        Some(UserProfile { email: self.email.clone(), display_name: self.display_name.clone() })
    }

    /// Vocabulary directory, configured or the default under the data directory
    pub fn content_dir(&self) -> Result<PathBuf> {
        match &self.content_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::data_dir()?.join("content")),
        }
    }
}
