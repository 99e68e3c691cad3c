use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use crate::error::StudyError;
use crate::network::Reachability;

pub const CONFIG_FILE_NAME: &str = "config.json";

const ENV_API_URL: &str = "STUDYSYNC_API_URL";
const ENV_DATA_DIR: &str = "STUDYSYNC_DATA_DIR";
const ENV_DEBUG: &str = "STUDYSYNC_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub api_url: String,
    /// Minted on first start and kept for the life of the installation.
    pub device_id: String,
    /// Ceiling for the upload directory before eviction kicks in.
    pub max_upload_bytes: u64,
    /// Extensions the upload pass picks up.
    pub upload_extensions: Vec<String>,
    /// Only files with this extension are ever evicted.
    pub evictable_extension: String,
    pub temp_dir_name: String,
    pub min_timer_seconds: u64,
    /// Wake interval when nothing else is pending.
    pub idle_wake_seconds: u64,
    pub request_timeout_secs: u64,
    /// Reachability assumed until a platform monitor reports otherwise.
    pub default_reachability: Reachability,
    #[serde(skip)]
    pub debug: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "https://studies.example.org".into(),
            device_id: String::new(),
            max_upload_bytes: 250 * 1024 * 1024,
            upload_extensions: vec!["csv".into(), "wav".into(), "mp4".into()],
            evictable_extension: "csv".into(),
            temp_dir_name: "tmp".into(),
            min_timer_seconds: 1,
            idle_wake_seconds: 60 * 60,
            request_timeout_secs: 60,
            default_reachability: Reachability::Wifi,
            debug: false,
        }
    }
}

impl AppConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            if !url.trim().is_empty() {
                self.api_url = url.trim().to_string();
            }
        }
        self.debug = std::env::var(ENV_DEBUG)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    }
}

/// Resolve the data directory from `STUDYSYNC_DATA_DIR`, falling back to
/// `./studysync-data`.
pub fn data_dir_from_env() -> PathBuf {
    std::env::var(ENV_DATA_DIR)
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("studysync-data"))
}

pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<AppConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                let err = StudyError::Config(format!("malformed {}: {err}", path.display()));
                warn!("{err}; using defaults");
                AppConfig::default()
            })
        } else {
            AppConfig::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> AppConfig {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update<F>(&self, change: F) -> Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        change(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialized)
            .with_context(|| format!("Failed to write config to {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("Failed to replace config at {}", self.path.display()))
    }
}
