use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::session::KeyboardLayout;
use crate::session_machine::MachineSettings;

/// User preferences, stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub keyboard_layout: KeyboardLayout,
    /// Seconds without a keystroke before a session pauses itself
    pub inactivity_timeout_secs: u64,
    pub auto_save_interval_secs: u64,
    pub metrics_tick_ms: u64,
    /// Requested content length in characters
    pub target_length: usize,
    pub language: String,
    pub default_theme: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keyboard_layout: KeyboardLayout::Qwerty,
            inactivity_timeout_secs: 10,
            auto_save_interval_secs: 30,
            metrics_tick_ms: 1000,
            target_length: 300,
            language: "en".to_string(),
            default_theme: "general".to_string(),
        }
    }
}

/// Longest timer a config file can ask for; larger values are clamped.
pub const MAX_TIMER_SECS: u64 = 24 * 60 * 60;

impl From<&Config> for MachineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            inactivity_timeout: clamped_secs(cfg.inactivity_timeout_secs),
            auto_save_interval: clamped_secs(cfg.auto_save_interval_secs),
            metrics_tick: chrono::Duration::milliseconds(
                cfg.metrics_tick_ms.min(MAX_TIMER_SECS * 1000) as i64,
            ),
        }
    }
}

fn clamped_secs(secs: u64) -> chrono::Duration {
    if secs > MAX_TIMER_SECS {
        tracing::warn!("timer of {secs}s clamped to {MAX_TIMER_SECS}s");
    }
    chrono::Duration::seconds(secs.min(MAX_TIMER_SECS) as i64)
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("themetype_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return Config::default(),
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("ignoring unreadable config {}: {e}", self.path.display());
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
