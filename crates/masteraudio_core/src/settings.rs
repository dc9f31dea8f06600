//! Persistent Output Policy
//!
//! The policy the stream factory consults when it picks an output format.
//!
//! # Storage Locations
//! - Linux: `~/.config/masteraudio/settings.json`
//! - Windows: `%APPDATA%\masteraudio\settings.json`
//! - macOS: `~/Library/Application Support/masteraudio/settings.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{EngineError, EngineResult};

/// Output policy lookups used during negotiation
pub trait PolicySource: Send + Sync {
    /// Encode multichannel PCM to AC3 for an S/PDIF or HDMI receiver
    fn ac3_encode(&self) -> bool;

    fn upmix(&self) -> bool;

    /// Takes precedence over upmix
    fn downmix(&self) -> bool;

    /// Force every PCM stream to this rate
    fn resample_rate(&self) -> Option<u32>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub ac3_encode: bool,
    pub upmix: bool,
    pub downmix: bool,
    pub resample_rate: Option<u32>,
    /// Tee every 16-bit PCM output into a WAV file
    pub dump_wav: bool,
    pub saved_at: Option<DateTime<Utc>>,
}

impl PolicySource for AudioSettings {
    fn ac3_encode(&self) -> bool {
        self.ac3_encode
    }

    fn upmix(&self) -> bool {
        self.upmix
    }

    fn downmix(&self) -> bool {
        self.downmix
    }

    fn resample_rate(&self) -> Option<u32> {
        self.resample_rate
    }
}

impl AudioSettings {
    /// Load settings from disk, or return default if missing/corrupt
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                info!("Using default settings");
                Self::default()
            }
        }
    }

    /// Load from an explicit path, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::File::open(path) {
            Ok(file) => match serde_json::from_reader(file) {
                Ok(settings) => {
                    info!("Settings loaded from {:?}", path);
                    return settings;
                }
                Err(e) => error!("Failed to parse settings file: {}", e),
            },
            Err(e) => error!("Failed to open settings file: {}", e),
        }
        info!("Using default settings");
        Self::default()
    }

    /// Save settings to disk
    pub fn save(&mut self) -> EngineResult<()> {
        let path = Self::config_path()
            .ok_or_else(|| EngineError::ConfigError("Could not determine config path".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&mut self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.saved_at = Some(Utc::now());
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Platform-specific configuration file path
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "masteraudio", "masteraudio")
            .map(|proj| proj.config_dir().join("settings.json"))
    }
}

/// Settings shared between the manager and whatever edits them
///
/// Changes apply to streams opened afterwards.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings(Arc<RwLock<AudioSettings>>);

impl SharedSettings {
    pub fn new(settings: AudioSettings) -> Self {
        Self(Arc::new(RwLock::new(settings)))
    }

    pub fn snapshot(&self) -> AudioSettings {
        self.0.read().clone()
    }

    pub fn update<F: FnOnce(&mut AudioSettings)>(&self, f: F) {
        f(&mut self.0.write());
    }
}

impl PolicySource for SharedSettings {
    fn ac3_encode(&self) -> bool {
        self.0.read().ac3_encode
    }

    fn upmix(&self) -> bool {
        self.0.read().upmix
    }

    fn downmix(&self) -> bool {
        self.0.read().downmix
    }

    fn resample_rate(&self) -> Option<u32> {
        self.0.read().resample_rate
    }
}
