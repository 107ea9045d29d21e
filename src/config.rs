//! Preview Configuration
//! Handles saving and loading of the preview engine settings

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Render quantum default (frames per render call)
const DEFAULT_RENDER_QUANTUM: usize = 128;

/// Get config directory path
fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("snipwave"))
}

/// Get config file path
fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|p| p.join("config.json"))
}

/// Equalizer settings shared by every band
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerSettings {
    /// Q factor used by every peaking stage
    pub q: f32,
    /// Lowest band gain (dB)
    pub gain_min_db: f32,
    /// Highest band gain (dB)
    pub gain_max_db: f32,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            q: 1.0,
            gain_min_db: -12.0,
            gain_max_db: 12.0,
        }
    }
}

/// Silence detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceSettings {
    /// Number of memoized results kept
    pub cache_capacity: usize,
    /// Entries dropped at once when the cache is full
    pub evict_batch: usize,
    /// Upper bound on envelope points evaluated per scan
    pub max_scan_points: usize,
    /// Quiet period before a slider sweep result is propagated
    pub debounce_ms: u64,
}

impl Default for SilenceSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 25,
            evict_batch: 5,
            max_scan_points: 4000,
            debounce_ms: 40,
        }
    }
}

/// Complete preview configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Config version (for future migrations)
    pub version: u32,
    /// Audio context sample rate
    pub sample_rate: f64,
    /// Frames rendered per pull
    pub render_quantum: usize,
    /// Maximum nodes a single audio context may hold
    pub max_nodes: usize,
    /// Display refresh interval used by the threaded frame scheduler
    pub frame_interval_ms: u64,
    /// Samples kept by the analyser tap
    pub analyser_fft_size: usize,
    /// Upper bound for the master gain (2.0 = 200%)
    pub master_volume_max: f32,
    pub equalizer: EqualizerSettings,
    pub silence: SilenceSettings,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            version: 1,
            sample_rate: 48000.0,
            render_quantum: DEFAULT_RENDER_QUANTUM,
            max_nodes: 64,
            frame_interval_ms: 16,
            analyser_fft_size: 2048,
            master_volume_max: 2.0,
            equalizer: EqualizerSettings::default(),
            silence: SilenceSettings::default(),
        }
    }
}

impl PreviewConfig {
    /// Load configuration from the user config directory
    pub fn load() -> Self {
        match get_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                log::info!("[Config] Could not determine config path, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("[Config] No config file found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<PreviewConfig>(&content) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    log::warn!("[Config] Failed to parse config: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("[Config] Failed to read config: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the user config directory
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create directory if needed
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        log::info!("[Config] Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = PreviewConfig::default();
        config.sample_rate = 44100.0;
        config.silence.cache_capacity = 10;
        config.save_to(&path).unwrap();

        let loaded = PreviewConfig::load_from(&path);
        assert_eq!(loaded.sample_rate, 44100.0);
        assert_eq!(loaded.silence.cache_capacity, 10);
        assert_eq!(loaded.equalizer.gain_max_db, 12.0);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_nodes": 8 }"#).unwrap();

        let loaded = PreviewConfig::load_from(&path);
        assert_eq!(loaded.max_nodes, 8);
        assert_eq!(loaded.render_quantum, DEFAULT_RENDER_QUANTUM);
        assert_eq!(loaded.silence.evict_batch, 5);
    }

    #[test]
    fn test_garbage_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();

        let loaded = PreviewConfig::load_from(&path);
        assert_eq!(loaded.max_nodes, PreviewConfig::default().max_nodes);
    }
}
