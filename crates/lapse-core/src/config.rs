use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encode::BackendPreference;
use crate::tools::ToolOverrides;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapseConfig {
    /// Encoder backend (auto, ffmpeg, imagemagick, apng)
    #[serde(default)]
    pub backend: BackendPreference,

    /// Explicit ffmpeg executable; looked up on PATH when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,

    /// Explicit ImageMagick `convert` executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convert_path: Option<String>,

    /// Explicit ImageMagick `magick` executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magick_path: Option<String>,

    /// Display index last recorded from
    #[serde(default)]
    pub record_display: usize,

    /// Seconds between frames
    #[serde(default = "default_record_frequency")]
    pub record_frequency_secs: f64,

    /// Directory frames are written to
    #[serde(default = "default_record_output")]
    pub record_output: PathBuf,

    /// Playback rate used when encoding
    #[serde(default = "default_encode_fps")]
    pub encode_fps: f64,
}

fn default_record_frequency() -> f64 {
    5.0
}
fn default_record_output() -> PathBuf {
    std::env::temp_dir()
}
fn default_encode_fps() -> f64 {
    5.0
}

impl Default for LapseConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::default(),
            ffmpeg_path: None,
            convert_path: None,
            magick_path: None,
            record_display: 0,
            record_frequency_secs: default_record_frequency(),
            record_output: default_record_output(),
            encode_fps: default_encode_fps(),
        }
    }
}

impl LapseConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("com", "lapse", "lapse") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("lapse-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn tool_overrides(&self) -> ToolOverrides {
        ToolOverrides {
            ffmpeg: self.ffmpeg_path.clone(),
            convert: self.convert_path.clone(),
            magick: self.magick_path.clone(),
        }
    }
}
