//! Discovery of the external encoders on this host.

use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

pub const FFMPEG: &str = "ffmpeg";
pub const CONVERT: &str = "convert";
pub const MAGICK: &str = "magick";

/// User-configured executable locations. Empty strings count as unset.
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub ffmpeg: Option<String>,
    pub convert: Option<String>,
    pub magick: Option<String>,
}

/// Resolved executables; `None` means the tool is unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ToolPaths {
    pub ffmpeg: Option<PathBuf>,
    pub convert: Option<PathBuf>,
    pub magick: Option<PathBuf>,
}

impl ToolPaths {
    /// Overrides win; anything unset is looked up on `PATH`.
    pub fn discover(overrides: &ToolOverrides) -> Self {
        Self::discover_with(overrides, |name| which::which(name).ok())
    }

    pub fn discover_with(
        overrides: &ToolOverrides,
        lookup: impl Fn(&str) -> Option<PathBuf>,
    ) -> Self {
        let paths = Self {
            ffmpeg: resolve(FFMPEG, overrides.ffmpeg.as_deref(), &lookup),
            convert: resolve(CONVERT, overrides.convert.as_deref(), &lookup),
            magick: resolve(MAGICK, overrides.magick.as_deref(), &lookup),
        };
        debug!("resolved tools: {:?}", paths);
        paths
    }

    pub fn has_imagemagick(&self) -> bool {
        self.convert.is_some() || self.magick.is_some()
    }
}

fn resolve(
    name: &str,
    user: Option<&str>,
    lookup: &impl Fn(&str) -> Option<PathBuf>,
) -> Option<PathBuf> {
    match user.map(str::trim).filter(|p| !p.is_empty()) {
        Some(path) => Some(PathBuf::from(path)),
        None => lookup(name),
    }
}
