//! Encoding backends: turn a directory of frames into one animation file.

pub mod apng;
pub mod ffmpeg;
pub mod imagemagick;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use lapse_platform::process::ProcessRunner;

use crate::frames::FrameSet;
use crate::tools::ToolPaths;

pub use self::apng::IntegratedBackend;
pub use self::ffmpeg::FfmpegBackend;
pub use self::imagemagick::ImageMagickBackend;

/// Longest stderr excerpt kept in a [`EncodeError::ToolFailed`]
const MAX_STDERR_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no frames found in input directory")]
    NoFrames,
    #[error("invalid frame rate: {0}")]
    InvalidFrameRate(f64),
    #[error("{backend} backend cannot produce {kind}")]
    UnsupportedKind { kind: OutputKind, backend: &'static str },
    #[error("an encode job is already running")]
    Busy,
    #[error("{0} executable not found")]
    ToolNotFound(&'static str),
    #[error("failed to start {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("{program} exited with {}: {stderr}", exit_label(.status))]
    ToolFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("frame {index} is {actual_width}x{actual_height}, expected {width}x{height}")]
    FrameSizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("png encoding error: {0}")]
    Png(#[from] png::EncodingError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode worker failed: {0}")]
    Worker(String),
}

/// Requested artifact format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// Animated PNG
    RasterVideo,
    /// VP8 WebM
    LossyVideo,
    /// Lossless H.264 MP4
    HighQualityVideo,
    /// GIF
    AnimatedImage,
}

impl OutputKind {
    pub const ALL: [OutputKind; 4] = [
        OutputKind::LossyVideo,
        OutputKind::RasterVideo,
        OutputKind::AnimatedImage,
        OutputKind::HighQualityVideo,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            OutputKind::RasterVideo => "png",
            OutputKind::LossyVideo => "webm",
            OutputKind::HighQualityVideo => "mp4",
            OutputKind::AnimatedImage => "gif",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutputKind::RasterVideo => "raster-video",
            OutputKind::LossyVideo => "lossy-video",
            OutputKind::HighQualityVideo => "high-quality-video",
            OutputKind::AnimatedImage => "animated-image",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    /// Accepts the file extension (`gif`) or the descriptive name (`animated-image`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('.').to_ascii_lowercase();
        OutputKind::ALL
            .into_iter()
            .find(|k| k.extension() == s || k.name() == s)
            .ok_or_else(|| format!("unknown output kind {:?} (expected png, webm, mp4 or gif)", s))
    }
}

/// One encode request
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub input_dir: PathBuf,
    /// Output path without extension; the kind's extension is appended
    pub output_base: PathBuf,
    pub kind: OutputKind,
    pub frame_rate: f64,
}

impl EncodeJob {
    pub fn output_path(&self) -> PathBuf {
        let mut path = self.output_base.clone().into_os_string();
        path.push(".");
        path.push(self.kind.extension());
        PathBuf::from(path)
    }

    /// Validate the frame rate and read the frames. Every backend calls this
    /// before doing any work.
    pub fn frames(&self) -> Result<FrameSet, EncodeError> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(EncodeError::InvalidFrameRate(self.frame_rate));
        }
        let frames = FrameSet::load(&self.input_dir)?;
        if frames.is_empty() {
            return Err(EncodeError::NoFrames);
        }
        debug!("{} frames in {}", frames.len(), self.input_dir.display());
        Ok(frames)
    }
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Per-frame delay in hundredths of a second
pub fn frame_delay_centis(frame_rate: f64) -> u16 {
    (100.0 / frame_rate).round().clamp(0.0, u16::MAX as f64) as u16
}

#[async_trait]
pub trait EncodeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn supported_kinds(&self) -> Vec<OutputKind>;

    fn supports(&self, kind: OutputKind) -> bool {
        self.supported_kinds().contains(&kind)
    }

    /// Produce the artifact for `job`, returning its path
    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError>;
}

/// Which backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Ffmpeg,
    ImageMagick,
    #[serde(rename = "apng")]
    Integrated,
}

impl FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ffmpeg" => Ok(Self::Ffmpeg),
            "imagemagick" => Ok(Self::ImageMagick),
            "apng" | "integrated" => Ok(Self::Integrated),
            other => Err(format!(
                "unknown backend {:?} (expected auto, ffmpeg, imagemagick or apng)",
                other
            )),
        }
    }
}

/// Build the backend for `preference`. `Auto` prefers ffmpeg, then
/// ImageMagick, then the integrated APNG writer.
pub fn select_backend(
    preference: BackendPreference,
    tools: &ToolPaths,
    runner: Arc<dyn ProcessRunner>,
) -> Result<Arc<dyn EncodeBackend>, EncodeError> {
    let backend: Arc<dyn EncodeBackend> = match preference {
        BackendPreference::Auto => {
            if let Some(ffmpeg) = &tools.ffmpeg {
                Arc::new(FfmpegBackend::new(ffmpeg.clone(), runner))
            } else if tools.has_imagemagick() {
                Arc::new(ImageMagickBackend::new(
                    tools.convert.clone(),
                    tools.magick.clone(),
                    runner,
                ))
            } else {
                Arc::new(IntegratedBackend::new())
            }
        }
        BackendPreference::Ffmpeg => {
            let ffmpeg = tools
                .ffmpeg
                .clone()
                .ok_or(EncodeError::ToolNotFound(crate::tools::FFMPEG))?;
            Arc::new(FfmpegBackend::new(ffmpeg, runner))
        }
        BackendPreference::ImageMagick => {
            if !tools.has_imagemagick() {
                return Err(EncodeError::ToolNotFound("imagemagick"));
            }
            Arc::new(ImageMagickBackend::new(
                tools.convert.clone(),
                tools.magick.clone(),
                runner,
            ))
        }
        BackendPreference::Integrated => Arc::new(IntegratedBackend::new()),
    };

    info!(
        "selected {} backend ({:?}), kinds: {:?}",
        backend.name(),
        preference,
        backend.supported_kinds()
    );
    Ok(backend)
}

/// Make `path` absolute against the current directory. External tools run
/// inside the input directory, so relative paths would resolve there.
pub(crate) fn absolute(path: &Path) -> Result<PathBuf, EncodeError> {
    Ok(std::path::absolute(path)?)
}

/// Run an external tool and map its failure modes onto [`EncodeError`]
pub(crate) async fn run_tool(
    runner: &dyn ProcessRunner,
    program: &Path,
    args: &[String],
    cwd: &Path,
) -> Result<(), EncodeError> {
    let name = program.display().to_string();
    info!("running {} with {} arguments", name, args.len());

    let output = runner
        .run(program, args, cwd)
        .await
        .map_err(|e| EncodeError::Spawn {
            program: name.clone(),
            message: format!("{:#}", e),
        })?;

    if !output.success {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        // ffmpeg prints its banner first; the tail holds the actual error
        let skip = stderr.chars().count().saturating_sub(MAX_STDERR_CHARS);
        return Err(EncodeError::ToolFailed {
            program: name,
            status: output.status,
            stderr: stderr.chars().skip(skip).collect(),
        });
    }

    debug!("{} finished", name);
    Ok(())
}
