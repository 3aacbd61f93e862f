//! ImageMagick backend: `convert` for GIF, `magick` for APNG.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use lapse_platform::process::ProcessRunner;

use super::{absolute, frame_delay_centis, run_tool, EncodeBackend, EncodeError, EncodeJob, OutputKind};
use crate::frames::FrameSet;

pub struct ImageMagickBackend {
    convert: Option<PathBuf>,
    magick: Option<PathBuf>,
    runner: Arc<dyn ProcessRunner>,
}

impl ImageMagickBackend {
    pub fn new(
        convert: Option<PathBuf>,
        magick: Option<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            convert,
            magick,
            runner,
        }
    }

    fn program_for(&self, kind: OutputKind) -> Option<&Path> {
        match kind {
            OutputKind::AnimatedImage => self.convert.as_deref(),
            OutputKind::RasterVideo => self.magick.as_deref(),
            _ => None,
        }
    }
}

/// Command line for encoding `frames` into `output`. The delay is in
/// ImageMagick's native unit, hundredths of a second; `-loop 0` loops forever.
pub fn imagemagick_args(kind: OutputKind, frame_rate: f64, frames: &FrameSet, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-delay".into(),
        frame_delay_centis(frame_rate).to_string(),
        "-loop".into(),
        "0".into(),
    ];
    args.extend(frames.to_args());

    let output = output.to_string_lossy();
    args.push(match kind {
        OutputKind::RasterVideo => format!("APNG:{}", output),
        _ => output.into_owned(),
    });
    args
}

#[async_trait]
impl EncodeBackend for ImageMagickBackend {
    fn name(&self) -> &'static str {
        "imagemagick"
    }

    fn supported_kinds(&self) -> Vec<OutputKind> {
        [OutputKind::AnimatedImage, OutputKind::RasterVideo]
            .into_iter()
            .filter(|kind| self.program_for(*kind).is_some())
            .collect()
    }

    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError> {
        let program = self
            .program_for(job.kind)
            .ok_or(EncodeError::UnsupportedKind {
                kind: job.kind,
                backend: self.name(),
            })?;

        let frames = job.frames()?;
        let output = absolute(&job.output_path())?;
        let cwd = absolute(&job.input_dir)?;

        let args = imagemagick_args(job.kind, job.frame_rate, &frames, &output);
        run_tool(self.runner.as_ref(), program, &args, &cwd).await?;
        Ok(output)
    }
}
