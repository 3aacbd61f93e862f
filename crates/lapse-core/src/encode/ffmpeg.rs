//! ffmpeg backend: one invocation per job, frames fed through the concat protocol.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use lapse_platform::process::ProcessRunner;

use super::{absolute, run_tool, EncodeBackend, EncodeError, EncodeJob, OutputKind};
use crate::frames::FrameSet;

/// GIF palette filter: build a palette from every frame, then map onto it
const GIF_FILTER: &str = "split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse";

pub struct FfmpegBackend {
    program: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl FfmpegBackend {
    pub fn new(program: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { program, runner }
    }
}

/// Command line for encoding `frames` into `output`
pub fn ffmpeg_args(kind: OutputKind, frame_rate: f64, frames: &FrameSet, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-framerate".into(),
        frame_rate.to_string(),
        "-i".into(),
        format!("concat:{}", frames.to_args().join("|")),
    ];

    let codec: &[&str] = match kind {
        OutputKind::LossyVideo => &["-c:v", "libvpx", "-b:v", "2M", "-crf", "10", "-f", "webm"],
        OutputKind::AnimatedImage => &["-filter_complex", GIF_FILTER, "-f", "gif"],
        OutputKind::HighQualityVideo => &[
            "-c:v", "libx264", "-crf", "0", "-preset", "veryslow", "-f", "mp4",
        ],
        OutputKind::RasterVideo => &["-f", "apng"],
    };
    args.extend(codec.iter().map(|s| s.to_string()));

    args.push(output.to_string_lossy().into_owned());
    args
}

#[async_trait]
impl EncodeBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn supported_kinds(&self) -> Vec<OutputKind> {
        OutputKind::ALL.to_vec()
    }

    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError> {
        let frames = job.frames()?;
        let output = absolute(&job.output_path())?;
        let cwd = absolute(&job.input_dir)?;

        let args = ffmpeg_args(job.kind, job.frame_rate, &frames, &output);
        run_tool(self.runner.as_ref(), &self.program, &args, &cwd).await?;
        Ok(output)
    }
}
