//! In-process animated PNG writer; needs no external tools.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use image::RgbaImage;
use tracing::{debug, info};

use super::{frame_delay_centis, EncodeBackend, EncodeError, EncodeJob, OutputKind};
use crate::frames::FrameSet;

/// Frame delays are expressed as `numerator / DELAY_DENOMINATOR` seconds
pub const DELAY_DENOMINATOR: u16 = 100;

/// One animation entry
pub struct ApngFrame {
    pub image: RgbaImage,
    pub delay_num: u16,
    pub delay_den: u16,
}

/// All frames of an animation, ready to serialize
pub struct Animation {
    pub width: u32,
    pub height: u32,
    pub frames: Vec<ApngFrame>,
}

impl Animation {
    /// Build one entry per image. All images must match the first one's size.
    pub fn assemble(images: Vec<RgbaImage>, frame_rate: f64) -> Result<Self, EncodeError> {
        let (width, height) = images
            .first()
            .map(|img| img.dimensions())
            .ok_or(EncodeError::NoFrames)?;
        let delay_num = frame_delay_centis(frame_rate);

        let mut frames = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            let (actual_width, actual_height) = image.dimensions();
            if (actual_width, actual_height) != (width, height) {
                return Err(EncodeError::FrameSizeMismatch {
                    index,
                    width,
                    height,
                    actual_width,
                    actual_height,
                });
            }
            frames.push(ApngFrame {
                image,
                delay_num,
                delay_den: DELAY_DENOMINATOR,
            });
        }

        Ok(Self {
            width,
            height,
            frames,
        })
    }

    /// Serialize as an endlessly looping APNG
    pub fn write_to<W: Write>(&self, out: W) -> Result<(), EncodeError> {
        let mut encoder = png::Encoder::new(out, self.width, self.height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_animated(self.frames.len() as u32, 0)?;

        let mut writer = encoder.write_header()?;
        for frame in &self.frames {
            writer.set_frame_delay(frame.delay_num, frame.delay_den)?;
            writer.write_image_data(frame.image.as_raw())?;
        }
        writer.finish()?;
        Ok(())
    }
}

/// Decode every frame in order; the first failure aborts
pub fn decode_frames(frames: &FrameSet) -> Result<Vec<RgbaImage>, EncodeError> {
    frames
        .paths()
        .iter()
        .map(|path| {
            debug!("decoding {}", path.display());
            Ok(image::open(path)?.to_rgba8())
        })
        .collect()
}

fn encode_blocking(frames: FrameSet, frame_rate: f64, output: PathBuf) -> Result<PathBuf, EncodeError> {
    let images = decode_frames(&frames)?;
    let animation = Animation::assemble(images, frame_rate)?;

    let file = File::create(&output)?;
    let mut out = BufWriter::new(file);
    animation.write_to(&mut out)?;
    out.flush()?;

    info!(
        "wrote {} ({} frames, {}x{})",
        output.display(),
        animation.frames.len(),
        animation.width,
        animation.height
    );
    Ok(output)
}

#[derive(Debug, Default)]
pub struct IntegratedBackend;

impl IntegratedBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EncodeBackend for IntegratedBackend {
    fn name(&self) -> &'static str {
        "apng"
    }

    fn supported_kinds(&self) -> Vec<OutputKind> {
        vec![OutputKind::RasterVideo]
    }

    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError> {
        if job.kind != OutputKind::RasterVideo {
            return Err(EncodeError::UnsupportedKind {
                kind: job.kind,
                backend: self.name(),
            });
        }

        let frames = job.frames()?;
        let output = job.output_path();
        let frame_rate = job.frame_rate;

        tokio::task::spawn_blocking(move || encode_blocking(frames, frame_rate, output))
            .await
            .map_err(|e| EncodeError::Worker(e.to_string()))?
    }
}
