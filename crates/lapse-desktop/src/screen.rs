//! Screen capture over the host's monitors using `xcap`.
//! Grabs the monitor that holds the rectangle's origin and crops to the rectangle.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use image::RgbaImage;
use lapse_platform::screen::{DisplayInfo, Rect, ScreenCapture, ScreenFrame};
use xcap::Monitor;

/// Monitor-based screen capture
#[derive(Debug, Default)]
pub struct XcapScreenCapture;

impl XcapScreenCapture {
    pub fn new() -> Self {
        Self
    }
}

/// Create the screen capture implementation for this host.
pub fn create_screen_capture() -> Result<Box<dyn ScreenCapture>> {
    tracing::info!("using xcap monitor capture");
    Ok(Box::new(XcapScreenCapture::new()))
}

fn list_displays() -> Result<Vec<DisplayInfo>> {
    let monitors = Monitor::all().context("failed to enumerate monitors")?;

    let mut displays = Vec::with_capacity(monitors.len());
    for (index, monitor) in monitors.iter().enumerate() {
        displays.push(describe(index, monitor)?);
    }
    Ok(displays)
}

fn describe(index: usize, monitor: &Monitor) -> Result<DisplayInfo> {
    Ok(DisplayInfo {
        index,
        name: monitor.name().unwrap_or_else(|_| format!("display {}", index)),
        bounds: Rect::new(
            monitor.x().context("monitor x")?,
            monitor.y().context("monitor y")?,
            monitor.width().context("monitor width")?,
            monitor.height().context("monitor height")?,
        ),
        is_primary: monitor.is_primary().unwrap_or(false),
    })
}

fn grab(rect: Rect) -> Result<ScreenFrame> {
    let monitors = Monitor::all().context("failed to enumerate monitors")?;

    for (index, monitor) in monitors.iter().enumerate() {
        let info = describe(index, monitor)?;
        if !info.bounds.contains_point(rect.x, rect.y) {
            continue;
        }

        let shot = monitor
            .capture_image()
            .with_context(|| format!("failed to capture {}", info.name))?;
        let (width, height) = (shot.width(), shot.height());
        let full = RgbaImage::from_raw(width, height, shot.into_raw())
            .context("monitor returned a truncated image")?;

        return crop_to_rect(&full, info.bounds, rect);
    }

    bail!(
        "no display contains point ({}, {})",
        rect.x, rect.y
    );
}

/// Crop a full-monitor capture down to `rect` (given in global coordinates).
/// Display bounds are logical; on scaled displays the capture holds more
/// physical pixels, and the crop keeps that resolution.
pub fn crop_to_rect(full: &RgbaImage, display: Rect, rect: Rect) -> Result<ScreenFrame> {
    if rect.width == 0 || rect.height == 0 {
        bail!("capture rectangle has zero width or height");
    }
    if display.width == 0 || display.height == 0 {
        bail!("display has zero width or height");
    }
    if !display.contains(&rect) {
        bail!(
            "capture rectangle ({},{} {}x{}) leaves display bounds ({},{} {}x{})",
            rect.x, rect.y, rect.width, rect.height,
            display.x, display.y, display.width, display.height
        );
    }

    let scale_x = full.width() as f64 / display.width as f64;
    let scale_y = full.height() as f64 / display.height as f64;
    let to_physical = |logical: i64, scale: f64, limit: u32| -> u32 {
        ((logical as f64 * scale).round() as i64).clamp(0, limit as i64) as u32
    };

    let offset_x = rect.x as i64 - display.x as i64;
    let offset_y = rect.y as i64 - display.y as i64;
    let left = to_physical(offset_x, scale_x, full.width());
    let top = to_physical(offset_y, scale_y, full.height());
    let right = to_physical(offset_x + rect.width as i64, scale_x, full.width());
    let bottom = to_physical(offset_y + rect.height as i64, scale_y, full.height());
    if right <= left || bottom <= top {
        bail!("capture rectangle is empty at this display's scale");
    }

    let cropped = image::imageops::crop_imm(full, left, top, right - left, bottom - top).to_image();
    let (width, height) = cropped.dimensions();

    Ok(ScreenFrame {
        width,
        height,
        stride: width * 4,
        data: cropped.into_raw(),
    })
}

#[async_trait]
impl ScreenCapture for XcapScreenCapture {
    async fn displays(&self) -> Result<Vec<DisplayInfo>> {
        tokio::task::spawn_blocking(list_displays)
            .await
            .context("display enumeration task failed")?
    }

    async fn capture_rect(&mut self, rect: Rect) -> Result<ScreenFrame> {
        tokio::task::spawn_blocking(move || grab(rect))
            .await
            .context("capture task failed")?
    }
}
