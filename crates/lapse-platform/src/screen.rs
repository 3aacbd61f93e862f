use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rectangle in global display coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Whether `other` lies entirely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        other.x >= self.x
            && other.y >= self.y
            && other.x as i64 + other.width as i64 <= right
            && other.y as i64 + other.height as i64 <= bottom
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as i64) < self.x as i64 + self.width as i64
            && (y as i64) < self.y as i64 + self.height as i64
    }
}

/// A display attached to the host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub index: usize,
    pub name: String,
    pub bounds: Rect,
    pub is_primary: bool,
}

/// Raw screen frame data from a capture
pub struct ScreenFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Stride (bytes per row)
    pub stride: u32,
}

#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Enumerate the active displays, ordered by index
    async fn displays(&self) -> Result<Vec<DisplayInfo>>;

    /// Capture the given rectangle of the desktop
    async fn capture_rect(&mut self, rect: Rect) -> Result<ScreenFrame>;
}
