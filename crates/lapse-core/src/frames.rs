//! Frame files on disk: naming, writing and ordered discovery.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{ImageFormat, RgbaImage};
use tracing::debug;

/// Extension of captured frames
pub const FRAME_EXTENSION: &str = "png";

/// Files whose name starts with this prefix are never picked up as frames
pub const SKIP_PREFIX: char = 's';

/// Millisecond timestamps are zero-padded to this width so that name order
/// is time order.
const TIMESTAMP_WIDTH: usize = 13;

/// File name for a frame captured at `millis` since the epoch
pub fn frame_file_name(millis: u64) -> String {
    format!("{:0width$}.{}", millis, FRAME_EXTENSION, width = TIMESTAMP_WIDTH)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Writes frames into a single output directory.
pub struct FrameStore {
    dir: PathBuf,
    last_millis: Option<u64>,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_millis: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for the next frame. Timestamps never repeat or go backwards
    /// within one store, even if the clock does.
    pub fn next_frame_path(&mut self, now_millis: u64) -> PathBuf {
        let millis = match self.last_millis {
            Some(last) if now_millis <= last => last + 1,
            _ => now_millis,
        };
        self.last_millis = Some(millis);
        self.dir.join(frame_file_name(millis))
    }

    /// Encode `image` as PNG and write it as the next frame.
    /// Returns the path written and its size in bytes.
    pub fn write_frame(&mut self, image: &RgbaImage) -> Result<(PathBuf, u64), image::ImageError> {
        let mut png_bytes: Vec<u8> = Vec::new();
        image.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)?;

        let path = self.next_frame_path(now_millis());
        std::fs::write(&path, &png_bytes)?;

        debug!("wrote frame {} ({} bytes)", path.display(), png_bytes.len());
        Ok((path, png_bytes.len() as u64))
    }
}

/// Ordered frames found in a directory
#[derive(Debug, Clone, Default)]
pub struct FrameSet {
    frames: Vec<PathBuf>,
}

impl FrameSet {
    /// Scan `dir` for frame files. The directory is re-read on every call.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let mut named = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_frame_name(&name) {
                named.push((name, entry.path()));
            }
        }

        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Self {
            frames: named.into_iter().map(|(_, path)| path).collect(),
        })
    }

    pub fn from_paths(frames: Vec<PathBuf>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.frames
    }

    /// Frame paths as strings, in order
    pub fn to_args(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }
}

fn is_frame_name(name: &str) -> bool {
    if name.starts_with(SKIP_PREFIX) {
        return false;
    }
    Path::new(name)
        .extension()
        .map(|ext| ext == FRAME_EXTENSION)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::scratch_dir;

    #[test]
    fn test_frame_file_name_is_padded() {
        assert_eq!(frame_file_name(1_700_000_000_123), "1700000000123.png");
        assert_eq!(frame_file_name(42), "0000000000042.png");
    }

    #[test]
    fn test_next_frame_path_strictly_increasing() {
        let mut store = FrameStore::new("/frames");
        let a = store.next_frame_path(1000);
        let b = store.next_frame_path(1000);
        let c = store.next_frame_path(999);
        let d = store.next_frame_path(5000);

        assert_eq!(a, PathBuf::from("/frames/0000000001000.png"));
        assert_eq!(b, PathBuf::from("/frames/0000000001001.png"));
        assert_eq!(c, PathBuf::from("/frames/0000000001002.png"));
        assert_eq!(d, PathBuf::from("/frames/0000000005000.png"));
    }

    #[test]
    fn test_write_frame_reports_file_size() {
        let dir = scratch_dir();
        let mut store = FrameStore::new(&dir);
        let image = RgbaImage::new(8, 4);

        let (path, size) = store.write_frame(&image).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), size);

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_frame_set_filters_and_sorts() {
        // extension match is case-sensitive: only lowercase .png frames count
        let dir = scratch_dir();
        for name in [
            "0000000000300.png",
            "0000000000100.png",
            "skip.png",
            "notes.txt",
            "0000000000200.png",
            "0000000000250.PNG",
        ] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.join("0000000000050.png")).unwrap();

        let set = FrameSet::load(&dir).unwrap();
        let names: Vec<_> = set
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["0000000000100.png", "0000000000200.png", "0000000000300.png"]
        );
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_frame_set_empty_dir() {
        let dir = scratch_dir();
        let set = FrameSet::load(&dir).unwrap();
        assert!(set.is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_frame_set_missing_dir_errors() {
        let dir = scratch_dir();
        assert!(FrameSet::load(&dir.join("missing")).is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
