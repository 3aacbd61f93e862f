//! Capture session: timed region capture into a frame directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use lapse_platform::screen::{DisplayInfo, Rect, ScreenCapture, ScreenFrame};

use crate::frames::FrameStore;

/// Name of the file used to check that an output directory is writable
const WRITE_PROBE: &str = ".lapse-write-probe";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid capture configuration: {0}")]
    InvalidConfig(String),
    #[error("output directory {} is not usable: {source}", .path.display())]
    Path {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("already recording")]
    AlreadyRecording,
    #[error("not recording")]
    NotRecording,
    #[error("display enumeration failed: {0}")]
    Capture(String),
}

/// Failure of a single tick; reported and then skipped
#[derive(Debug, Error)]
enum TickError {
    #[error("screen capture failed: {0:#}")]
    Capture(anyhow::Error),
    #[error("captured frame is malformed: {0}")]
    Malformed(String),
    #[error("failed to write frame: {0}")]
    Write(#[from] image::ImageError),
}

/// Capture area. `x2`/`y2` are the width and height added to `x1`/`y1`,
/// so the captured rectangle is `(x1, y1)`–`(x1 + x2, y1 + y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl CaptureRegion {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The whole area of a display
    pub fn from_display(display: &DisplayInfo) -> Self {
        let b = display.bounds;
        Self::new(b.x, b.y, b.width as i32, b.height as i32)
    }

    pub fn to_rect(&self) -> Result<Rect, SessionError> {
        if self.x2 <= 0 || self.y2 <= 0 {
            return Err(SessionError::InvalidConfig(format!(
                "region size must be positive, got {}x{}",
                self.x2, self.y2
            )));
        }
        Ok(Rect::new(self.x1, self.y1, self.x2 as u32, self.y2 as u32))
    }
}

impl FromStr for CaptureRegion {
    type Err = SessionError;

    /// Parses `x1,y1,x2,y2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(SessionError::InvalidConfig(format!(
                "region must be x1,y1,x2,y2, got {:?}",
                s
            )));
        }

        let mut values = [0i32; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                SessionError::InvalidConfig(format!("region value {:?} is not an integer", part))
            })?;
        }
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for CaptureRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Validated session settings
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub display: usize,
    pub region: CaptureRegion,
    pub frequency: Duration,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
}

/// Running totals for the current recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub bytes: u64,
}

impl CaptureStats {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1024.0 / 1024.0
    }
}

impl fmt::Display for CaptureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} frames, {:.2} MB", self.frames, self.megabytes())
    }
}

/// Notifications from the capture loop
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    FrameWritten {
        path: PathBuf,
        bytes: u64,
        stats: CaptureStats,
    },
    TickFailed {
        message: String,
    },
}

struct RunningLoop {
    /// Dropping this also stops the loop
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the capture settings and at most one background capture loop.
/// Dropping a recording session cancels its loop.
pub struct CaptureSession {
    screen: Arc<Mutex<Box<dyn ScreenCapture>>>,
    config: Option<CaptureConfig>,
    stats_tx: Arc<watch::Sender<CaptureStats>>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
    running: Option<RunningLoop>,
}

impl CaptureSession {
    pub fn new(screen: Box<dyn ScreenCapture>) -> Self {
        let (stats_tx, _) = watch::channel(CaptureStats::default());
        Self {
            screen: Arc::new(Mutex::new(screen)),
            config: None,
            stats_tx: Arc::new(stats_tx),
            events: None,
            running: None,
        }
    }

    /// Deliver per-frame and per-failure events to `tx`
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<CaptureEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn state(&self) -> SessionState {
        if self.running.is_some() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Consistent snapshot of the current totals
    pub fn stats(&self) -> CaptureStats {
        *self.stats_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStats> {
        self.stats_tx.subscribe()
    }

    pub async fn displays(&self) -> Result<Vec<DisplayInfo>, SessionError> {
        self.screen
            .lock()
            .await
            .displays()
            .await
            .map_err(|e| SessionError::Capture(format!("{:#}", e)))
    }

    pub fn configure(
        &mut self,
        region: CaptureRegion,
        display_index: usize,
        frequency_secs: f64,
        output_dir: impl Into<PathBuf>,
    ) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRecording);
        }

        let frequency = parse_frequency(frequency_secs)?;
        region.to_rect()?;
        let output_dir = output_dir.into();
        ensure_writable(&output_dir)?;

        debug!(
            "capture configured: display {}, region {}, every {:?}, into {}",
            display_index, region, frequency, output_dir.display()
        );

        self.config = Some(CaptureConfig {
            display: display_index,
            region,
            frequency,
            output_dir,
        });
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRecording);
        }
        let config = self
            .config
            .clone()
            .ok_or_else(|| SessionError::InvalidConfig("session is not configured".to_string()))?;
        let rect = config.region.to_rect()?;

        self.stats_tx.send_replace(CaptureStats::default());

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_capture_loop(
            rect,
            config.frequency,
            FrameStore::new(&config.output_dir),
            self.screen.clone(),
            self.stats_tx.clone(),
            self.events.clone(),
            stop_rx,
        ));

        info!(
            "recording started: region {} every {:?} into {}",
            config.region,
            config.frequency,
            config.output_dir.display()
        );

        self.running = Some(RunningLoop { stop_tx, task });
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), SessionError> {
        let running = self.running.take().ok_or(SessionError::NotRecording)?;

        // The loop may already be gone, in which case there is nobody to tell
        let _ = running.stop_tx.send(());
        if let Err(e) = running.task.await {
            error!("capture loop ended abnormally: {}", e);
        }

        info!("recording stopped: {}", self.stats());
        Ok(())
    }

    /// Stop if recording, start otherwise. Returns the new state.
    pub async fn toggle(&mut self) -> Result<SessionState, SessionError> {
        match self.state() {
            SessionState::Recording => self.stop().await?,
            SessionState::Idle => self.start()?,
        }
        Ok(self.state())
    }
}

/// Resolve a stored display preference, clamping out-of-range indices to the
/// last display.
pub fn pick_display(displays: &[DisplayInfo], preferred: usize) -> Option<&DisplayInfo> {
    if displays.is_empty() {
        return None;
    }
    displays.get(preferred.min(displays.len() - 1))
}

fn parse_frequency(seconds: f64) -> Result<Duration, SessionError> {
    let invalid = || {
        SessionError::InvalidConfig(format!(
            "frequency must be a positive number of seconds, got {}",
            seconds
        ))
    };
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(invalid());
    }
    match Duration::try_from_secs_f64(seconds) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(invalid()),
    }
}

fn ensure_writable(dir: &Path) -> Result<(), SessionError> {
    let path_error = |source| SessionError::Path {
        path: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(path_error)?;
    let probe = dir.join(WRITE_PROBE);
    std::fs::write(&probe, b"").map_err(path_error)?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

/// Capture once per `frequency` until told to stop. A failed tick is
/// reported and skipped.
async fn run_capture_loop(
    rect: Rect,
    frequency: Duration,
    mut store: FrameStore,
    screen: Arc<Mutex<Box<dyn ScreenCapture>>>,
    stats_tx: Arc<watch::Sender<CaptureStats>>,
    events: Option<mpsc::UnboundedSender<CaptureEvent>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(frequency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = interval.tick() => {}
        }

        // A capture that never completes must not keep stop() waiting
        let result = tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            result = capture_tick(&screen, rect, &mut store) => result,
        };

        let event = match result {
            Ok((path, bytes)) => {
                stats_tx.send_modify(|stats| {
                    stats.frames += 1;
                    stats.bytes += bytes;
                });
                let stats = *stats_tx.borrow();
                debug!("frame {} written ({})", path.display(), stats);
                CaptureEvent::FrameWritten { path, bytes, stats }
            }
            Err(e) => {
                warn!("capture tick failed: {}", e);
                CaptureEvent::TickFailed {
                    message: e.to_string(),
                }
            }
        };

        if let Some(tx) = &events {
            let _ = tx.send(event);
        }
    }

    debug!("capture loop for {} exited", store.dir().display());
}

async fn capture_tick(
    screen: &Mutex<Box<dyn ScreenCapture>>,
    rect: Rect,
    store: &mut FrameStore,
) -> Result<(PathBuf, u64), TickError> {
    let frame = screen
        .lock()
        .await
        .capture_rect(rect)
        .await
        .map_err(TickError::Capture)?;
    let image = frame_to_image(frame)?;
    Ok(store.write_frame(&image)?)
}

fn frame_to_image(frame: ScreenFrame) -> Result<RgbaImage, TickError> {
    let row_bytes = frame.width as usize * 4;
    let stride = frame.stride as usize;
    let height = frame.height as usize;

    if stride < row_bytes || frame.data.len() < stride * height.saturating_sub(1) + row_bytes {
        return Err(TickError::Malformed(format!(
            "{}x{} frame with stride {} has only {} bytes",
            frame.width,
            frame.height,
            frame.stride,
            frame.data.len()
        )));
    }

    let data = if stride == row_bytes {
        let mut data = frame.data;
        data.truncate(row_bytes * height);
        data
    } else {
        let mut packed = Vec::with_capacity(row_bytes * height);
        for row in frame.data.chunks(stride).take(height) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        packed
    };

    RgbaImage::from_raw(frame.width, frame.height, data)
        .ok_or_else(|| TickError::Malformed("pixel buffer does not match frame size".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::FrameSet;
    use crate::testutil::scratch_dir;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns solid frames of the requested size; fails on the listed calls.
    struct FakeScreen {
        calls: Arc<AtomicUsize>,
        fail_calls: Vec<usize>,
    }

    impl FakeScreen {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    calls: calls.clone(),
                    fail_calls: Vec::new(),
                },
                calls,
            )
        }
    }

    #[async_trait::async_trait]
    impl ScreenCapture for FakeScreen {
        async fn displays(&self) -> anyhow::Result<Vec<DisplayInfo>> {
            Ok(vec![DisplayInfo {
                index: 0,
                name: "fake".to_string(),
                bounds: Rect::new(0, 0, 640, 480),
                is_primary: true,
            }])
        }

        async fn capture_rect(&mut self, rect: Rect) -> anyhow::Result<ScreenFrame> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_calls.contains(&call) {
                anyhow::bail!("permission denied");
            }
            Ok(ScreenFrame {
                width: rect.width,
                height: rect.height,
                data: vec![0x80; (rect.width * rect.height * 4) as usize],
                stride: rect.width * 4,
            })
        }
    }

    fn configured_session(screen: FakeScreen, dir: &Path, frequency: f64) -> CaptureSession {
        let mut session = CaptureSession::new(Box::new(screen));
        session
            .configure(CaptureRegion::new(0, 0, 100, 100), 0, frequency, dir)
            .unwrap();
        session
    }

    fn file_sizes(dir: &Path) -> u64 {
        FrameSet::load(dir)
            .unwrap()
            .paths()
            .iter()
            .map(|p| std::fs::metadata(p).unwrap().len())
            .sum()
    }

    #[test]
    fn test_region_offsets_are_sizes() {
        let rect = CaptureRegion::new(10, 20, 100, 50).to_rect().unwrap();
        assert_eq!(rect, Rect::new(10, 20, 100, 50));
        assert!(CaptureRegion::new(10, 20, 0, 50).to_rect().is_err());
        assert!(CaptureRegion::new(10, 20, 100, -5).to_rect().is_err());
    }

    #[test]
    fn test_region_parse() {
        let region: CaptureRegion = "0, -1080,1920,1080".parse().unwrap();
        assert_eq!(region, CaptureRegion::new(0, -1080, 1920, 1080));
        assert_eq!(region.to_string(), "0,-1080,1920,1080");
        assert!("1,2,3".parse::<CaptureRegion>().is_err());
        assert!("1,2,3,x".parse::<CaptureRegion>().is_err());
    }

    #[test]
    fn test_pick_display_clamps() {
        let displays: Vec<DisplayInfo> = (0..2)
            .map(|i| DisplayInfo {
                index: i,
                name: format!("d{}", i),
                bounds: Rect::new(i as i32 * 1920, 0, 1920, 1080),
                is_primary: i == 0,
            })
            .collect();
        assert_eq!(pick_display(&displays, 1).unwrap().index, 1);
        assert_eq!(pick_display(&displays, 7).unwrap().index, 1);
        assert!(pick_display(&[], 0).is_none());

        let region = CaptureRegion::from_display(&displays[1]);
        assert_eq!(region, CaptureRegion::new(1920, 0, 1920, 1080));
    }

    #[test]
    fn test_stats_display() {
        let stats = CaptureStats {
            frames: 3,
            bytes: 3 * 1024 * 1024 / 2,
        };
        assert_eq!(stats.to_string(), "3 frames, 1.50 MB");
    }

    #[test]
    fn test_configure_rejects_bad_frequency() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = CaptureSession::new(Box::new(screen));
        let region = CaptureRegion::new(0, 0, 10, 10);

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e-12] {
            let err = session.configure(region, 0, bad, &dir).unwrap_err();
            assert!(matches!(err, SessionError::InvalidConfig(_)), "{}", bad);
        }
        assert!(session.config().is_none());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_configure_creates_output_dir() {
        let base = scratch_dir();
        let dir = base.join("nested").join("frames");
        let (screen, _) = FakeScreen::new();
        let mut session = CaptureSession::new(Box::new(screen));

        session
            .configure(CaptureRegion::new(0, 0, 10, 10), 0, 0.5, &dir)
            .unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join(WRITE_PROBE).exists());
        assert_eq!(session.config().unwrap().frequency, Duration::from_millis(500));
        std::fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn test_configure_rejects_file_as_dir() {
        let base = scratch_dir();
        let file = base.join("occupied");
        std::fs::write(&file, b"x").unwrap();
        let (screen, _) = FakeScreen::new();
        let mut session = CaptureSession::new(Box::new(screen));

        let err = session
            .configure(CaptureRegion::new(0, 0, 10, 10), 0, 1.0, &file)
            .unwrap_err();
        assert!(matches!(err, SessionError::Path { .. }));
        std::fs::remove_dir_all(base).unwrap();
    }

    #[test]
    fn test_failed_configure_keeps_previous_settings() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 2.0);

        let err = session
            .configure(CaptureRegion::new(5, 5, -1, 10), 1, 1.0, &dir)
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidConfig(_)));

        let config = session.config().unwrap();
        assert_eq!(config.region, CaptureRegion::new(0, 0, 100, 100));
        assert_eq!(config.display, 0);
        assert_eq!(config.frequency, Duration::from_secs(2));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let (screen, _) = FakeScreen::new();
        let mut session = CaptureSession::new(Box::new(screen));
        assert!(matches!(session.start(), Err(SessionError::InvalidConfig(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stop_when_idle_fails() {
        let dir = scratch_dir();
        let (screen, calls) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);

        assert!(matches!(session.stop().await, Err(SessionError::NotRecording)));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(FrameSet::load(&dir).unwrap().is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_stop_immediately() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        session.stop().await.unwrap();
        assert_eq!(session.state(), SessionState::Idle);

        assert!(session.stats().frames <= 1);
        assert!(FrameSet::load(&dir).unwrap().len() <= 1);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_ticks_write_three_frames() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        session.stop().await.unwrap();

        let frames = FrameSet::load(&dir).unwrap();
        assert_eq!(frames.len(), 3);
        let stats = session.stats();
        assert_eq!(stats.frames, 3);
        assert_eq!(stats.bytes, file_sizes(&dir));

        let image = image::open(&frames.paths()[0]).unwrap();
        assert_eq!((image.width(), image.height()), (100, 100));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_names_strictly_increase() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 0.25);

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        session.stop().await.unwrap();

        let names: Vec<String> = FrameSet::load(&dir)
            .unwrap()
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_while_recording_keeps_counters() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(session.stats().frames, 2);

        assert!(matches!(session.start(), Err(SessionError::AlreadyRecording)));
        assert_eq!(session.stats().frames, 2);

        let err = session
            .configure(CaptureRegion::new(0, 0, 5, 5), 0, 1.0, &dir)
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyRecording));
        assert_eq!(session.config().unwrap().region, CaptureRegion::new(0, 0, 100, 100));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        session.stop().await.unwrap();
        assert_eq!(session.stats().frames, 3);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_recording() {
        let dir = scratch_dir();
        let (mut screen, calls) = FakeScreen::new();
        screen.fail_calls = vec![0];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = CaptureSession::new(Box::new(screen)).with_events(tx);
        session
            .configure(CaptureRegion::new(0, 0, 16, 16), 0, 1.0, &dir)
            .unwrap();

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        session.stop().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(session.stats().frames, 2);
        assert_eq!(session.stats().bytes, file_sizes(&dir));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, CaptureEvent::TickFailed { ref message } if message.contains("permission denied")));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, CaptureEvent::FrameWritten { stats, .. } if stats.frames == 1));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_round_trip_resets_counters() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);

        assert_eq!(session.toggle().await.unwrap(), SessionState::Recording);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(session.toggle().await.unwrap(), SessionState::Idle);
        assert_eq!(session.stats().frames, 1);

        assert_eq!(session.toggle().await.unwrap(), SessionState::Recording);
        assert_eq!(session.stats().frames, 0);
        assert_eq!(session.toggle().await.unwrap(), SessionState::Idle);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_updates() {
        let dir = scratch_dir();
        let (screen, _) = FakeScreen::new();
        let mut session = configured_session(screen, &dir, 1.0);
        let mut rx = session.subscribe();

        session.start().unwrap();
        rx.changed().await.unwrap();
        // the reset published by start
        assert_eq!(rx.borrow_and_update().frames, 0);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().frames, 1);
        session.stop().await.unwrap();
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_frame_to_image_repacks_stride() {
        let frame = ScreenFrame {
            width: 2,
            height: 2,
            // 2 pixels per row plus 4 bytes of padding
            data: vec![
                1, 1, 1, 1, 2, 2, 2, 2, 0, 0, 0, 0, //
                3, 3, 3, 3, 4, 4, 4, 4, 0, 0, 0, 0,
            ],
            stride: 12,
        };
        let image = frame_to_image(frame).unwrap();
        assert_eq!(image.get_pixel(1, 1).0, [4, 4, 4, 4]);
        assert_eq!(image.as_raw().len(), 16);
    }

    #[test]
    fn test_frame_to_image_rejects_short_buffer() {
        let frame = ScreenFrame {
            width: 4,
            height: 4,
            data: vec![0; 10],
            stride: 16,
        };
        assert!(frame_to_image(frame).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_stalled_capture() {
        struct StalledScreen;

        #[async_trait::async_trait]
        impl ScreenCapture for StalledScreen {
            async fn displays(&self) -> anyhow::Result<Vec<DisplayInfo>> {
                Ok(Vec::new())
            }

            async fn capture_rect(&mut self, _rect: Rect) -> anyhow::Result<ScreenFrame> {
                std::future::pending().await
            }
        }

        let dir = scratch_dir();
        let mut session = CaptureSession::new(Box::new(StalledScreen));
        session
            .configure(CaptureRegion::new(0, 0, 10, 10), 0, 1.0, &dir)
            .unwrap();

        session.start().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        tokio::time::timeout(Duration::from_secs(60), session.stop())
            .await
            .expect("stop() waited on a stalled capture")
            .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.stats().frames, 0);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_displays_from_collaborator() {
        let (screen, _) = FakeScreen::new();
        let session = CaptureSession::new(Box::new(screen));
        let displays = session.displays().await.unwrap();
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].bounds, Rect::new(0, 0, 640, 480));
    }
}
