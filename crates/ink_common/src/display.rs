//! E-paper display abstraction.
//!
//! Production code drives a real panel through an [`EpdDriver`]
//! implementation; development machines use the built-in `mock` driver,
//! which writes each frame to a PNG instead of hardware. Test code uses
//! [`RecordingEpd`] and asserts on the recorded operation sequence.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::error::FrameError;

/// One e-paper panel.
///
/// Refresh sequence is always prepare, clear, write, sleep; the panel is
/// put back to sleep after every frame to avoid burn-in. Implementations
/// may block for several seconds during `write` (full EPD refresh).
#[async_trait]
pub trait EpdDriver: Send {
    fn name(&self) -> &str;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Wake the panel and run its init sequence.
    async fn prepare(&mut self) -> Result<(), FrameError>;

    /// Flush the panel to its blank state.
    async fn clear(&mut self) -> Result<(), FrameError>;

    /// Push one frame. The image is already sized to the panel.
    async fn write(&mut self, image: &DynamicImage) -> Result<(), FrameError>;

    /// Enter deep sleep between refreshes.
    async fn sleep(&mut self) -> Result<(), FrameError>;

    /// Release the panel. Called at most once.
    async fn close(&mut self) -> Result<(), FrameError>;
}

/// Driver names accepted by [`DisplayManager::open`].
pub fn list_supported() -> Vec<&'static str> {
    vec!["mock"]
}

fn load_driver(name: &str) -> Result<Box<dyn EpdDriver>, FrameError> {
    match name {
        "mock" => Ok(Box::new(MockEpd::new())),
        other => Err(FrameError::EpdNotFound(other.to_string())),
    }
}

// ============================================================================
// Mock driver
// ============================================================================

/// Hardware-free driver that renders frames to a PNG file.
///
/// Dimensions match a common 2.13" panel so layouts exercised against the
/// mock carry over to real hardware.
pub struct MockEpd {
    output: PathBuf,
}

impl MockEpd {
    pub const WIDTH: u32 = 250;
    pub const HEIGHT: u32 = 122;

    pub fn new() -> Self {
        Self {
            output: std::env::temp_dir().join("inkframe-frame.png"),
        }
    }

    /// Write frames to `path` instead of the temp dir.
    pub fn with_output(path: PathBuf) -> Self {
        Self { output: path }
    }
}

impl Default for MockEpd {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EpdDriver for MockEpd {
    fn name(&self) -> &str {
        "mock"
    }

    fn width(&self) -> u32 {
        Self::WIDTH
    }

    fn height(&self) -> u32 {
        Self::HEIGHT
    }

    async fn prepare(&mut self) -> Result<(), FrameError> {
        debug!("mock EPD prepare");
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), FrameError> {
        debug!("mock EPD clear");
        Ok(())
    }

    async fn write(&mut self, image: &DynamicImage) -> Result<(), FrameError> {
        // Monochrome like the real panel.
        image
            .to_luma8()
            .save(&self.output)
            .map_err(|e| FrameError::Display(format!("mock frame write: {}", e)))?;
        info!("mock EPD frame written to {}", self.output.display());
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), FrameError> {
        debug!("mock EPD sleep");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FrameError> {
        debug!("mock EPD close");
        Ok(())
    }
}

// ============================================================================
// Recording driver (testing)
// ============================================================================

/// Driver that records its operation sequence for assertions.
///
/// `ops()` hands out a shared log handle that stays valid after the driver
/// moves into a [`DisplayManager`].
pub struct RecordingEpd {
    ops: Arc<Mutex<Vec<String>>>,
    fail_writes: bool,
}

impl RecordingEpd {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_writes: false,
        }
    }

    /// Variant whose every `write` fails with a display error.
    pub fn failing_writes() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
            fail_writes: true,
        }
    }

    pub fn ops(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.ops)
    }

    fn record(&self, op: &str) {
        self.ops.lock().unwrap().push(op.to_string());
    }
}

impl Default for RecordingEpd {
    fn default() -> Self {
        Self::new()
    }
}

/// Count occurrences of one operation in a recorded log handle.
pub fn op_count(ops: &Arc<Mutex<Vec<String>>>, op: &str) -> usize {
    ops.lock().unwrap().iter().filter(|o| *o == op).count()
}

#[async_trait]
impl EpdDriver for RecordingEpd {
    fn name(&self) -> &str {
        "recording"
    }

    fn width(&self) -> u32 {
        MockEpd::WIDTH
    }

    fn height(&self) -> u32 {
        MockEpd::HEIGHT
    }

    async fn prepare(&mut self) -> Result<(), FrameError> {
        self.record("prepare");
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), FrameError> {
        self.record("clear");
        Ok(())
    }

    async fn write(&mut self, image: &DynamicImage) -> Result<(), FrameError> {
        self.record(&format!("write {}x{}", image.width(), image.height()));
        if self.fail_writes {
            return Err(FrameError::Display("recording driver set to fail".into()));
        }
        Ok(())
    }

    async fn sleep(&mut self) -> Result<(), FrameError> {
        self.record("sleep");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), FrameError> {
        self.record("close");
        Ok(())
    }
}

// ============================================================================
// Display manager
// ============================================================================

/// Owns the panel for the life of the process.
///
/// `close` is idempotent and infallible so every exit path (normal, fatal
/// error, signal) can call it without caring whether another path already
/// did.
pub struct DisplayManager {
    driver: Option<Box<dyn EpdDriver>>,
}

impl DisplayManager {
    pub fn new() -> Self {
        Self { driver: None }
    }

    /// Manager over an already-constructed driver (tests, custom panels).
    pub fn with_driver(driver: Box<dyn EpdDriver>) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    /// Load the named driver. Fails with `EpdNotFound` for unknown names.
    pub fn open(&mut self, name: &str) -> Result<(), FrameError> {
        if self.driver.is_some() {
            return Err(FrameError::Display("EPD driver already loaded".into()));
        }
        let driver = load_driver(name)?;
        info!(
            "EPD driver {} ready ({}x{})",
            driver.name(),
            driver.width(),
            driver.height()
        );
        self.driver = Some(driver);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.driver.is_some()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.driver.as_ref().map(|d| (d.width(), d.height()))
    }

    /// Full refresh: resize to the panel, then prepare, clear, write, sleep.
    pub async fn render(&mut self, image: &DynamicImage) -> Result<(), FrameError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| FrameError::Display("no EPD driver loaded".into()))?;

        let frame = image.resize_exact(driver.width(), driver.height(), FilterType::Lanczos3);
        driver.prepare().await?;
        driver.clear().await?;
        driver.write(&frame).await?;
        driver.sleep().await?;
        debug!("display refresh complete");
        Ok(())
    }

    /// Release the panel. Safe to call from any exit path, any number of
    /// times; failures are logged, never propagated.
    pub async fn close(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                warn!("EPD close failed: {}", e);
            }
            info!("display closed");
        }
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}
