//! CaptureService - Still Image Capture on Sensor Triggers
//!
//! ## Responsibilities
//!
//! - Grab one still from the camera for a door/motion trigger
//! - Persist it as `{trigger}_{YYYYMMDD_HHMMSS}.jpg` in the image directory
//! - Verify the file exists after the write
//! - Bound the whole operation with a timeout so polling keeps its cadence
//! - Validate requested capture names for the image route (no traversal)
//!
//! The camera call is blocking, so it runs on the blocking pool. If it
//! overruns the timeout the worker thread is left to finish on its own and
//! no further capture is started until it does.

use crate::hardware::{Camera, HardwareError};
use crate::models::TriggerKind;
use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::fs;

/// Timestamp part of a capture filename
pub const CAPTURE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Capture failure, reported to the caller and never panicking past here
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera failed: {0}")]
    HardwareFailure(#[source] HardwareError),

    #[error("image missing after write: {}", .0.display())]
    WriteVerificationFailed(PathBuf),

    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("previous capture still running")]
    Busy,

    #[error("image write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Captures stills into an image directory
pub struct CaptureService {
    camera: Arc<dyn Camera>,
    image_dir: PathBuf,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl CaptureService {
    pub fn new(camera: Arc<dyn Camera>, image_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            camera,
            image_dir,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    /// Capture a still for `trigger` and return the stored filename
    pub async fn capture(&self, trigger: TriggerKind) -> Result<String, CaptureError> {
        self.capture_at(trigger, Local::now()).await
    }

    /// Same as [`capture`](Self::capture) with an explicit timestamp
    pub async fn capture_at(
        &self,
        trigger: TriggerKind,
        at: DateTime<Local>,
    ) -> Result<String, CaptureError> {
        let data = self.grab_still().await?;

        let filename = capture_filename(trigger, &at);
        let path = self.image_dir.join(&filename);
        fs::write(&path, &data).await?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(CaptureError::WriteVerificationFailed(path));
        }

        tracing::info!(
            trigger = %trigger,
            filename = %filename,
            size = data.len(),
            "Image captured"
        );
        Ok(filename)
    }

    async fn grab_still(&self) -> Result<Vec<u8>, CaptureError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(CaptureError::Busy);
        }

        let camera = self.camera.clone();
        let in_flight = self.in_flight.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let result = camera.capture_still();
            in_flight.store(false, Ordering::Release);
            result
        });

        match tokio::time::timeout(self.timeout, worker).await {
            Ok(Ok(result)) => result.map_err(CaptureError::HardwareFailure),
            Ok(Err(join_error)) => Err(CaptureError::HardwareFailure(HardwareError::camera(
                "capture_still",
                join_error.to_string(),
            ))),
            Err(_) => Err(CaptureError::Timeout(self.timeout)),
        }
    }
}

/// `{trigger}_{YYYYMMDD_HHMMSS}.jpg`
pub fn capture_filename(trigger: TriggerKind, at: &DateTime<Local>) -> String {
    format!("{}_{}.jpg", trigger.as_str(), at.format(CAPTURE_TIMESTAMP_FORMAT))
}

fn capture_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(door|motion)_[0-9]{8}_[0-9]{6}\.jpg$").expect("literal pattern")
    })
}

/// Whether `name` is something [`capture`](CaptureService::capture) could have produced
pub fn is_valid_capture_name(name: &str) -> bool {
    capture_name_pattern().is_match(name)
}

/// Map a requested filename to a path inside `image_dir`, or `None` if the
/// name is not a capture name. The pattern admits no separators or dots
/// beyond the extension, so the result cannot leave the directory.
pub fn resolve_image_path(image_dir: &Path, name: &str) -> Option<PathBuf> {
    is_valid_capture_name(name).then(|| image_dir.join(name))
}
