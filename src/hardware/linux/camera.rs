//! ffmpeg V4L2 camera
//!
//! One long-running ffmpeg process reads the V4L2 device and writes an MJPEG
//! stream to stdout. A reader thread cuts the pipe into JPEG frames and
//! pushes them into the frame sink. Stills are served from the live stream
//! so the device is never opened twice, and only while that stream is alive
//! and recent.

use crate::frame_buffer::FrameSink;
use crate::hardware::{Camera, CameraSettings, HardwareError};
use parking_lot::Mutex;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on a single buffered frame before the splitter resyncs
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// Oldest frame a still may be taken from
pub const MAX_FRAME_AGE: Duration = Duration::from_secs(2);

/// Liveness of one ffmpeg session, written by its reader thread
#[derive(Debug)]
pub struct StreamHealth {
    alive: AtomicBool,
    last_frame: Mutex<Option<Instant>>,
}

impl StreamHealth {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            last_frame: Mutex::new(None),
        }
    }

    pub fn frame_received(&self, at: Instant) {
        *self.last_frame.lock() = Some(at);
    }

    pub fn ended(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether a still taken at `now` would show the current scene
    pub fn check(&self, now: Instant) -> Result<(), HardwareError> {
        if !self.is_alive() {
            return Err(HardwareError::camera("capture_still", "camera stream ended"));
        }
        let last = (*self.last_frame.lock())
            .ok_or_else(|| HardwareError::camera("capture_still", "no frame received yet"))?;
        let age = now.saturating_duration_since(last);
        if age > MAX_FRAME_AGE {
            return Err(HardwareError::camera(
                "capture_still",
                format!("latest frame is {} ms old", age.as_millis()),
            ));
        }
        Ok(())
    }
}

impl Default for StreamHealth {
    fn default() -> Self {
        Self::new()
    }
}

struct Session {
    child: Child,
    reader: JoinHandle<()>,
    health: Arc<StreamHealth>,
}

pub struct FfmpegCamera {
    ffmpeg: PathBuf,
    device: PathBuf,
    settings: Mutex<CameraSettings>,
    session: Mutex<Option<Session>>,
    sink: Mutex<Option<FrameSink>>,
    closed: AtomicBool,
}

impl FfmpegCamera {
    pub fn new(ffmpeg: PathBuf, device: PathBuf, settings: CameraSettings) -> Self {
        Self {
            ffmpeg,
            device,
            settings: Mutex::new(settings),
            session: Mutex::new(None),
            sink: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// ffmpeg `-q:v` scale runs 2 (best) to 31 (worst)
    fn qscale(quality: u8) -> u32 {
        let quality = u32::from(quality.min(100));
        2 + (100 - quality) * 29 / 100
    }

    fn build_command(&self, settings: &CameraSettings) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-f", "v4l2", "-video_size"])
            .arg(format!("{}x{}", settings.width, settings.height))
            .arg("-i")
            .arg(&self.device)
            .args(["-f", "mjpeg", "-q:v"])
            .arg(Self::qscale(settings.quality).to_string())
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        cmd
    }

    fn spawn_session(&self, sink: FrameSink) -> Result<Session, HardwareError> {
        let settings = *self.settings.lock();
        let mut child = self
            .build_command(&settings)
            .spawn()
            .map_err(|e| HardwareError::camera("start", format!("spawn {}: {}", self.ffmpeg.display(), e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| HardwareError::camera("start", "ffmpeg stdout not captured"))?;

        let device = self.device.display().to_string();
        let health = Arc::new(StreamHealth::new());
        let thread_health = health.clone();
        let reader = std::thread::Builder::new()
            .name("ffmpeg-mjpeg".to_string())
            .spawn(move || {
                let mut splitter = MjpegSplitter::new();
                let mut chunk = vec![0u8; READ_CHUNK];
                loop {
                    match stdout.read(&mut chunk) {
                        Ok(0) => {
                            tracing::warn!(subsystem = "camera", device = %device, "Camera stream ended");
                            break;
                        }
                        Ok(n) => {
                            for frame in splitter.push(&chunk[..n]) {
                                thread_health.frame_received(Instant::now());
                                sink.set_current(frame);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(subsystem = "camera", operation = "read", device = %device, error = %e, "Camera pipe read failed");
                            break;
                        }
                    }
                }
                thread_health.ended();
            })
            .map_err(|e| HardwareError::camera("start", e.to_string()))?;

        tracing::info!(
            device = %self.device.display(),
            width = settings.width,
            height = settings.height,
            quality = settings.quality,
            "Camera streaming via ffmpeg"
        );

        Ok(Session {
            child,
            reader,
            health,
        })
    }

    fn stop_session(&self) -> Result<(), HardwareError> {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            // Already exited is fine
            let _ = session.child.kill();
            session
                .child
                .wait()
                .map_err(|e| HardwareError::camera("stop", e.to_string()))?;
            session
                .reader
                .join()
                .map_err(|_| HardwareError::camera("stop", "reader thread panicked"))?;
        }
        Ok(())
    }
}

impl Camera for FfmpegCamera {
    fn start(&self, sink: FrameSink) -> Result<(), HardwareError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HardwareError::camera("start", "camera closed"));
        }
        let mut session = self.session.lock();
        if session.is_some() {
            return Ok(());
        }
        *session = Some(self.spawn_session(sink.clone())?);
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn capture_still(&self) -> Result<Vec<u8>, HardwareError> {
        let health = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.health.clone())
            .ok_or_else(|| HardwareError::camera("capture_still", "camera not streaming"))?;
        health.check(Instant::now())?;

        let sink = self.sink.lock().clone();
        sink.and_then(|s| s.latest())
            .map(|frame| frame.data().to_vec())
            .ok_or_else(|| HardwareError::camera("capture_still", "no frame received yet"))
    }

    fn reconfigure(&self, settings: &CameraSettings) -> Result<(), HardwareError> {
        *self.settings.lock() = *settings;

        let running = self.session.lock().is_some();
        let sink = self.sink.lock().clone();
        if let (true, Some(sink)) = (running, sink) {
            self.stop_session()?;
            let session = self.spawn_session(sink)?;
            *self.session.lock() = Some(session);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), HardwareError> {
        self.stop_session()
    }

    fn close(&self) -> Result<(), HardwareError> {
        self.stop_session()?;
        self.closed.store(true, Ordering::Release);
        *self.sink.lock() = None;
        Ok(())
    }
}

/// Cuts a byte stream of concatenated JPEGs into whole frames
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, get back every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &SOI) else {
                // Keep a trailing 0xFF: it may be half of the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let cut = self.buf.len() - keep;
                self.buf.drain(..cut);
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
            }

            match find(&self.buf[SOI.len()..], &EOI) {
                Some(pos) => {
                    let end = SOI.len() + pos + EOI.len();
                    frames.push(self.buf[..end].to_vec());
                    self.buf.drain(..end);
                }
                None => {
                    if self.buf.len() > MAX_FRAME_BYTES {
                        tracing::warn!(buffered = self.buf.len(), "MJPEG frame too large, resyncing");
                        self.buf.clear();
                    }
                    break;
                }
            }
        }

        frames
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
