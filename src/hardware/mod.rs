//! Hardware - Peripheral Collaborators
//!
//! ## Responsibilities
//!
//! - Interfaces for the GPIO, camera and display subsystems
//! - Error taxonomy for transient and fatal hardware failures
//! - Backend selection (simulated or Linux sysfs/V4L2/charlcd)
//! - Exactly-once release of every peripheral on shutdown
//!
//! The monitor only ever talks to the traits in this module. Concrete
//! drivers live in [`sim`] and [`linux`].

pub mod discovery;
pub mod linux;
pub mod sim;

use crate::frame_buffer::FrameSink;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use discovery::{discover, DiscoveryAttempt, DiscoveryError, Discovered};

/// BCM pin number
pub type PinNumber = u8;

/// I2C addresses probed for the LCD backpack, in order (PCF8574, PCF8574A)
pub const LCD_ADDRESS_CANDIDATES: [I2cAddress; 2] = [I2cAddress(0x27), I2cAddress(0x3F)];

/// 7-bit I2C device address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct I2cAddress(pub u16);

impl fmt::Debug for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

impl fmt::Display for I2cAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which peripheral a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Gpio,
    Camera,
    Display,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Subsystem::Gpio => "gpio",
            Subsystem::Camera => "camera",
            Subsystem::Display => "display",
        })
    }
}

/// A single read/write/capture failed. The loop logs it and carries on.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{subsystem} {operation} failed: {detail}")]
pub struct HardwareError {
    pub subsystem: Subsystem,
    pub operation: &'static str,
    pub detail: String,
}

impl HardwareError {
    pub fn new(subsystem: Subsystem, operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            subsystem,
            operation,
            detail: detail.into(),
        }
    }

    pub fn gpio(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::new(Subsystem::Gpio, operation, detail)
    }

    pub fn camera(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::new(Subsystem::Camera, operation, detail)
    }

    pub fn display(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::new(Subsystem::Display, operation, detail)
    }
}

/// A peripheral could not be brought up. The process cannot run without it.
#[derive(Debug, thiserror::Error)]
pub enum FatalInitError {
    #[error("GPIO setup failed: {0}")]
    Gpio(#[source] HardwareError),

    #[error("Camera setup failed: {0}")]
    Camera(#[source] HardwareError),

    #[error("Display setup failed: {0}")]
    Display(#[source] HardwareError),

    #[error("No {subsystem} found: {source}")]
    NoCandidate {
        subsystem: Subsystem,
        #[source]
        source: DiscoveryError,
    },

    #[error("Image directory {path} unusable: {source}")]
    ImageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pin assignment for the two sensors and three outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinLayout {
    pub door_sensor: PinNumber,
    pub motion_sensor: PinNumber,
    pub door_led: PinNumber,
    pub motion_led: PinNumber,
    pub buzzer: PinNumber,
}

impl PinLayout {
    pub fn inputs(&self) -> [PinNumber; 2] {
        [self.door_sensor, self.motion_sensor]
    }

    pub fn outputs(&self) -> [PinNumber; 3] {
        [self.door_led, self.motion_led, self.buzzer]
    }
}

impl Default for PinLayout {
    fn default() -> Self {
        Self {
            door_sensor: 16,
            motion_sensor: 18,
            door_led: 17,
            motion_led: 21,
            buzzer: 12,
        }
    }
}

/// Camera stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 0-100
    pub quality: u8,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            quality: 85,
        }
    }
}

/// Digital I/O
pub trait GpioPort: Send + Sync {
    /// Configure inputs and outputs; outputs start low
    fn setup(&self, layout: &PinLayout) -> Result<(), HardwareError>;

    fn read(&self, pin: PinNumber) -> Result<bool, HardwareError>;

    fn write(&self, pin: PinNumber, high: bool) -> Result<(), HardwareError>;

    /// Re-initialise after a pin assignment change
    fn reconfigure(&self, layout: &PinLayout) -> Result<(), HardwareError> {
        self.cleanup()?;
        self.setup(layout)
    }

    /// Drive outputs low and release the pins
    fn cleanup(&self) -> Result<(), HardwareError>;
}

/// Still + streaming camera
pub trait Camera: Send + Sync {
    /// Begin pushing encoded frames into `sink` until `stop`
    fn start(&self, sink: FrameSink) -> Result<(), HardwareError>;

    /// Grab one JPEG. May block; callers bound it with a timeout.
    fn capture_still(&self) -> Result<Vec<u8>, HardwareError>;

    /// Apply new resolution/quality, restarting the stream if running
    fn reconfigure(&self, settings: &CameraSettings) -> Result<(), HardwareError>;

    fn stop(&self) -> Result<(), HardwareError>;

    fn close(&self) -> Result<(), HardwareError>;
}

/// Two-row character display
pub trait Display: Send + Sync {
    fn begin(&self) -> Result<(), HardwareError>;

    fn write_line(&self, row: u8, text: &str) -> Result<(), HardwareError>;

    fn clear(&self) -> Result<(), HardwareError>;
}

/// Opens a display at a bus address. Used by display discovery.
pub trait DisplayBus: Send + Sync {
    fn open(&self, address: I2cAddress) -> Result<Arc<dyn Display>, HardwareError>;
}

/// Selected hardware backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Simulated,
    Linux,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "sim" | "simulated" => Some(BackendKind::Simulated),
            "linux" | "pi" => Some(BackendKind::Linux),
            _ => None,
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone)]
pub struct HardwareConfig {
    pub backend: BackendKind,
    pub gpio_sysfs_root: PathBuf,
    pub gpio_chip_base: u32,
    pub camera_device: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub lcd_device: PathBuf,
    pub i2c_devices_root: PathBuf,
    pub i2c_bus: u8,
    pub sim_frame_rate: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Simulated,
            gpio_sysfs_root: PathBuf::from("/sys/class/gpio"),
            gpio_chip_base: 0,
            camera_device: PathBuf::from("/dev/video0"),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            lcd_device: PathBuf::from("/dev/lcd"),
            i2c_devices_root: PathBuf::from("/sys/bus/i2c/devices"),
            i2c_bus: 1,
            sim_frame_rate: 10,
        }
    }
}

/// Unopened peripherals handed to the monitor at start-up
pub struct HardwareParts {
    pub gpio: Arc<dyn GpioPort>,
    pub camera: Arc<dyn Camera>,
    pub display_bus: Arc<dyn DisplayBus>,
    /// Present only on the simulated backend
    pub simulator: Option<sim::SimHandles>,
}

impl HardwareParts {
    /// Build drivers for the configured backend. Nothing is touched yet.
    pub fn from_config(config: &HardwareConfig, camera: &CameraSettings) -> Self {
        match config.backend {
            BackendKind::Simulated => {
                let handles = sim::SimHandles::new(*camera, config.sim_frame_rate);
                Self {
                    gpio: handles.gpio.clone(),
                    camera: handles.camera.clone(),
                    display_bus: handles.display_bus.clone(),
                    simulator: Some(handles),
                }
            }
            BackendKind::Linux => Self {
                gpio: Arc::new(linux::SysfsGpio::new(
                    config.gpio_sysfs_root.clone(),
                    config.gpio_chip_base,
                )),
                camera: Arc::new(linux::FfmpegCamera::new(
                    config.ffmpeg_path.clone(),
                    config.camera_device.clone(),
                    *camera,
                )),
                display_bus: Arc::new(linux::CharLcdBus::new(
                    config.i2c_devices_root.clone(),
                    config.i2c_bus,
                    config.lcd_device.clone(),
                )),
                simulator: None,
            },
        }
    }
}

/// Initialised peripherals owned by the monitor
pub struct HardwareSet {
    pub gpio: Arc<dyn GpioPort>,
    pub camera: Arc<dyn Camera>,
    pub display: Arc<dyn Display>,
    released: AtomicBool,
}

impl HardwareSet {
    pub fn new(gpio: Arc<dyn GpioPort>, camera: Arc<dyn Camera>, display: Arc<dyn Display>) -> Self {
        Self {
            gpio,
            camera,
            display,
            released: AtomicBool::new(false),
        }
    }

    /// Release display, camera and GPIO. Only the first call does anything.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Err(e) = self.display.clear() {
            tracing::warn!(subsystem = "display", operation = "clear", error = %e, "Cleanup step failed");
        }
        if let Err(e) = self.camera.stop() {
            tracing::warn!(subsystem = "camera", operation = "stop", error = %e, "Cleanup step failed");
        }
        if let Err(e) = self.camera.close() {
            tracing::warn!(subsystem = "camera", operation = "close", error = %e, "Cleanup step failed");
        }
        if let Err(e) = self.gpio.cleanup() {
            tracing::warn!(subsystem = "gpio", operation = "cleanup", error = %e, "Cleanup step failed");
        }

        tracing::info!("Hardware resources released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for HardwareSet {
    fn drop(&mut self) {
        self.release();
    }
}
