//! Application state
//!
//! Holds process configuration and the shared handles the web layer uses

use crate::error::{Error, Result};
use crate::hardware::sim::SimHandles;
use crate::hardware::{BackendKind, HardwareConfig};
use crate::monitor_loop::{MonitorHandle, MonitorOptions};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Credentials for the optional basic-auth boundary
#[derive(Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Where captured stills are written and served from
    pub image_dir: PathBuf,
    /// Presentation files (index page, scripts)
    pub static_dir: PathBuf,
    /// Hardware backend and device paths
    pub hardware: HardwareConfig,
    /// Basic auth; `None` leaves every route open
    pub auth: Option<BasicCredentials>,
    /// Apply interval changes without a restart
    pub hot_reload_intervals: bool,
    /// Upper bound for one still capture
    pub capture_timeout: Duration,
    /// Per-subscriber event queue length
    pub subscriber_queue: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            image_dir: PathBuf::from("static/captures"),
            static_dir: PathBuf::from("static"),
            hardware: HardwareConfig::default(),
            auth: None,
            hot_reload_intervals: true,
            capture_timeout: Duration::from_millis(3000),
            subscriber_queue: 32,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn narrow<T: TryFrom<u64>>(key: &str, value: Option<u64>) -> Result<Option<T>> {
            value
                .map(|v| {
                    T::try_from(v).map_err(|_| Error::Config(format!("{} out of range: {}", key, v)))
                })
                .transpose()
        }

        let defaults = Self::default();
        let parse = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, raw)))
                })
                .transpose()
        };
        let flag = |key: &str, default: bool| -> Result<bool> {
            match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
                None => Ok(default),
                Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
                Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
                Some(v) => Err(Error::Config(format!("{} has invalid value {:?}", key, v))),
            }
        };

        let backend = match lookup("HARDWARE_BACKEND") {
            None => defaults.hardware.backend.clone(),
            Some(raw) => BackendKind::parse(raw.trim()).ok_or_else(|| {
                Error::Config(format!("HARDWARE_BACKEND must be simulated or linux, got {:?}", raw))
            })?,
        };

        let port = match parse("PORT")? {
            None => defaults.port,
            Some(p) => u16::try_from(p)
                .map_err(|_| Error::Config(format!("PORT out of range: {}", p)))?,
        };

        let auth = match (lookup("SECURITY_USERNAME"), lookup("SECURITY_PASSWORD")) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Some(BasicCredentials { username, password })
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Config(
                    "SECURITY_USERNAME and SECURITY_PASSWORD must be set together".to_string(),
                ))
            }
            _ => None,
        };

        let path = |key: &str, default: PathBuf| lookup(key).map(PathBuf::from).unwrap_or(default);
        let hardware_defaults = defaults.hardware;

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port,
            image_dir: path("IMAGE_DIR", defaults.image_dir),
            static_dir: path("STATIC_DIR", defaults.static_dir),
            hardware: HardwareConfig {
                backend,
                gpio_sysfs_root: path("GPIO_SYSFS_ROOT", hardware_defaults.gpio_sysfs_root),
                gpio_chip_base: narrow("GPIO_CHIP_BASE", parse("GPIO_CHIP_BASE")?)?
                    .unwrap_or(hardware_defaults.gpio_chip_base),
                camera_device: path("CAMERA_DEVICE", hardware_defaults.camera_device),
                ffmpeg_path: path("FFMPEG_PATH", hardware_defaults.ffmpeg_path),
                lcd_device: path("LCD_DEVICE", hardware_defaults.lcd_device),
                i2c_devices_root: path("I2C_DEVICES_ROOT", hardware_defaults.i2c_devices_root),
                i2c_bus: narrow("I2C_BUS", parse("I2C_BUS")?)?
                    .unwrap_or(hardware_defaults.i2c_bus),
                sim_frame_rate: narrow("SIM_FRAME_RATE", parse("SIM_FRAME_RATE")?)?
                    .unwrap_or(hardware_defaults.sim_frame_rate),
            },
            auth,
            hot_reload_intervals: flag("HOT_RELOAD_INTERVALS", defaults.hot_reload_intervals)?,
            capture_timeout: parse("CAPTURE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture_timeout),
            subscriber_queue: narrow("SUBSCRIBER_QUEUE", parse("SUBSCRIBER_QUEUE")?)?
                .unwrap_or(defaults.subscriber_queue),
        })
    }

    pub fn monitor_options(&self) -> MonitorOptions {
        MonitorOptions {
            image_dir: self.image_dir.clone(),
            capture_timeout: self.capture_timeout,
            hot_reload_intervals: self.hot_reload_intervals,
            subscriber_queue: self.subscriber_queue,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: Arc<AppConfig>,
    /// Running monitor (events, frames, settings, status)
    pub monitor: MonitorHandle,
    /// Simulated drivers, when running without hardware
    pub simulator: Option<SimHandles>,
    /// System health status
    pub system_health: Arc<RwLock<SystemHealth>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, monitor: MonitorHandle, simulator: Option<SimHandles>) -> Self {
        Self {
            config: Arc::new(config),
            monitor,
            simulator,
            system_health: Arc::new(RwLock::new(SystemHealth::default())),
            started_at: Instant::now(),
        }
    }
}

const CPU_OVERLOAD_PERCENT: f32 = 85.0;
const MEMORY_OVERLOAD_PERCENT: f32 = 90.0;

/// Host load seen by the monitor process
///
/// An overloaded host can stretch the poll period and capture times, so the
/// health endpoint reports the monitor as degraded while it lasts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemHealth {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub overloaded: bool,
    pub sampled_at: Option<chrono::DateTime<chrono::Local>>,
}

impl SystemHealth {
    /// Record one sample; logs when the host enters or leaves overload
    pub fn record(&mut self, cpu: f32, memory: f32) {
        let overloaded = cpu > CPU_OVERLOAD_PERCENT || memory > MEMORY_OVERLOAD_PERCENT;
        match (self.overloaded, overloaded) {
            (false, true) => tracing::warn!(
                cpu_percent = cpu,
                memory_percent = memory,
                "Host overloaded, poll timing may slip"
            ),
            (true, false) => tracing::info!(
                cpu_percent = cpu,
                memory_percent = memory,
                "Host load back to normal"
            ),
            _ => {}
        }

        self.cpu_percent = cpu;
        self.memory_percent = memory;
        self.overloaded = overloaded;
        self.sampled_at = Some(chrono::Local::now());
    }
}

/// Average CPU and used memory, both in percent
fn sample_host(sys: &mut sysinfo::System) -> (f32, f32) {
    sys.refresh_cpu();
    sys.refresh_memory();

    let cpus = sys.cpus();
    let cpu = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    };
    let memory = match sys.total_memory() {
        0 => 0.0,
        total => sys.used_memory() as f32 / total as f32 * 100.0,
    };
    (cpu, memory)
}

/// Sample host load every `period` until the monitor stops
pub fn spawn_health_sampler(state: &AppState, period: Duration) -> tokio::task::JoinHandle<()> {
    let health = state.system_health.clone();
    let shutdown = state.monitor.shutdown().clone();
    tokio::spawn(async move {
        let mut sys = sysinfo::System::new();
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (cpu, memory) = sample_host(&mut sys);
                    health.write().await.record(cpu, memory);
                }
                _ = shutdown.wait() => break,
            }
        }
        tracing::debug!("Health sampler stopped");
    })
}
