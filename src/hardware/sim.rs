//! Simulated hardware backend
//!
//! In-memory GPIO, a test-pattern camera and a two-row display. Used by the
//! test suite and by `HARDWARE_BACKEND=simulated` for development without a
//! Raspberry Pi attached. Every driver exposes knobs to inject failures.

use super::{
    Camera, CameraSettings, Display, DisplayBus, GpioPort, HardwareError, I2cAddress, PinLayout,
    PinNumber,
};
use crate::frame_buffer::FrameSink;
use crate::models::SensorState;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared handles to every simulated driver
#[derive(Clone)]
pub struct SimHandles {
    pub gpio: Arc<SimGpio>,
    pub camera: Arc<SimCamera>,
    pub display_bus: Arc<SimDisplayBus>,
}

impl SimHandles {
    pub fn new(camera: CameraSettings, frame_rate: u32) -> Self {
        Self {
            gpio: Arc::new(SimGpio::new()),
            camera: Arc::new(SimCamera::new(camera, frame_rate)),
            display_bus: Arc::new(SimDisplayBus::new(vec![I2cAddress(0x27)])),
        }
    }

    pub fn display(&self) -> Arc<SimDisplay> {
        self.display_bus.display.clone()
    }
}

// ========================================
// GPIO
// ========================================

#[derive(Default)]
struct GpioState {
    layout: Option<PinLayout>,
    levels: HashMap<PinNumber, bool>,
    rising_edges: HashMap<PinNumber, u64>,
    fail_reads: bool,
    fail_setup: bool,
    setup_count: u64,
    cleanup_count: u64,
}

/// In-memory GPIO. Inputs are driven with [`SimGpio::set_sensors`].
pub struct SimGpio {
    state: Mutex<GpioState>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GpioState::default()),
        }
    }

    /// Drive the door and motion inputs through the active pin layout
    pub fn set_sensors(&self, sensors: SensorState) {
        let mut state = self.state.lock();
        let layout = state.layout.unwrap_or_default();
        state.levels.insert(layout.door_sensor, sensors.door_open);
        state.levels.insert(layout.motion_sensor, sensors.motion_detected);
    }

    pub fn set_input(&self, pin: PinNumber, high: bool) {
        self.state.lock().levels.insert(pin, high);
    }

    /// Current level of any pin
    pub fn level(&self, pin: PinNumber) -> bool {
        self.state.lock().levels.get(&pin).copied().unwrap_or(false)
    }

    /// Rising edges on the configured buzzer pin
    pub fn buzzer_activations(&self) -> u64 {
        let state = self.state.lock();
        let buzzer = state.layout.unwrap_or_default().buzzer;
        state.rising_edges.get(&buzzer).copied().unwrap_or(0)
    }

    pub fn layout(&self) -> Option<PinLayout> {
        self.state.lock().layout
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    pub fn set_fail_setup(&self, fail: bool) {
        self.state.lock().fail_setup = fail;
    }

    pub fn setup_count(&self) -> u64 {
        self.state.lock().setup_count
    }

    pub fn cleanup_count(&self) -> u64 {
        self.state.lock().cleanup_count
    }
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl GpioPort for SimGpio {
    fn setup(&self, layout: &PinLayout) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if state.fail_setup {
            return Err(HardwareError::gpio("setup", "simulated controller unavailable"));
        }
        for pin in layout.outputs() {
            state.levels.insert(pin, false);
        }
        state.layout = Some(*layout);
        state.setup_count += 1;
        Ok(())
    }

    fn read(&self, pin: PinNumber) -> Result<bool, HardwareError> {
        let state = self.state.lock();
        if state.fail_reads {
            return Err(HardwareError::gpio("read", format!("simulated read fault on pin {}", pin)));
        }
        match state.layout {
            Some(layout) if layout.inputs().contains(&pin) => {
                Ok(state.levels.get(&pin).copied().unwrap_or(false))
            }
            Some(_) => Err(HardwareError::gpio("read", format!("pin {} is not an input", pin))),
            None => Err(HardwareError::gpio("read", "gpio not set up")),
        }
    }

    fn write(&self, pin: PinNumber, high: bool) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        match state.layout {
            Some(layout) if layout.outputs().contains(&pin) => {}
            Some(_) => {
                return Err(HardwareError::gpio("write", format!("pin {} is not an output", pin)))
            }
            None => return Err(HardwareError::gpio("write", "gpio not set up")),
        }

        let previous = state.levels.insert(pin, high).unwrap_or(false);
        if high && !previous {
            *state.rising_edges.entry(pin).or_insert(0) += 1;
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<(), HardwareError> {
        let mut state = self.state.lock();
        if let Some(layout) = state.layout.take() {
            for pin in layout.outputs() {
                state.levels.insert(pin, false);
            }
        }
        state.cleanup_count += 1;
        Ok(())
    }
}

// ========================================
// Camera
// ========================================

struct Producer {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Camera that renders a moving colour-bar JPEG
pub struct SimCamera {
    settings: Arc<Mutex<CameraSettings>>,
    frame_rate: u32,
    fail_stills: AtomicBool,
    fail_start: AtomicBool,
    still_delay: Mutex<Duration>,
    stills: AtomicU64,
    sequence: Arc<AtomicU64>,
    producer: Mutex<Option<Producer>>,
    closed: AtomicBool,
}

impl SimCamera {
    pub fn new(settings: CameraSettings, frame_rate: u32) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            frame_rate: frame_rate.max(1),
            fail_stills: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            still_delay: Mutex::new(Duration::ZERO),
            stills: AtomicU64::new(0),
            sequence: Arc::new(AtomicU64::new(0)),
            producer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Make `capture_still` return an error
    pub fn set_fail_stills(&self, fail: bool) {
        self.fail_stills.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Relaxed);
    }

    /// Make `capture_still` block for `delay` before returning
    pub fn set_still_delay(&self, delay: Duration) {
        *self.still_delay.lock() = delay;
    }

    pub fn stills_taken(&self) -> u64 {
        self.stills.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> CameraSettings {
        *self.settings.lock()
    }

    pub fn is_streaming(&self) -> bool {
        self.producer.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Camera for SimCamera {
    fn start(&self, sink: FrameSink) -> Result<(), HardwareError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HardwareError::camera("start", "camera closed"));
        }
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(HardwareError::camera("start", "simulated sensor not detected"));
        }

        let mut producer = self.producer.lock();
        if producer.is_some() {
            return Ok(());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let period = Duration::from_millis(1000 / u64::from(self.frame_rate));
        let settings = self.settings.clone();
        let sequence = self.sequence.clone();
        let thread_stop = stop.clone();

        let thread = std::thread::Builder::new()
            .name("sim-camera".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let current = *settings.lock();
                    let seq = sequence.fetch_add(1, Ordering::Relaxed);
                    match render_test_pattern(&current, seq) {
                        Ok(jpeg) => {
                            sink.set_current(jpeg);
                        }
                        Err(e) => {
                            tracing::warn!(subsystem = "camera", operation = "render", error = %e, "Test pattern failed");
                        }
                    }
                    std::thread::sleep(period);
                }
            })
            .map_err(|e| HardwareError::camera("start", e.to_string()))?;

        *producer = Some(Producer { stop, thread });
        tracing::info!(frame_rate = self.frame_rate, "Simulated camera streaming");
        Ok(())
    }

    fn capture_still(&self) -> Result<Vec<u8>, HardwareError> {
        let delay = *self.still_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail_stills.load(Ordering::Relaxed) {
            return Err(HardwareError::camera("capture_still", "simulated capture fault"));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(HardwareError::camera("capture_still", "camera closed"));
        }

        let settings = *self.settings.lock();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let jpeg = render_test_pattern(&settings, seq)?;
        self.stills.fetch_add(1, Ordering::Relaxed);
        Ok(jpeg)
    }

    fn reconfigure(&self, settings: &CameraSettings) -> Result<(), HardwareError> {
        *self.settings.lock() = *settings;
        tracing::info!(
            width = settings.width,
            height = settings.height,
            quality = settings.quality,
            "Simulated camera reconfigured"
        );
        Ok(())
    }

    fn stop(&self) -> Result<(), HardwareError> {
        let producer = self.producer.lock().take();
        if let Some(producer) = producer {
            producer.stop.store(true, Ordering::Release);
            producer
                .thread
                .join()
                .map_err(|_| HardwareError::camera("stop", "producer thread panicked"))?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), HardwareError> {
        self.stop()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Render a colour-bar frame shifted by `seq`
pub fn render_test_pattern(settings: &CameraSettings, seq: u64) -> Result<Vec<u8>, HardwareError> {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];

    let width = settings.width.max(8);
    let height = settings.height.max(8);
    let bar_width = (width / 8).max(1);
    let shift = (seq % u64::from(width)) as u32;

    let mut pixels = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..height {
        for x in 0..width {
            let bar = (((x + shift) % width) / bar_width).min(7) as usize;
            pixels.extend_from_slice(&BARS[bar]);
        }
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, settings.quality.clamp(1, 100))
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| HardwareError::camera("encode", e.to_string()))?;
    Ok(jpeg)
}

// ========================================
// Display
// ========================================

/// Display that keeps its two rows in memory
pub struct SimDisplay {
    rows: Mutex<[String; 2]>,
    fail_writes: AtomicBool,
    begun: AtomicBool,
    writes: AtomicU64,
}

impl SimDisplay {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new([String::new(), String::new()]),
            fail_writes: AtomicBool::new(false),
            begun: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    pub fn rows(&self) -> [String; 2] {
        self.rows.lock().clone()
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn is_begun(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }
}

impl Default for SimDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SimDisplay {
    fn begin(&self) -> Result<(), HardwareError> {
        self.begun.store(true, Ordering::Release);
        Ok(())
    }

    fn write_line(&self, row: u8, text: &str) -> Result<(), HardwareError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(HardwareError::display("write_line", "simulated bus error"));
        }
        let mut rows = self.rows.lock();
        let slot = rows
            .get_mut(row as usize)
            .ok_or_else(|| HardwareError::display("write_line", format!("row {} out of range", row)))?;
        *slot = text.to_string();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn clear(&self) -> Result<(), HardwareError> {
        let mut rows = self.rows.lock();
        rows[0].clear();
        rows[1].clear();
        Ok(())
    }
}

/// I2C bus with a configurable set of responding addresses
pub struct SimDisplayBus {
    present: Mutex<Vec<I2cAddress>>,
    opened: Mutex<Option<I2cAddress>>,
    display: Arc<SimDisplay>,
}

impl SimDisplayBus {
    pub fn new(present: Vec<I2cAddress>) -> Self {
        Self {
            present: Mutex::new(present),
            opened: Mutex::new(None),
            display: Arc::new(SimDisplay::new()),
        }
    }

    /// Replace the set of addresses that acknowledge
    pub fn set_present(&self, present: Vec<I2cAddress>) {
        *self.present.lock() = present;
    }

    /// Address the display was last opened at
    pub fn opened_address(&self) -> Option<I2cAddress> {
        *self.opened.lock()
    }
}

impl DisplayBus for SimDisplayBus {
    fn open(&self, address: I2cAddress) -> Result<Arc<dyn Display>, HardwareError> {
        if !self.present.lock().contains(&address) {
            return Err(HardwareError::display("open", format!("no ACK at {}", address)));
        }
        *self.opened.lock() = Some(address);
        Ok(self.display.clone())
    }
}
