//! MonitorLoop - Sensor-to-Event Reactive Loop
//!
//! ## Responsibilities
//!
//! - Bring up GPIO, camera and display (any failure is fatal)
//! - Poll the sensors at a fixed period and detect transitions
//! - Capture a still for door-opened / motion-started transitions
//! - Publish one StatusEvent per poll that changed something
//! - Drive LEDs and the rate-limited buzzer every poll
//! - Refresh the character display on its own interval
//! - Apply settings changes between polls
//! - On shutdown, release viewers and hardware exactly once
//!
//! ## Lifecycle
//!
//! `Monitor::initialize` (INITIALIZING) -> `Monitor::run` (RUNNING) ->
//! shutdown requested (SHUTTING_DOWN) -> resources released (STOPPED)
//!
//! The loop owns the edge detector and actuator state; the web layer only
//! sees them through [`MonitorHandle`].

mod display;
mod shutdown;
mod status;

pub use shutdown::Shutdown;
pub use status::{MonitorCounters, MonitorHandle, MonitorPhase, MonitorStatus};

use crate::actuator_controller::ActuatorController;
use crate::capture_service::{CaptureError, CaptureService};
use crate::config_store::{ConfigStore, MonitorSettings, ReloadPlan};
use crate::edge_detector::{EdgeDetector, Transition};
use crate::event_publisher::EventPublisher;
use crate::frame_buffer::FrameBuffer;
use crate::hardware::{
    discover, Camera, Display, DisplayBus, FatalInitError, GpioPort, HardwareParts, HardwareSet,
    Subsystem, LCD_ADDRESS_CANDIDATES,
};
use crate::models::{SensorState, StatusEvent, TriggerKind};
use crate::sensor_sampler::SensorSampler;
use chrono::Local;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

/// Process-level options that are not part of the live settings
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub image_dir: PathBuf,
    pub capture_timeout: Duration,
    /// Apply interval changes without a restart
    pub hot_reload_intervals: bool,
    pub subscriber_queue: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("static/captures"),
            capture_timeout: Duration::from_secs(3),
            hot_reload_intervals: true,
            subscriber_queue: crate::event_publisher::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// The polling loop and everything it owns
pub struct Monitor {
    hardware: HardwareSet,
    sampler: SensorSampler,
    detector: EdgeDetector,
    actuators: ActuatorController,
    capture: CaptureService,
    publisher: Arc<EventPublisher>,
    frames: Arc<FrameBuffer>,
    config: Arc<ConfigStore>,
    settings_rx: watch::Receiver<MonitorSettings>,
    /// Settings the loop is currently running with
    settings: MonitorSettings,
    options: MonitorOptions,
    phase_tx: watch::Sender<MonitorPhase>,
    status: Arc<RwLock<MonitorStatus>>,
    shutdown: Shutdown,
    last_capture: HashMap<TriggerKind, Instant>,
    last_display: Option<Instant>,
}

impl Monitor {
    /// Bring up every peripheral and build the loop
    pub async fn initialize(
        parts: HardwareParts,
        config: Arc<ConfigStore>,
        options: MonitorOptions,
    ) -> Result<Self, FatalInitError> {
        let (phase_tx, _) = watch::channel(MonitorPhase::Initializing);
        let settings_rx = config.subscribe();
        let settings = config.get();
        let layout = settings.pin_layout();

        tracing::info!(
            image_dir = %options.image_dir.display(),
            poll_period_ms = settings.poll_period.as_millis() as u64,
            "Initializing monitor"
        );

        tokio::fs::create_dir_all(&options.image_dir)
            .await
            .map_err(|source| FatalInitError::ImageDir {
                path: options.image_dir.clone(),
                source,
            })?;

        let HardwareParts {
            gpio,
            camera,
            display_bus,
            ..
        } = parts;

        gpio.setup(&layout).map_err(FatalInitError::Gpio)?;
        tracing::info!(pins = ?layout, "GPIO ready");

        let frames = Arc::new(FrameBuffer::new());
        if let Err(e) = camera
            .reconfigure(&settings.camera_settings())
            .and_then(|_| camera.start(frames.clone()))
        {
            abort_init(gpio.as_ref(), camera.as_ref());
            return Err(FatalInitError::Camera(e));
        }
        tracing::info!(
            width = settings.image_width,
            height = settings.image_height,
            quality = settings.image_quality,
            "Camera streaming"
        );

        let display = match open_display(display_bus.as_ref()) {
            Ok(display) => display,
            Err(e) => {
                abort_init(gpio.as_ref(), camera.as_ref());
                return Err(e);
            }
        };

        let sampler = SensorSampler::new(gpio.clone(), layout.door_sensor, layout.motion_sensor);
        let actuators = ActuatorController::new(
            gpio.clone(),
            &layout,
            settings.buzzer_interval,
            settings.buzzer_pulse,
        );
        let capture = CaptureService::new(
            camera.clone(),
            options.image_dir.clone(),
            options.capture_timeout,
        );

        Ok(Self {
            hardware: HardwareSet::new(gpio, camera, display),
            sampler,
            detector: EdgeDetector::new(),
            actuators,
            capture,
            publisher: Arc::new(EventPublisher::new(options.subscriber_queue)),
            frames,
            config,
            settings_rx,
            settings,
            options,
            phase_tx,
            status: Arc::new(RwLock::new(MonitorStatus::default())),
            shutdown: Shutdown::new(),
            last_capture: HashMap::new(),
            last_display: None,
        })
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            phase: self.phase_tx.subscribe(),
            status: self.status.clone(),
            publisher: self.publisher.clone(),
            frames: self.frames.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.clone(),
            image_dir: self.options.image_dir.clone(),
        }
    }

    /// Poll until shutdown is requested, then release everything
    pub async fn run(mut self) {
        self.set_phase(MonitorPhase::Running);
        tracing::info!("Monitor running");

        let stop = self.shutdown.clone();
        let mut ticker = poll_ticker(self.settings.poll_period);

        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                _ = ticker.tick() => {}
            }

            self.apply_settings_changes(&mut ticker);
            self.poll_once().await;

            if stop.is_triggered() {
                break;
            }
        }

        self.finish().await;
    }

    /// One sample -> detect -> capture/publish -> actuate -> display pass
    async fn poll_once(&mut self) {
        let now = Instant::now();

        let state = match self.sampler.sample() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    subsystem = %e.subsystem,
                    operation = e.operation,
                    error = %e,
                    "Sensor sample failed, skipping poll"
                );
                let mut status = self.status.write();
                status.counters.polls += 1;
                status.counters.sample_failures += 1;
                return;
            }
        };

        let transitions = self.detector.observe(state);

        let mut event = None;
        let mut captured = None;
        if !transitions.is_empty() {
            let image = match self.capture_trigger(&transitions, now) {
                Some(trigger) => {
                    let result = self.capture.capture(trigger).await;
                    captured = Some(result.is_ok());
                    match result {
                        Ok(filename) => {
                            self.last_capture.insert(trigger, now);
                            Some(filename)
                        }
                        Err(e) => {
                            log_capture_failure(trigger, &e);
                            None
                        }
                    }
                }
                None => None,
            };

            let status_event = StatusEvent::new(state, Local::now(), image);
            let report = self.publisher.publish(status_event.clone()).await;
            tracing::info!(
                transitions = ?transitions.iter().map(Transition::as_str).collect::<Vec<_>>(),
                image = ?status_event.image,
                delivered = report.delivered,
                dropped = report.dropped.len(),
                "Status event published"
            );
            event = Some(status_event);
        }

        let actuation = self.actuators.update(state, now).await;
        let display_ok = self.refresh_display(&state, now);

        let mut status = self.status.write();
        status.state = Some(state);
        status.last_poll_at = Some(Local::now());
        status.counters.polls += 1;
        if let Some(event) = event {
            status.counters.events += 1;
            status.last_event = Some(event);
        }
        match captured {
            Some(true) => status.counters.captures += 1,
            Some(false) => status.counters.capture_failures += 1,
            None => {}
        }
        if actuation.buzzer_fired {
            status.counters.buzzer_activations += 1;
        }
        if display_ok == Some(false) {
            status.counters.display_failures += 1;
        }
    }

    /// Highest-priority activation of this poll, unless it is cooling down
    fn capture_trigger(&self, transitions: &[Transition], now: Instant) -> Option<TriggerKind> {
        let trigger = transitions.iter().find_map(Transition::trigger)?;
        if let Some(last) = self.last_capture.get(&trigger) {
            if now.saturating_duration_since(*last) < self.settings.capture_interval {
                tracing::debug!(trigger = %trigger, "Capture cooling down");
                return None;
            }
        }
        Some(trigger)
    }

    /// Write both rows if the display interval elapsed. `None` when not due.
    fn refresh_display(&mut self, state: &SensorState, now: Instant) -> Option<bool> {
        if let Some(last) = self.last_display {
            if now.saturating_duration_since(last) < self.settings.display_update_interval {
                return None;
            }
        }
        self.last_display = Some(now);

        for (row, text) in display::lines(state).into_iter().enumerate() {
            if let Err(e) = self.hardware.display.write_line(row as u8, text) {
                tracing::warn!(
                    subsystem = "display",
                    operation = "write_line",
                    row = row,
                    error = %e,
                    "Display refresh failed"
                );
                return Some(false);
            }
        }
        Some(true)
    }

    /// Pick up settings published by the store since the last poll
    fn apply_settings_changes(&mut self, ticker: &mut Interval) {
        if !self.settings_rx.has_changed().unwrap_or(false) {
            return;
        }
        let mut next = self.settings_rx.borrow_and_update().clone();
        let plan = ReloadPlan::between(&self.settings, &next);

        if plan.gpio {
            let layout = next.pin_layout();
            match self.hardware.gpio.reconfigure(&layout) {
                Ok(()) => tracing::info!(pins = ?layout, "GPIO reconfigured"),
                Err(e) => tracing::error!(
                    subsystem = "gpio",
                    operation = "reconfigure",
                    error = %e,
                    "GPIO reconfigure failed"
                ),
            }
            self.sampler.set_pins(layout.door_sensor, layout.motion_sensor);
            self.actuators.set_pins(&layout);
        }

        if plan.camera {
            let camera = next.camera_settings();
            match self.hardware.camera.reconfigure(&camera) {
                Ok(()) => tracing::info!(
                    width = camera.width,
                    height = camera.height,
                    quality = camera.quality,
                    "Camera reconfigured"
                ),
                Err(e) => tracing::error!(
                    subsystem = "camera",
                    operation = "reconfigure",
                    error = %e,
                    "Camera reconfigure failed"
                ),
            }
        }

        if plan.timing {
            if self.options.hot_reload_intervals {
                self.actuators.set_timing(next.buzzer_interval, next.buzzer_pulse);
                if next.poll_period != self.settings.poll_period {
                    *ticker = poll_ticker(next.poll_period);
                }
                tracing::info!(
                    buzzer_interval_ms = next.buzzer_interval.as_millis() as u64,
                    capture_interval_ms = next.capture_interval.as_millis() as u64,
                    poll_period_ms = next.poll_period.as_millis() as u64,
                    "Timing settings applied"
                );
            } else {
                next.buzzer_interval = self.settings.buzzer_interval;
                next.capture_interval = self.settings.capture_interval;
                next.display_update_interval = self.settings.display_update_interval;
                next.poll_period = self.settings.poll_period;
                next.buzzer_pulse = self.settings.buzzer_pulse;
                tracing::info!("Timing settings changed; they take effect after restart");
            }
        }

        self.settings = next;
    }

    async fn finish(self) {
        self.set_phase(MonitorPhase::ShuttingDown);
        tracing::info!("Monitor shutting down");

        self.frames.close();
        self.publisher.close_all().await;
        self.hardware.release();

        self.set_phase(MonitorPhase::Stopped);
        tracing::info!("Monitor stopped");
    }

    fn set_phase(&self, phase: MonitorPhase) {
        self.phase_tx.send_replace(phase);
    }
}

fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Probe the LCD backpack addresses in order and initialise the first that answers
fn open_display(bus: &dyn DisplayBus) -> Result<Arc<dyn Display>, FatalInitError> {
    let found = discover(&LCD_ADDRESS_CANDIDATES, |address| {
        let display = bus.open(*address)?;
        display.begin()?;
        Ok::<_, crate::hardware::HardwareError>(display)
    })
    .map_err(|source| FatalInitError::NoCandidate {
        subsystem: Subsystem::Display,
        source,
    })?;

    for attempt in &found.skipped {
        tracing::debug!(address = %attempt.candidate, error = %attempt.error, "LCD not at address");
    }
    tracing::info!(address = %found.candidate, "LCD ready");
    Ok(found.value)
}

/// Undo the parts of initialisation that already succeeded
fn abort_init(gpio: &dyn GpioPort, camera: &dyn Camera) {
    if let Err(e) = camera.close() {
        tracing::warn!(subsystem = "camera", operation = "close", error = %e, "Cleanup step failed");
    }
    if let Err(e) = gpio.cleanup() {
        tracing::warn!(subsystem = "gpio", operation = "cleanup", error = %e, "Cleanup step failed");
    }
}

fn log_capture_failure(trigger: TriggerKind, error: &CaptureError) {
    match error {
        CaptureError::HardwareFailure(e) => tracing::warn!(
            subsystem = %e.subsystem,
            operation = e.operation,
            trigger = %trigger,
            error = %e,
            "Capture failed, publishing without image"
        ),
        other => tracing::warn!(
            subsystem = "camera",
            operation = "capture",
            trigger = %trigger,
            error = %other,
            "Capture failed, publishing without image"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_store::SettingsUpdate;
    use crate::hardware::sim::SimHandles;
    use crate::hardware::{CameraSettings, I2cAddress};
    use crate::models::DoorState;

    fn fast_settings() -> MonitorSettings {
        MonitorSettings {
            poll_period: Duration::from_millis(10),
            buzzer_pulse: Duration::from_millis(1),
            capture_interval: Duration::from_millis(1),
            display_update_interval: Duration::from_millis(10),
            image_width: 32,
            image_height: 24,
            ..MonitorSettings::default()
        }
    }

    fn parts(sim: &SimHandles) -> HardwareParts {
        HardwareParts {
            gpio: sim.gpio.clone(),
            camera: sim.camera.clone(),
            display_bus: sim.display_bus.clone(),
            simulator: Some(sim.clone()),
        }
    }

    async fn start(
        settings: MonitorSettings,
    ) -> (tempfile::TempDir, SimHandles, Monitor) {
        let dir = tempfile::tempdir().unwrap();
        let sim = SimHandles::new(settings.camera_settings(), 20);
        let options = MonitorOptions {
            image_dir: dir.path().join("captures"),
            capture_timeout: Duration::from_secs(2),
            ..MonitorOptions::default()
        };
        let monitor = Monitor::initialize(parts(&sim), Arc::new(ConfigStore::new(settings)), options)
            .await
            .unwrap();
        (dir, sim, monitor)
    }

    #[tokio::test]
    async fn test_initialize_brings_up_hardware() {
        let (dir, sim, monitor) = start(fast_settings()).await;
        assert!(dir.path().join("captures").is_dir());
        assert_eq!(sim.gpio.setup_count(), 1);
        assert!(sim.camera.is_streaming());
        assert!(sim.display().is_begun());
        assert_eq!(monitor.handle().phase(), MonitorPhase::Initializing);
    }

    #[tokio::test]
    async fn test_display_found_at_second_address() {
        let sim = SimHandles::new(CameraSettings::default(), 5);
        sim.display_bus.set_present(vec![I2cAddress(0x3F)]);
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            image_dir: dir.path().to_path_buf(),
            ..MonitorOptions::default()
        };

        let monitor = Monitor::initialize(parts(&sim), Arc::new(ConfigStore::default()), options)
            .await
            .unwrap();
        assert_eq!(sim.display_bus.opened_address(), Some(I2cAddress(0x3F)));
        drop(monitor);
    }

    #[tokio::test]
    async fn test_missing_display_is_fatal_and_cleans_up() {
        let sim = SimHandles::new(CameraSettings::default(), 5);
        sim.display_bus.set_present(vec![]);
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            image_dir: dir.path().to_path_buf(),
            ..MonitorOptions::default()
        };

        let err = Monitor::initialize(parts(&sim), Arc::new(ConfigStore::default()), options)
            .await
            .err()
            .unwrap();
        match err {
            FatalInitError::NoCandidate { subsystem, source } => {
                assert_eq!(subsystem, Subsystem::Display);
                assert_eq!(source.attempts.len(), 2);
                assert_eq!(source.attempts[0].candidate, "0x27");
                assert_eq!(source.attempts[1].candidate, "0x3f");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.gpio.cleanup_count(), 1);
        assert!(sim.camera.is_closed());
    }

    #[tokio::test]
    async fn test_gpio_failure_is_fatal() {
        let sim = SimHandles::new(CameraSettings::default(), 5);
        sim.gpio.set_fail_setup(true);
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            image_dir: dir.path().to_path_buf(),
            ..MonitorOptions::default()
        };

        let err = Monitor::initialize(parts(&sim), Arc::new(ConfigStore::default()), options)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FatalInitError::Gpio(_)));
    }

    #[tokio::test]
    async fn test_camera_failure_is_fatal_and_cleans_up() {
        let sim = SimHandles::new(CameraSettings::default(), 5);
        sim.camera.set_fail_start(true);
        let dir = tempfile::tempdir().unwrap();
        let options = MonitorOptions {
            image_dir: dir.path().to_path_buf(),
            ..MonitorOptions::default()
        };

        let err = Monitor::initialize(parts(&sim), Arc::new(ConfigStore::default()), options)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FatalInitError::Camera(_)));
        assert_eq!(sim.gpio.cleanup_count(), 1);
        assert!(sim.camera.is_closed());
        assert!(!sim.display().is_begun());
    }

    #[tokio::test]
    async fn test_wait_for_phase_returns_current_when_monitor_dropped() {
        let (_dir, _sim, monitor) = start(fast_settings()).await;
        let handle = monitor.handle();
        drop(monitor);

        let phase = tokio::time::timeout(
            Duration::from_secs(1),
            handle.wait_for_phase(MonitorPhase::Running),
        )
        .await
        .unwrap();
        assert_eq!(phase, MonitorPhase::Initializing);
    }

    #[tokio::test]
    async fn test_door_open_publishes_event_with_capture() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;
        let mut events = monitor.publisher.subscribe().await;

        sim.gpio.set_sensors(SensorState::new(false, false));
        monitor.poll_once().await;
        let initial = events.recv().await.unwrap();
        assert_eq!(initial.door, DoorState::Closed);
        assert_eq!(initial.image, None);

        sim.gpio.set_sensors(SensorState::new(true, false));
        monitor.poll_once().await;
        let opened = events.recv().await.unwrap();
        assert_eq!(opened.door, DoorState::Open);
        let image = opened.image.unwrap();
        assert!(image.starts_with("door_"));
        assert!(monitor.options.image_dir.join(&image).is_file());

        // Door stays open: no new event
        monitor.poll_once().await;
        assert!(events.try_recv().is_none());

        let status = monitor.handle().status();
        assert_eq!(status.counters.polls, 3);
        assert_eq!(status.counters.events, 2);
        assert_eq!(status.counters.captures, 1);
        assert_eq!(status.state, Some(SensorState::new(true, false)));
    }

    #[tokio::test]
    async fn test_door_preferred_over_motion() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;
        let mut events = monitor.publisher.subscribe().await;

        sim.gpio.set_sensors(SensorState::new(false, false));
        monitor.poll_once().await;
        events.recv().await.unwrap();

        sim.gpio.set_sensors(SensorState::new(true, true));
        monitor.poll_once().await;
        let event = events.recv().await.unwrap();
        assert!(event.image.unwrap().starts_with("door_"));
        assert_eq!(sim.camera.stills_taken(), 1);
    }

    #[tokio::test]
    async fn test_capture_failure_publishes_without_image() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;
        let mut events = monitor.publisher.subscribe().await;
        sim.camera.set_fail_stills(true);

        sim.gpio.set_sensors(SensorState::new(false, true));
        monitor.poll_once().await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.image, None);
        assert_eq!(monitor.handle().status().counters.capture_failures, 1);
    }

    #[tokio::test]
    async fn test_capture_cooldown_per_trigger() {
        let settings = MonitorSettings {
            capture_interval: Duration::from_secs(60),
            ..fast_settings()
        };
        let (_dir, sim, mut monitor) = start(settings).await;
        let mut events = monitor.publisher.subscribe().await;

        for open in [false, true, false, true] {
            sim.gpio.set_sensors(SensorState::new(open, false));
            monitor.poll_once().await;
        }

        let images: Vec<Option<String>> =
            (0..4).map(|_| events.try_recv().unwrap().image).collect();
        assert!(images[1].is_some());
        assert_eq!(images[3], None);
        assert_eq!(sim.camera.stills_taken(), 1);
    }

    #[tokio::test]
    async fn test_sample_failure_skips_poll() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;
        let mut events = monitor.publisher.subscribe().await;
        sim.gpio.set_fail_reads(true);

        monitor.poll_once().await;
        assert!(events.try_recv().is_none());
        assert_eq!(monitor.detector.last_state(), None);
        assert_eq!(monitor.handle().status().counters.sample_failures, 1);
    }

    #[tokio::test]
    async fn test_display_shows_state() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;

        sim.gpio.set_sensors(SensorState::new(true, true));
        monitor.poll_once().await;
        assert_eq!(sim.display().rows(), ["Door: OPEN   ", "Motion: YES  "]);

        sim.display().set_fail_writes(true);
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.poll_once().await;
        assert_eq!(monitor.handle().status().counters.display_failures, 1);
    }

    #[tokio::test]
    async fn test_settings_change_reconfigures_gpio() {
        let (_dir, sim, mut monitor) = start(fast_settings()).await;
        let mut ticker = poll_ticker(monitor.settings.poll_period);

        monitor
            .config
            .update(&SettingsUpdate {
                door_sensor_pin: Some(5),
                image_quality: Some(50),
                ..Default::default()
            })
            .unwrap();
        monitor.apply_settings_changes(&mut ticker);

        assert_eq!(sim.gpio.layout().unwrap().door_sensor, 5);
        assert_eq!(sim.camera.settings().quality, 50);

        sim.gpio.set_input(5, true);
        monitor.poll_once().await;
        assert_eq!(monitor.detector.last_state(), Some(SensorState::new(true, false)));
    }

    #[tokio::test]
    async fn test_interval_changes_deferred_without_hot_reload() {
        let (_dir, _sim, mut monitor) = start(fast_settings()).await;
        monitor.options.hot_reload_intervals = false;
        let mut ticker = poll_ticker(monitor.settings.poll_period);

        monitor
            .config
            .update(&SettingsUpdate {
                capture_interval: Some(30.0),
                ..Default::default()
            })
            .unwrap();
        monitor.apply_settings_changes(&mut ticker);

        assert_eq!(monitor.settings.capture_interval, Duration::from_millis(1));
        assert_eq!(monitor.config.get().capture_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_run_until_shutdown_releases_once() {
        let (_dir, sim, monitor) = start(fast_settings()).await;
        let handle = monitor.handle();
        let mut events = handle.publisher().subscribe().await;

        let task = tokio::spawn(monitor.run());
        assert_eq!(handle.wait_for_phase(MonitorPhase::Running).await, MonitorPhase::Running);
        while handle.status().counters.polls < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        handle.shutdown().trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handle.phase(), MonitorPhase::Stopped);
        assert_eq!(sim.gpio.cleanup_count(), 1);
        assert!(sim.camera.is_closed());
        assert!(handle.frames().is_closed());

        // Drain whatever was published, then the stream ends
        while events.recv().await.is_some() {}
        handle.shutdown().trigger();
    }
}
