//! ActuatorController - LEDs and Buzzer
//!
//! ## Responsibilities
//!
//! - Mirror the door and motion state on their LEDs every poll
//! - Sound a short buzzer pulse while the door is open, at most once per
//!   buzzer interval
//!
//! The buzzer is rate limited, not edge triggered: it keeps re-firing every
//! interval for as long as the door stays open.

use crate::hardware::{GpioPort, PinLayout, PinNumber};
use crate::models::SensorState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What one `update` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorReport {
    pub buzzer_fired: bool,
    pub led_failures: u32,
}

pub struct ActuatorController {
    gpio: Arc<dyn GpioPort>,
    door_led: PinNumber,
    motion_led: PinNumber,
    buzzer: PinNumber,
    buzzer_interval: Duration,
    pulse: Duration,
    last_trigger: Option<Instant>,
    activations: u64,
}

impl ActuatorController {
    pub fn new(
        gpio: Arc<dyn GpioPort>,
        layout: &PinLayout,
        buzzer_interval: Duration,
        pulse: Duration,
    ) -> Self {
        Self {
            gpio,
            door_led: layout.door_led,
            motion_led: layout.motion_led,
            buzzer: layout.buzzer,
            buzzer_interval,
            pulse,
            last_trigger: None,
            activations: 0,
        }
    }

    /// Drive outputs for the current state
    pub async fn update(&mut self, state: SensorState, now: Instant) -> ActuatorReport {
        let mut report = ActuatorReport::default();

        for (pin, on, name) in [
            (self.door_led, state.door_open, "door_led"),
            (self.motion_led, state.motion_detected, "motion_led"),
        ] {
            if let Err(e) = self.gpio.write(pin, on) {
                report.led_failures += 1;
                tracing::warn!(subsystem = "gpio", operation = "write", output = name, pin = pin, error = %e, "LED update failed");
            }
        }

        if state.door_open && self.buzzer_due(now) {
            report.buzzer_fired = self.pulse_buzzer(now).await;
        }

        report
    }

    fn buzzer_due(&self, now: Instant) -> bool {
        match self.last_trigger {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.buzzer_interval,
        }
    }

    async fn pulse_buzzer(&mut self, now: Instant) -> bool {
        if let Err(e) = self.gpio.write(self.buzzer, true) {
            // Not recorded: the next poll tries again
            tracing::warn!(subsystem = "gpio", operation = "write", output = "buzzer", pin = self.buzzer, error = %e, "Buzzer skipped this cycle");
            return false;
        }

        if !self.pulse.is_zero() {
            tokio::time::sleep(self.pulse).await;
        }

        if let Err(e) = self.gpio.write(self.buzzer, false) {
            tracing::warn!(subsystem = "gpio", operation = "write", output = "buzzer", pin = self.buzzer, error = %e, "Buzzer release failed");
        }

        self.last_trigger = Some(now);
        self.activations += 1;
        tracing::debug!(activations = self.activations, "Buzzer pulsed");
        true
    }

    /// Follow a pin reassignment
    pub fn set_pins(&mut self, layout: &PinLayout) {
        self.door_led = layout.door_led;
        self.motion_led = layout.motion_led;
        self.buzzer = layout.buzzer;
    }

    pub fn set_timing(&mut self, buzzer_interval: Duration, pulse: Duration) {
        self.buzzer_interval = buzzer_interval;
        self.pulse = pulse;
    }

    pub fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    pub fn activations(&self) -> u64 {
        self.activations
    }
}
