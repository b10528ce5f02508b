//! SensorSampler - reads the door contact and PIR inputs
//!
//! A high level on the door pin means the contact is open (the switch pulls
//! the line low while the magnet is present). The PIR drives its pin high
//! while it sees motion.

use crate::hardware::{GpioPort, HardwareError, PinNumber};
use crate::models::SensorState;
use std::sync::Arc;

pub struct SensorSampler {
    gpio: Arc<dyn GpioPort>,
    door_pin: PinNumber,
    motion_pin: PinNumber,
}

impl SensorSampler {
    pub fn new(gpio: Arc<dyn GpioPort>, door_pin: PinNumber, motion_pin: PinNumber) -> Self {
        Self {
            gpio,
            door_pin,
            motion_pin,
        }
    }

    /// Point the sampler at new input pins after a GPIO reconfigure
    pub fn set_pins(&mut self, door_pin: PinNumber, motion_pin: PinNumber) {
        self.door_pin = door_pin;
        self.motion_pin = motion_pin;
    }

    pub fn sample(&self) -> Result<SensorState, HardwareError> {
        let door_open = self.gpio.read(self.door_pin)?;
        let motion_detected = self.gpio.read(self.motion_pin)?;
        Ok(SensorState {
            door_open,
            motion_detected,
        })
    }
}
