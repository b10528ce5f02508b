//! sysfs GPIO driver
//!
//! Pins are exported on `setup`, outputs are driven low, and everything is
//! unexported again on `cleanup`. The door contact needs an external
//! pull-up: sysfs cannot configure bias.

use crate::hardware::{GpioPort, HardwareError, PinLayout, PinNumber};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

pub struct SysfsGpio {
    root: PathBuf,
    /// Offset added to BCM numbers (512 on recent Pi kernels)
    chip_base: u32,
    active: Mutex<Option<PinLayout>>,
}

impl SysfsGpio {
    pub fn new(root: PathBuf, chip_base: u32) -> Self {
        Self {
            root,
            chip_base,
            active: Mutex::new(None),
        }
    }

    fn line(&self, pin: PinNumber) -> u32 {
        self.chip_base + u32::from(pin)
    }

    fn pin_dir(&self, pin: PinNumber) -> PathBuf {
        self.root.join(format!("gpio{}", self.line(pin)))
    }

    fn export(&self, pin: PinNumber) -> Result<(), HardwareError> {
        if self.pin_dir(pin).exists() {
            return Ok(());
        }
        write_attr(&self.root.join("export"), &self.line(pin).to_string())
            .map_err(|e| HardwareError::gpio("export", format!("pin {}: {}", pin, e)))
    }

    fn unexport(&self, pin: PinNumber) -> Result<(), HardwareError> {
        if !self.pin_dir(pin).exists() {
            return Ok(());
        }
        write_attr(&self.root.join("unexport"), &self.line(pin).to_string())
            .map_err(|e| HardwareError::gpio("unexport", format!("pin {}: {}", pin, e)))
    }

    fn set_direction(&self, pin: PinNumber, direction: &str) -> Result<(), HardwareError> {
        write_attr(&self.pin_dir(pin).join("direction"), direction)
            .map_err(|e| HardwareError::gpio("direction", format!("pin {}: {}", pin, e)))
    }
}

impl GpioPort for SysfsGpio {
    fn setup(&self, layout: &PinLayout) -> Result<(), HardwareError> {
        for pin in layout.inputs() {
            self.export(pin)?;
            self.set_direction(pin, "in")?;
        }
        for pin in layout.outputs() {
            self.export(pin)?;
            // "low" sets direction and level in one write
            self.set_direction(pin, "low")?;
        }
        *self.active.lock() = Some(*layout);
        tracing::info!(chip_base = self.chip_base, layout = ?layout, "GPIO setup completed");
        Ok(())
    }

    fn read(&self, pin: PinNumber) -> Result<bool, HardwareError> {
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))
            .map_err(|e| HardwareError::gpio("read", format!("pin {}: {}", pin, e)))?;
        match raw.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(HardwareError::gpio(
                "read",
                format!("pin {}: unexpected value {:?}", pin, other),
            )),
        }
    }

    fn write(&self, pin: PinNumber, high: bool) -> Result<(), HardwareError> {
        write_attr(&self.pin_dir(pin).join("value"), if high { "1" } else { "0" })
            .map_err(|e| HardwareError::gpio("write", format!("pin {}: {}", pin, e)))
    }

    fn cleanup(&self) -> Result<(), HardwareError> {
        let Some(layout) = self.active.lock().take() else {
            return Ok(());
        };

        let mut first_error = None;
        for pin in layout.outputs() {
            if let Err(e) = self.write(pin, false) {
                first_error.get_or_insert(e);
            }
        }
        for pin in layout.inputs().into_iter().chain(layout.outputs()) {
            if let Err(e) = self.unexport(pin) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn write_attr(path: &Path, value: &str) -> std::io::Result<()> {
    fs::write(path, value)
}
