//! HD44780 character LCD via the kernel charlcd driver
//!
//! The PCF8574 backpack is bound by a device-tree overlay; the kernel then
//! exposes the panel as a character device that understands the charlcd
//! escape sequences. Which backpack address is populated is found by
//! checking the I2C device directory for each candidate.

use crate::hardware::{Display, DisplayBus, HardwareError, I2cAddress};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Reinitialise, display on, cursor off, blink off, backlight on
const INIT_SEQUENCE: &str = "\x1b[LI\x1b[LD\x1b[Lc\x1b[Lb\x1b[L+";
const CLEAR: &str = "\x0c";

pub const LCD_COLUMNS: usize = 16;
pub const LCD_ROWS: u8 = 2;

pub struct CharLcd {
    device: PathBuf,
    file: Mutex<File>,
}

impl CharLcd {
    pub fn open(device: PathBuf) -> Result<Self, HardwareError> {
        let file = OpenOptions::new()
            .write(true)
            .open(&device)
            .map_err(|e| HardwareError::display("open", format!("{}: {}", device.display(), e)))?;
        Ok(Self {
            device,
            file: Mutex::new(file),
        })
    }

    fn send(&self, operation: &'static str, bytes: &str) -> Result<(), HardwareError> {
        let mut file = self.file.lock();
        file.write_all(bytes.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| HardwareError::display(operation, format!("{}: {}", self.device.display(), e)))
    }
}

/// Position at column 0 of `row` and pad/truncate to the panel width
fn row_command(row: u8, text: &str) -> String {
    let line: String = text.chars().take(LCD_COLUMNS).collect();
    format!("\x1b[Lx0y{};{:<width$}", row, line, width = LCD_COLUMNS)
}

impl Display for CharLcd {
    fn begin(&self) -> Result<(), HardwareError> {
        self.send("begin", INIT_SEQUENCE)?;
        self.send("begin", CLEAR)
    }

    fn write_line(&self, row: u8, text: &str) -> Result<(), HardwareError> {
        if row >= LCD_ROWS {
            return Err(HardwareError::display("write_line", format!("row {} out of range", row)));
        }
        self.send("write_line", &row_command(row, text))
    }

    fn clear(&self) -> Result<(), HardwareError> {
        self.send("clear", CLEAR)
    }
}

/// Finds the backpack on an I2C bus and opens the charlcd device for it
pub struct CharLcdBus {
    devices_root: PathBuf,
    bus: u8,
    device: PathBuf,
}

impl CharLcdBus {
    pub fn new(devices_root: PathBuf, bus: u8, device: PathBuf) -> Self {
        Self {
            devices_root,
            bus,
            device,
        }
    }

    /// sysfs name of a bound I2C client, e.g. `1-0027`
    fn client_dir(&self, address: I2cAddress) -> PathBuf {
        self.devices_root.join(format!("{}-{:04x}", self.bus, address.0))
    }
}

impl DisplayBus for CharLcdBus {
    fn open(&self, address: I2cAddress) -> Result<Arc<dyn Display>, HardwareError> {
        let client = self.client_dir(address);
        if !client.exists() {
            return Err(HardwareError::display(
                "probe",
                format!("no device bound at {}", client.display()),
            ));
        }
        Ok(Arc::new(CharLcd::open(self.device.clone())?))
    }
}
