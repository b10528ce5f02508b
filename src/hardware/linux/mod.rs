//! Linux hardware backend
//!
//! - GPIO through the sysfs interface (`/sys/class/gpio`)
//! - Camera through an ffmpeg V4L2 capture emitting MJPEG on stdout
//! - HD44780 LCD through the kernel `charlcd` device (`/dev/lcd`)

mod camera;
mod gpio;
mod lcd;

pub use camera::{FfmpegCamera, MjpegSplitter};
pub use gpio::SysfsGpio;
pub use lcd::{CharLcd, CharLcdBus};
