//! Security Monitor Library
//!
//! Door/motion security monitor with live camera view and realtime status events
//!
//! ## Architecture (8 Components)
//!
//! 1. SensorSampler - Reads door and motion inputs
//! 2. EdgeDetector - Turns samples into OPEN/CLOSED/DETECTED/STOPPED transitions
//! 3. ActuatorController - Indicator LEDs and rate-limited buzzer
//! 4. CaptureService - Timestamped still capture to the image directory
//! 5. EventPublisher - Fan-out of status events to viewers
//! 6. FrameBuffer - Latest-wins live frame for MJPEG viewers
//! 7. MonitorLoop - Poll cycle and lifecycle state machine
//! 8. WebAPI - Status, streams, captures and settings over HTTP
//!
//! ## Design Principles
//!
//! - SSoT: ConfigStore holds the live settings
//! - Hardware access only through the traits in `hardware`
//! - One owner per device: the monitor loop

pub mod actuator_controller;
pub mod capture_service;
pub mod config_store;
pub mod edge_detector;
pub mod error;
pub mod event_publisher;
pub mod frame_buffer;
pub mod hardware;
pub mod models;
pub mod monitor_loop;
pub mod sensor_sampler;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
