//! Shared models and types for the security monitor
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Wire format of `StatusEvent::timestamp`
pub const EVENT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sampled state of both sensors for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SensorState {
    pub door_open: bool,
    pub motion_detected: bool,
}

impl SensorState {
    pub fn new(door_open: bool, motion_detected: bool) -> Self {
        Self {
            door_open,
            motion_detected,
        }
    }
}

/// Door channel as reported to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DoorState {
    Open,
    Closed,
}

impl From<bool> for DoorState {
    fn from(open: bool) -> Self {
        if open {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }
}

/// Motion channel as reported to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MotionState {
    Detected,
    None,
}

impl From<bool> for MotionState {
    fn from(detected: bool) -> Self {
        if detected {
            MotionState::Detected
        } else {
            MotionState::None
        }
    }
}

/// What caused an image capture. Also the filename prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Door,
    Motion,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Door => "door",
            TriggerKind::Motion => "motion",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event pushed to every viewer on a detected state change
///
/// Immutable once built; subscribers each receive their own copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub door: DoorState,
    pub motion: MotionState,
    #[serde(serialize_with = "serialize_event_timestamp")]
    pub timestamp: DateTime<Local>,
    pub image: Option<String>,
}

impl StatusEvent {
    /// Build an event from the sampled state
    pub fn new(state: SensorState, timestamp: DateTime<Local>, image: Option<String>) -> Self {
        Self {
            door: state.door_open.into(),
            motion: state.motion_detected.into(),
            timestamp,
            image,
        }
    }

    /// One-line JSON used by the SSE and WebSocket transports
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn serialize_event_timestamp<S>(ts: &DateTime<Local>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(&ts.format(EVENT_TIMESTAMP_FORMAT))
}

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub phase: String,
}
