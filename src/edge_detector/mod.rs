//! EdgeDetector - Sensor Transition Detection
//!
//! Tracks the last sampled value of each sensor channel and reports only
//! transitions, so a door that stays open is announced once.
//!
//! The detector is owned by the polling task. Its previous-state fields are
//! always overwritten with the newest sample, whatever happens downstream
//! (a failed capture or publish never rolls them back).

use crate::models::{SensorState, TriggerKind};

/// A change on one channel between two consecutive polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    DoorOpened,
    DoorClosed,
    MotionStarted,
    MotionStopped,
}

impl Transition {
    /// Capture trigger for activation transitions
    pub fn trigger(&self) -> Option<TriggerKind> {
        match self {
            Transition::DoorOpened => Some(TriggerKind::Door),
            Transition::MotionStarted => Some(TriggerKind::Motion),
            Transition::DoorClosed | Transition::MotionStopped => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::DoorOpened => "door_opened",
            Transition::DoorClosed => "door_closed",
            Transition::MotionStarted => "motion_started",
            Transition::MotionStopped => "motion_stopped",
        }
    }
}

/// Per-channel last-known state. `None` means never sampled.
#[derive(Debug, Default)]
pub struct EdgeDetector {
    door_open: Option<bool>,
    motion_detected: Option<bool>,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `sample` with the previous poll and return what changed
    ///
    /// Door transitions come before motion transitions. The unknown initial
    /// state matches nothing, so the first call reports both channels.
    pub fn observe(&mut self, sample: SensorState) -> Vec<Transition> {
        let mut transitions = Vec::with_capacity(2);

        if self.door_open != Some(sample.door_open) {
            transitions.push(if sample.door_open {
                Transition::DoorOpened
            } else {
                Transition::DoorClosed
            });
        }

        if self.motion_detected != Some(sample.motion_detected) {
            transitions.push(if sample.motion_detected {
                Transition::MotionStarted
            } else {
                Transition::MotionStopped
            });
        }

        self.door_open = Some(sample.door_open);
        self.motion_detected = Some(sample.motion_detected);

        if !transitions.is_empty() {
            tracing::debug!(
                door_open = sample.door_open,
                motion_detected = sample.motion_detected,
                transitions = ?transitions,
                "Sensor transition detected"
            );
        }

        transitions
    }

    /// Last sampled state, once both channels have been seen
    pub fn last_state(&self) -> Option<SensorState> {
        Some(SensorState::new(self.door_open?, self.motion_detected?))
    }
}
