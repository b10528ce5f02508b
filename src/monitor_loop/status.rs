//! Monitor lifecycle phase, shared status and the handle given to the web layer

use super::Shutdown;
use crate::config_store::ConfigStore;
use crate::event_publisher::EventPublisher;
use crate::frame_buffer::FrameBuffer;
use crate::models::{SensorState, StatusEvent};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// INITIALIZING -> RUNNING -> SHUTTING_DOWN -> STOPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorPhase {
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

impl MonitorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorPhase::Initializing => "INITIALIZING",
            MonitorPhase::Running => "RUNNING",
            MonitorPhase::ShuttingDown => "SHUTTING_DOWN",
            MonitorPhase::Stopped => "STOPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MonitorCounters {
    pub polls: u64,
    pub sample_failures: u64,
    pub events: u64,
    pub captures: u64,
    pub capture_failures: u64,
    pub buzzer_activations: u64,
    pub display_failures: u64,
}

/// Latest view of the loop, written once per poll
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStatus {
    pub state: Option<SensorState>,
    pub last_event: Option<StatusEvent>,
    pub last_poll_at: Option<DateTime<Local>>,
    pub counters: MonitorCounters,
}

/// Cheap, cloneable access to a running monitor
#[derive(Clone)]
pub struct MonitorHandle {
    pub(super) phase: watch::Receiver<MonitorPhase>,
    pub(super) status: Arc<RwLock<MonitorStatus>>,
    pub(super) publisher: Arc<EventPublisher>,
    pub(super) frames: Arc<FrameBuffer>,
    pub(super) config: Arc<ConfigStore>,
    pub(super) shutdown: Shutdown,
    pub(super) image_dir: PathBuf,
}

impl MonitorHandle {
    pub fn phase(&self) -> MonitorPhase {
        *self.phase.borrow()
    }

    /// Wait until the monitor reaches `phase` (or any later one)
    pub async fn wait_for_phase(&self, phase: MonitorPhase) -> MonitorPhase {
        let mut rx = self.phase.clone();
        let rank = |p: &MonitorPhase| *p as u8;
        let target = rank(&phase);
        let reached = match rx.wait_for(|p| rank(p) >= target).await {
            Ok(reached) => Some(*reached),
            Err(_) => None,
        };
        reached.unwrap_or_else(|| *rx.borrow())
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.read().clone()
    }

    pub fn publisher(&self) -> &Arc<EventPublisher> {
        &self.publisher
    }

    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }
}
