//! ConfigStore - Single Source of Truth (SSoT)
//!
//! ## Responsibilities
//!
//! - Hold the live monitor settings
//! - Validate and apply partial updates
//! - Tell the monitor which subsystems must be re-initialised
//!
//! ## Design Principles
//!
//! - SSoT: all settings reads/writes go through here
//! - The monitor loop watches the store and applies changes between polls;
//!   the store itself never touches hardware

mod types;

pub use types::*;

use crate::error::Result;
use tokio::sync::watch;

/// ConfigStore instance
pub struct ConfigStore {
    tx: watch::Sender<MonitorSettings>,
}

impl ConfigStore {
    pub fn new(settings: MonitorSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx }
    }

    /// Current settings
    pub fn get(&self) -> MonitorSettings {
        self.tx.borrow().clone()
    }

    /// Receiver that is notified on every applied change
    pub fn subscribe(&self) -> watch::Receiver<MonitorSettings> {
        self.tx.subscribe()
    }

    /// Validate and apply a partial update
    ///
    /// Validation and merge happen against the value inside the channel, so
    /// concurrent updates cannot overwrite each other.
    pub fn update(&self, update: &SettingsUpdate) -> Result<ReloadPlan> {
        let mut outcome = Ok(ReloadPlan::default());
        self.tx.send_if_modified(|current| match current.apply(update) {
            Ok((next, plan)) => {
                outcome = Ok(plan);
                if plan.is_empty() {
                    return false;
                }
                *current = next;
                true
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });

        match &outcome {
            Ok(plan) if !plan.is_empty() => {
                tracing::info!(
                    gpio = plan.gpio,
                    camera = plan.camera,
                    timing = plan.timing,
                    "Settings updated"
                );
            }
            Ok(_) => tracing::debug!("Settings update changed nothing"),
            Err(e) => tracing::warn!(error = %e, "Settings update rejected"),
        }
        outcome
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(MonitorSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_update_notifies_watchers() {
        let store = ConfigStore::default();
        let mut rx = store.subscribe();

        let plan = store
            .update(&SettingsUpdate {
                motion_led_pin: Some(22),
                ..Default::default()
            })
            .unwrap();
        assert!(plan.gpio);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().motion_led_pin, 22);
        assert_eq!(store.get().motion_led_pin, 22);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_settings() {
        let store = ConfigStore::default();
        let rx = store.subscribe();

        let err = store
            .update(&SettingsUpdate {
                image_quality: Some(150),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.get(), MonitorSettings::default());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_noop_update_does_not_notify() {
        let store = ConfigStore::default();
        let rx = store.subscribe();

        let plan = store
            .update(&SettingsUpdate {
                buzzer_pin: Some(12),
                ..Default::default()
            })
            .unwrap();
        assert!(plan.is_empty());
        assert!(!rx.has_changed().unwrap());
    }
}
