//! ConfigStore data types
//!
//! Monitor settings, partial updates and the reload plan derived from them

use crate::error::{Error, Result};
use crate::hardware::{CameraSettings, PinLayout, PinNumber};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest usable BCM pin on the 40-pin header
pub const MAX_PIN: i64 = 27;

/// Shortest accepted interval or period
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Named monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub door_sensor_pin: PinNumber,
    pub motion_sensor_pin: PinNumber,
    pub door_led_pin: PinNumber,
    pub motion_led_pin: PinNumber,
    pub buzzer_pin: PinNumber,
    /// Minimum time between buzzer activations
    #[serde(with = "duration_secs")]
    pub buzzer_interval: Duration,
    /// Minimum time between captures for the same trigger
    #[serde(with = "duration_secs")]
    pub capture_interval: Duration,
    #[serde(with = "duration_secs")]
    pub display_update_interval: Duration,
    #[serde(with = "duration_secs")]
    pub poll_period: Duration,
    #[serde(with = "duration_secs")]
    pub buzzer_pulse: Duration,
    pub image_width: u32,
    pub image_height: u32,
    pub image_quality: u8,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let pins = PinLayout::default();
        let camera = CameraSettings::default();
        Self {
            door_sensor_pin: pins.door_sensor,
            motion_sensor_pin: pins.motion_sensor,
            door_led_pin: pins.door_led,
            motion_led_pin: pins.motion_led,
            buzzer_pin: pins.buzzer,
            buzzer_interval: Duration::from_secs(3),
            capture_interval: Duration::from_secs(5),
            display_update_interval: Duration::from_millis(500),
            poll_period: Duration::from_millis(100),
            buzzer_pulse: Duration::from_millis(100),
            image_width: camera.width,
            image_height: camera.height,
            image_quality: camera.quality,
        }
    }
}

impl MonitorSettings {
    /// Defaults overridden by `DOOR_SENSOR_PIN`, `BUZZER_INTERVAL`, ... when set
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let update = SettingsUpdate::from_lookup(lookup)?;
        let (settings, _) = Self::default().apply(&update)?;
        Ok(settings)
    }

    pub fn pin_layout(&self) -> PinLayout {
        PinLayout {
            door_sensor: self.door_sensor_pin,
            motion_sensor: self.motion_sensor_pin,
            door_led: self.door_led_pin,
            motion_led: self.motion_led_pin,
            buzzer: self.buzzer_pin,
        }
    }

    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            width: self.image_width,
            height: self.image_height,
            quality: self.image_quality,
        }
    }

    /// Validate `update` and return the merged settings plus what must reload
    pub fn apply(&self, update: &SettingsUpdate) -> Result<(MonitorSettings, ReloadPlan)> {
        update.validate()?;

        let mut next = self.clone();
        let pin = |value: Option<i64>, current: PinNumber| {
            value.map(|v| v as PinNumber).unwrap_or(current)
        };
        next.door_sensor_pin = pin(update.door_sensor_pin, next.door_sensor_pin);
        next.motion_sensor_pin = pin(update.motion_sensor_pin, next.motion_sensor_pin);
        next.door_led_pin = pin(update.door_led_pin, next.door_led_pin);
        next.motion_led_pin = pin(update.motion_led_pin, next.motion_led_pin);
        next.buzzer_pin = pin(update.buzzer_pin, next.buzzer_pin);

        let secs = |name: &str, value: Option<f64>, current: Duration| match value {
            Some(secs) => interval_from_secs(name, secs),
            None => Ok(current),
        };
        next.buzzer_interval = secs("buzzer_interval", update.buzzer_interval, next.buzzer_interval)?;
        next.capture_interval =
            secs("capture_interval", update.capture_interval, next.capture_interval)?;
        next.display_update_interval = secs(
            "display_update_interval",
            update.display_update_interval,
            next.display_update_interval,
        )?;
        next.poll_period = secs("poll_period", update.poll_period, next.poll_period)?;
        next.buzzer_pulse = secs("buzzer_pulse", update.buzzer_pulse, next.buzzer_pulse)?;

        if let Some(width) = update.image_width {
            next.image_width = width;
        }
        if let Some(height) = update.image_height {
            next.image_height = height;
        }
        if let Some(quality) = update.image_quality {
            next.image_quality = quality as u8;
        }

        next.check_pin_conflicts()?;

        let plan = ReloadPlan::between(self, &next);
        Ok((next, plan))
    }

    fn check_pin_conflicts(&self) -> Result<()> {
        let layout = self.pin_layout();
        let mut pins: Vec<PinNumber> = layout.inputs().into_iter().chain(layout.outputs()).collect();
        pins.sort_unstable();
        if let Some(pair) = pins.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::Validation(format!("pin {} assigned twice", pair[0])));
        }
        Ok(())
    }
}

/// Partial settings update (`PUT /api/settings`)
///
/// Intervals are in seconds. Pins and quality are taken as plain integers so
/// out-of-range values are reported by validation rather than rejected by
/// the JSON decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub door_sensor_pin: Option<i64>,
    pub motion_sensor_pin: Option<i64>,
    pub door_led_pin: Option<i64>,
    pub motion_led_pin: Option<i64>,
    pub buzzer_pin: Option<i64>,
    pub buzzer_interval: Option<f64>,
    pub capture_interval: Option<f64>,
    pub display_update_interval: Option<f64>,
    pub poll_period: Option<f64>,
    pub buzzer_pulse: Option<f64>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub image_quality: Option<i64>,
}

impl SettingsUpdate {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("door_sensor_pin", self.door_sensor_pin),
            ("motion_sensor_pin", self.motion_sensor_pin),
            ("door_led_pin", self.door_led_pin),
            ("motion_led_pin", self.motion_led_pin),
            ("buzzer_pin", self.buzzer_pin),
        ] {
            if let Some(pin) = value {
                if !(0..=MAX_PIN).contains(&pin) {
                    return Err(Error::Validation(format!(
                        "{} must be between 0 and {}, got {}",
                        name, MAX_PIN, pin
                    )));
                }
            }
        }

        for (name, value) in [
            ("buzzer_interval", self.buzzer_interval),
            ("capture_interval", self.capture_interval),
            ("display_update_interval", self.display_update_interval),
            ("poll_period", self.poll_period),
            ("buzzer_pulse", self.buzzer_pulse),
        ] {
            if let Some(secs) = value {
                interval_from_secs(name, secs)?;
            }
        }

        if self.image_width == Some(0) || self.image_height == Some(0) {
            return Err(Error::Validation("image resolution must be non-zero".to_string()));
        }

        if let Some(quality) = self.image_quality {
            if !(0..=100).contains(&quality) {
                return Err(Error::Validation(format!(
                    "image_quality must be between 0 and 100, got {}",
                    quality
                )));
            }
        }

        Ok(())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Result<Option<T>> {
            match lookup(key) {
                None => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| Error::Config(format!("{} has invalid value {:?}", key, raw))),
            }
        }

        let millis = |key: &str| -> Result<Option<f64>> {
            Ok(parse::<u64>(&lookup, key)?.map(|ms| ms as f64 / 1000.0))
        };

        Ok(Self {
            door_sensor_pin: parse(&lookup, "DOOR_SENSOR_PIN")?,
            motion_sensor_pin: parse(&lookup, "MOTION_SENSOR_PIN")?,
            door_led_pin: parse(&lookup, "DOOR_LED_PIN")?,
            motion_led_pin: parse(&lookup, "MOTION_LED_PIN")?,
            buzzer_pin: parse(&lookup, "BUZZER_PIN")?,
            buzzer_interval: parse(&lookup, "BUZZER_INTERVAL")?,
            capture_interval: parse(&lookup, "CAPTURE_INTERVAL")?,
            display_update_interval: parse(&lookup, "DISPLAY_UPDATE_INTERVAL")?,
            poll_period: millis("POLL_PERIOD_MS")?,
            buzzer_pulse: millis("BUZZER_PULSE_MS")?,
            image_width: parse(&lookup, "IMAGE_WIDTH")?,
            image_height: parse(&lookup, "IMAGE_HEIGHT")?,
            image_quality: parse(&lookup, "IMAGE_QUALITY")?,
        })
    }
}

/// Seconds to a Duration of at least [`MIN_INTERVAL`]
fn interval_from_secs(name: &str, secs: f64) -> Result<Duration> {
    let duration = Duration::try_from_secs_f64(secs).map_err(|_| {
        Error::Validation(format!(
            "{} must be a positive number of seconds, got {}",
            name, secs
        ))
    })?;
    if duration < MIN_INTERVAL {
        return Err(Error::Validation(format!(
            "{} must be at least {} ms, got {}",
            name,
            MIN_INTERVAL.as_millis(),
            secs
        )));
    }
    Ok(duration)
}

/// Subsystems that need re-initialisation after a settings change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReloadPlan {
    /// A pin assignment changed
    pub gpio: bool,
    /// Resolution or quality changed
    pub camera: bool,
    /// An interval or period changed
    pub timing: bool,
}

impl ReloadPlan {
    pub fn between(old: &MonitorSettings, new: &MonitorSettings) -> Self {
        Self {
            gpio: old.pin_layout() != new.pin_layout(),
            camera: old.camera_settings() != new.camera_settings(),
            timing: old.buzzer_interval != new.buzzer_interval
                || old.capture_interval != new.capture_interval
                || old.display_update_interval != new.display_update_interval
                || old.poll_period != new.poll_period
                || old.buzzer_pulse != new.buzzer_pulse,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.gpio || self.camera || self.timing)
    }
}

/// Durations as fractional seconds on the wire
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = MonitorSettings::default();
        assert_eq!(settings.door_sensor_pin, 16);
        assert_eq!(settings.motion_led_pin, 21);
        assert_eq!(settings.buzzer_interval, Duration::from_secs(3));
        assert_eq!(settings.camera_settings(), CameraSettings::default());
    }

    #[test]
    fn test_apply_reports_reload_plan() {
        let settings = MonitorSettings::default();

        let (next, plan) = settings
            .apply(&SettingsUpdate {
                buzzer_pin: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.buzzer_pin, 5);
        assert_eq!(plan, ReloadPlan { gpio: true, camera: false, timing: false });

        let (_, plan) = settings
            .apply(&SettingsUpdate {
                image_width: Some(1280),
                capture_interval: Some(1.5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan, ReloadPlan { gpio: false, camera: true, timing: true });

        let (_, plan) = settings.apply(&SettingsUpdate::default()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_validation_rules() {
        let settings = MonitorSettings::default();
        let rejected = [
            SettingsUpdate { door_sensor_pin: Some(28), ..Default::default() },
            SettingsUpdate { buzzer_pin: Some(-1), ..Default::default() },
            SettingsUpdate { buzzer_interval: Some(0.0), ..Default::default() },
            SettingsUpdate { poll_period: Some(f64::NAN), ..Default::default() },
            SettingsUpdate { image_quality: Some(101), ..Default::default() },
            SettingsUpdate { image_height: Some(0), ..Default::default() },
            // Collides with the door LED
            SettingsUpdate { buzzer_pin: Some(17), ..Default::default() },
        ];
        for update in rejected {
            let err = settings.apply(&update).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{:?} accepted", update);
        }
    }

    #[test]
    fn test_out_of_range_intervals_are_rejected() {
        let settings = MonitorSettings::default();
        let rejected = [
            SettingsUpdate { buzzer_interval: Some(1e20), ..Default::default() },
            SettingsUpdate { capture_interval: Some(f64::INFINITY), ..Default::default() },
            SettingsUpdate { poll_period: Some(1e-12), ..Default::default() },
            SettingsUpdate { buzzer_pulse: Some(0.0005), ..Default::default() },
        ];
        for update in rejected {
            let err = settings.apply(&update).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{:?} accepted", update);
        }

        let (next, _) = settings
            .apply(&SettingsUpdate { poll_period: Some(0.001), ..Default::default() })
            .unwrap();
        assert_eq!(next.poll_period, MIN_INTERVAL);
    }

    #[test]
    fn test_from_lookup_rejects_zero_poll_period() {
        let err = MonitorSettings::from_lookup(|key| {
            (key == "POLL_PERIOD_MS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            ("DOOR_SENSOR_PIN", "20"),
            ("BUZZER_INTERVAL", "0.5"),
            ("POLL_PERIOD_MS", "50"),
            ("IMAGE_QUALITY", "70"),
        ]
        .into_iter()
        .collect();

        let settings =
            MonitorSettings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.door_sensor_pin, 20);
        assert_eq!(settings.buzzer_interval, Duration::from_millis(500));
        assert_eq!(settings.poll_period, Duration::from_millis(50));
        assert_eq!(settings.image_quality, 70);
        assert_eq!(settings.motion_sensor_pin, 18);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = MonitorSettings::from_lookup(|key| {
            (key == "BUZZER_PIN").then(|| "twelve".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_settings_json_uses_seconds() {
        let json = serde_json::to_value(MonitorSettings::default()).unwrap();
        assert_eq!(json["buzzer_interval"], 3.0);
        assert_eq!(json["poll_period"], 0.1);

        let update: SettingsUpdate =
            serde_json::from_str(r#"{"capture_interval": 2, "image_quality": 90}"#).unwrap();
        assert_eq!(update.capture_interval, Some(2.0));
        assert!(serde_json::from_str::<SettingsUpdate>(r#"{"bogus": 1}"#).is_err());
    }
}
