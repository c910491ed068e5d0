use serde::{Deserialize, Serialize};
use std::fmt;

/// Slider granularity: 0.0, 0.2, ... 1.0
const VOLUME_STEPS: u8 = 5;

/// Notification volume in [0,1], snapped to steps of 0.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "f32", into = "f32")]
pub struct Volume {
    steps: u8,
}

impl Volume {
    pub const MUTE: Volume = Volume { steps: 0 };
    pub const MAX: Volume = Volume { steps: VOLUME_STEPS };

    pub fn new(level: f32) -> Self {
        let level = if level.is_nan() { 0.0 } else { level.clamp(0.0, 1.0) };
        Self { steps: (level * VOLUME_STEPS as f32).round() as u8 }
    }

    pub fn get(self) -> f32 {
        self.steps as f32 / VOLUME_STEPS as f32
    }

    pub fn is_muted(self) -> bool {
        self.steps == 0
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self { steps: 4 }
    }
}

impl From<f32> for Volume {
    fn from(level: f32) -> Self {
        Self::new(level)
    }
}

impl From<Volume> for f32 {
    fn from(v: Volume) -> Self {
        v.get()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.get())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// User-controlled state read by the detection loop and the recorder on every
/// tick or action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub mirrored: bool,
    pub auto_record: bool,
    pub volume: Volume,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { mirrored: true, auto_record: false, volume: Volume::default() }
    }
}

/// What the shell reads back for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStatus {
    pub is_recording: bool,
    pub loading: bool,
    pub mirrored: bool,
    pub auto_record: bool,
    pub volume: Volume,
    pub theme: Theme,
}

impl fmt::Display for ShellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recording={} loading={} mirrored={} auto_record={} volume={} theme={:?}",
            self.is_recording, self.loading, self.mirrored, self.auto_record, self.volume, self.theme
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_first_launch() {
        let c = LoopConfig::default();
        assert!(c.mirrored);
        assert!(!c.auto_record);
        assert_eq!(c.volume.get(), 0.8);
    }

    #[test]
    fn volume_snaps_to_slider_steps() {
        assert_eq!(Volume::new(0.5).get(), 0.6);
        assert_eq!(Volume::new(0.29).get(), 0.2);
        assert_eq!(Volume::new(1.7), Volume::MAX);
        assert_eq!(Volume::new(-3.0), Volume::MUTE);
        assert_eq!(Volume::new(f32::NAN), Volume::MUTE);
        assert!(Volume::new(0.05).is_muted());
    }

    #[test]
    fn loop_config_parses_partial_toml() {
        let c: LoopConfig = toml::from_str("volume = 0.4").unwrap();
        assert!(c.mirrored);
        assert_eq!(c.volume.get(), 0.4);
    }

    #[test]
    fn theme_toggles() {
        assert_eq!(Theme::Dark.toggled(), Theme::Light);
        assert_eq!(Theme::Light.toggled().toggled(), Theme::Light);
    }
}
