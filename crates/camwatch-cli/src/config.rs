use anyhow::{Context, Result};
use camwatch_proto::LoopConfig;
use camwatch_vision::{CameraConfig, DetectorConfig, ModelVariant};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub vision: VisionCfg,
    pub record: RecordCfg,
    pub feedback: FeedbackCfg,
    pub overlay: OverlayCfg,
    #[serde(rename = "loop")]
    pub initial: LoopConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VisionCfg {
    pub enable: bool,
    pub variant: ModelVariant,
    pub model_dir: PathBuf,
    pub poll_interval_ms: u64,
    #[serde(flatten)]
    pub detector: DetectorConfig,
}

impl Default for VisionCfg {
    fn default() -> Self {
        Self {
            enable: true,
            variant: ModelVariant::default(),
            model_dir: PathBuf::from("models"),
            poll_interval_ms: 100,
            detector: DetectorConfig::default(),
        }
    }
}

impl VisionCfg {
    /// Explicit `model_path` wins; otherwise the variant's file in `model_dir`.
    pub fn model_path(&self) -> PathBuf {
        if self.detector.model_path.as_os_str().is_empty() {
            self.model_dir.join(self.variant.file_name())
        } else {
            self.detector.model_path.clone()
        }
    }

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig { model_path: self.model_path(), ..self.detector.clone() }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordCfg {
    pub output_dir: PathBuf,
    pub max_duration_ms: u64,
    pub bitrate: String,
}

impl Default for RecordCfg {
    fn default() -> Self {
        Self { output_dir: PathBuf::from("downloads"), max_duration_ms: 30_000, bitrate: "2M".into() }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackCfg {
    /// ALSA device for the cue; `None` uses the default device.
    pub audio_device: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OverlayCfg {
    pub font_path: Option<PathBuf>,
    pub label_px: f32,
}

impl Default for OverlayCfg {
    fn default() -> Self {
        Self { font_path: None, label_px: 12.0 }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: Config = toml::from_str(&s).context("parse config toml")?;
    check_ranges(&cfg).with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Value checks that need no filesystem access.
pub fn check_ranges(cfg: &Config) -> Result<()> {
    anyhow::ensure!(cfg.record.max_duration_ms >= 1000, "record.max_duration_ms too small; set >= 1000");
    anyhow::ensure!(
        (10..=1000).contains(&cfg.vision.poll_interval_ms),
        "vision.poll_interval_ms should be 10..1000"
    );
    anyhow::ensure!(cfg.camera.fps > 0, "camera.fps must be > 0");
    anyhow::ensure!(cfg.overlay.label_px > 0.0, "overlay.label_px must be > 0");
    Ok(())
}

pub fn doctor(cfg: &Config) -> Result<()> {
    check_ranges(cfg)?;
    let out = &cfg.record.output_dir;
    if out.exists() {
        anyhow::ensure!(out.is_dir(), "record.output_dir is not a dir: {}", out.display());
    }

    if cfg.vision.enable {
        let model = cfg.vision.model_path();
        anyhow::ensure!(model.is_file(), "model missing: {}", model.display());
        let d = &cfg.vision.detector;
        anyhow::ensure!((0.0..=1.0).contains(&d.conf_threshold), "vision.conf_threshold out of range");
        anyhow::ensure!(!d.labels.is_empty(), "vision.labels is empty");
    }
    if let Some(font) = &cfg.overlay.font_path {
        anyhow::ensure!(font.is_file(), "overlay.font_path missing: {}", font.display());
    }
    Ok(())
}
