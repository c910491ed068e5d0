//! Line-oriented control surface read from stdin.

use anyhow::{bail, Context, Result};
use camwatch_proto::{LoopConfig, Notice, ShellStatus, Theme, Volume};
use camwatch_record::{still, Beeper, Clock, Downloads, Notifier, Recorder, RecorderBackend, StartOutcome};
use camwatch_vision::overlay::{self, RasterSurface};
use camwatch_vision::{FrameSource, ModelHandle};
use image::ImageFormat;
use std::io::Cursor;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use crate::watch::{lock_view, SharedView};

pub const HELP: &str = "commands: mirror | shot | record | auto | volume <0..1> | theme [light|dark] | status | preview <path> | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Mirror,
    Shot,
    Record,
    Auto,
    Volume(Volume),
    /// `None` flips the current theme.
    Theme(Option<Theme>),
    Status,
    Preview(PathBuf),
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArg(&'static str),
    #[error("volume must be a number between 0 and 1, got `{0}`")]
    BadVolume(String),
    #[error("theme must be light or dark, got `{0}`")]
    BadTheme(String),
    #[error("unexpected argument `{0}`")]
    Extra(String),
}

impl FromStr for Control {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let cmd = words.next().ok_or(ParseError::Empty)?;
        let arg = words.next();
        if let Some(extra) = words.next() {
            return Err(ParseError::Extra(extra.to_string()));
        }

        let no_arg = |c: Control| match arg {
            Some(a) => Err(ParseError::Extra(a.to_string())),
            None => Ok(c),
        };

        match cmd.to_ascii_lowercase().as_str() {
            "mirror" => no_arg(Control::Mirror),
            "shot" | "screenshot" => no_arg(Control::Shot),
            "record" | "rec" => no_arg(Control::Record),
            "auto" => no_arg(Control::Auto),
            "status" => no_arg(Control::Status),
            "quit" | "exit" => no_arg(Control::Quit),
            "volume" => {
                let raw = arg.ok_or(ParseError::MissingArg("volume"))?;
                match raw.parse::<f32>() {
                    Ok(v) if (0.0..=1.0).contains(&v) => Ok(Control::Volume(Volume::new(v))),
                    _ => Err(ParseError::BadVolume(raw.to_string())),
                }
            }
            "theme" => match arg.map(str::to_ascii_lowercase).as_deref() {
                None => Ok(Control::Theme(None)),
                Some("light") => Ok(Control::Theme(Some(Theme::Light))),
                Some("dark") => Ok(Control::Theme(Some(Theme::Dark))),
                Some(other) => Err(ParseError::BadTheme(other.to_string())),
            },
            "preview" => {
                let path = arg.ok_or(ParseError::MissingArg("preview"))?;
                Ok(Control::Preview(PathBuf::from(path)))
            }
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Status(ShellStatus),
    Quit,
}

/// Everything the shell's controls act on.
pub struct Shell<F, B> {
    pub config: watch::Sender<LoopConfig>,
    pub recorder: Recorder<B>,
    pub source: F,
    pub downloads: Downloads,
    pub clock: Clock,
    pub notifier: Arc<dyn Notifier>,
    pub beeper: Arc<dyn Beeper>,
    pub view: SharedView<RasterSurface>,
    pub model: watch::Receiver<Option<ModelHandle>>,
    pub vision_enabled: bool,
    pub theme: Theme,
}

impl<F: FrameSource, B: RecorderBackend> Shell<F, B> {
    /// True until the model handle is published. A failed load ends it too.
    pub fn loading(&self) -> bool {
        self.vision_enabled && self.model.borrow().is_none() && self.model.has_changed().is_ok()
    }

    pub fn status(&self) -> ShellStatus {
        let cfg = *self.config.borrow();
        ShellStatus {
            is_recording: self.recorder.is_recording(),
            loading: self.loading(),
            mirrored: cfg.mirrored,
            auto_record: cfg.auto_record,
            volume: cfg.volume,
            theme: self.theme,
        }
    }

    pub async fn apply(&mut self, control: Control) -> Result<Reply> {
        match control {
            Control::Mirror => {
                let mut now = false;
                self.config.send_modify(|c| {
                    c.mirrored = !c.mirrored;
                    now = c.mirrored;
                });
                info!("shell: mirrored={}", now);
            }
            Control::Auto => {
                let mut now = false;
                self.config.send_modify(|c| {
                    c.auto_record = !c.auto_record;
                    now = c.auto_record;
                });
                self.notifier.notify(if now { Notice::AutoRecordOn } else { Notice::AutoRecordOff });
            }
            Control::Volume(v) => {
                self.config.send_modify(|c| c.volume = v);
                info!("shell: volume={}", v);
                self.beeper.beep(v);
            }
            Control::Theme(t) => {
                self.theme = t.unwrap_or_else(|| self.theme.toggled());
                info!("shell: theme={:?}", self.theme);
            }
            Control::Record => match self.recorder.toggle().await {
                None => info!("shell: recording stopped"),
                Some(StartOutcome::Started) => info!("shell: recording started"),
                Some(other) => info!("shell: record request ended as {:?}", other),
            },
            Control::Shot => {
                still::screenshot(&mut self.source, &self.downloads, &self.clock, &*self.notifier).await?;
            }
            Control::Preview(path) => self.preview(path).await?,
            Control::Status => return Ok(Reply::Status(self.status())),
            Control::Quit => return Ok(Reply::Quit),
        }
        Ok(Reply::Done)
    }

    /// Write the last rendered frame with its overlay, as the viewer sees it.
    async fn preview(&self, path: PathBuf) -> Result<()> {
        let composed = {
            let view = lock_view(&self.view);
            let Some(frame) = &view.frame else { bail!("no frame has been rendered yet"); };
            overlay::compose(&frame.image, view.surface.image(), view.mirrored)
        };
        let mut png = Cursor::new(Vec::new());
        composed.write_to(&mut png, ImageFormat::Png).context("encode preview")?;
        tokio::fs::write(&path, png.into_inner())
            .await
            .with_context(|| format!("write preview {}", path.display()))?;
        info!("shell: preview written to {}", path.display());
        Ok(())
    }
}
