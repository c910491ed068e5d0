use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use camwatch_proto::{Notice, Theme};
use camwatch_record::{AplayBeeper, Beeper, Clock, Downloads, FfmpegEncoder, Notifier, Recorder, RecorderSettings};
use camwatch_vision::overlay::RasterSurface;
use camwatch_vision::{CameraFeed, LiveCamera, ModelHandle};

#[cfg(feature = "vision-tflite")]
use camwatch_vision::tflite::TfliteDetector;

mod config;
mod controls;
mod policy;
mod watch;

use crate::config::Config;
use crate::controls::{Control, Reply, Shell};
use crate::watch::{DetectionLoop, OverlayView};

#[derive(Debug, Parser)]
#[command(name = "camwatch", version, about = "camwatch - camera viewer with person-triggered clip recording")]
struct Cli {
    /// TOML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Run,
    Vision { #[command(subcommand)] cmd: VisionCmd },
}

#[derive(Debug, Subcommand)]
enum VisionCmd { Inspect }

fn main() -> Result<()> {
    // local offset lookup is only sound while single-threaded
    let clock = Clock::local();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    rt.block_on(async move {
        match cli.cmd {
            Command::Doctor => doctor(&cfg),
            Command::Run => run(&cfg, clock).await,
            Command::Vision { cmd } => vision_cmd(&cfg, cmd),
        }
    })
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    config::doctor(cfg)?;
    if !cfg.camera.enable {
        warn!("doctor: camera disabled; recording and screenshots will ask for the webcam");
    }
    info!("doctor: OK");
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    match cmd {
        VisionCmd::Inspect => {
            #[cfg(not(feature = "vision-tflite"))]
            {
                let _ = cfg;
                anyhow::bail!("vision backend not available; build with --features vision-tflite");
            }
            #[cfg(feature = "vision-tflite")]
            {
                let mut det = TfliteDetector::new(cfg.vision.detector_config())?;
                print!("{}", det.inspect()?);
                Ok(())
            }
        }
    }
}

async fn run(cfg: &Config, clock: Clock) -> Result<()> {
    let (config_tx, config_rx) = tokio::sync::watch::channel(cfg.initial);
    let (notice_tx, notices) = mpsc::unbounded_channel::<Notice>();
    let notifier: Arc<dyn Notifier> = Arc::new(notice_tx);
    let beeper: Arc<dyn Beeper> = Arc::new(AplayBeeper::new(cfg.feedback.audio_device.clone()));
    let downloads = Downloads::new(&cfg.record.output_dir);
    info!("run: clips and screenshots go to {}", downloads.dir().display());

    let (camera, feed) = if cfg.camera.enable {
        match LiveCamera::spawn(&cfg.camera) {
            Ok((cam, feed)) => (Some(cam), feed),
            Err(e) => {
                warn!("camera unavailable: {:#}", e);
                (None, CameraFeed::disconnected())
            }
        }
    } else {
        info!("camera disabled by config");
        (None, CameraFeed::disconnected())
    };

    let (model_rx, vision_enabled) = start_model(cfg);
    if vision_enabled {
        info!("Getting things ready...");
    }

    let encoder = FfmpegEncoder::new(feed.clone(), cfg.camera.fps, cfg.record.bitrate.clone());
    let settings = RecorderSettings { max_duration: std::time::Duration::from_millis(cfg.record.max_duration_ms) };
    let recorder = Recorder::new(
        encoder,
        settings,
        downloads.clone(),
        clock,
        config_rx.clone(),
        notifier.clone(),
        beeper.clone(),
    );

    let mut surface = RasterSurface::new(cfg.camera.width, cfg.camera.height);
    if let Some(font) = &cfg.overlay.font_path {
        surface = surface.with_font_file(font, cfg.overlay.label_px)?;
    }
    let view = Arc::new(Mutex::new(OverlayView::new(surface)));

    let detection = DetectionLoop::new(
        feed.clone(),
        view.clone(),
        recorder.clone(),
        config_rx,
        model_rx.clone(),
        cfg.vision.poll_interval(),
    );
    let loop_task = tokio::spawn(detection.run());
    let toast_task = tokio::spawn(show_notices(notices));

    let mut shell = Shell {
        config: config_tx,
        recorder: recorder.clone(),
        source: feed,
        downloads,
        clock,
        notifier,
        beeper,
        view,
        model: model_rx,
        vision_enabled,
        theme: Theme::default(),
    };

    info!("run: ready; {}", controls::HELP);
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let control = match line.parse::<Control>() {
                        Ok(c) => c,
                        Err(e) => {
                            println!("{}\n{}", e, controls::HELP);
                            continue;
                        }
                    };
                    match shell.apply(control).await {
                        Ok(Reply::Done) => {}
                        Ok(Reply::Status(s)) => println!("{}", s),
                        Ok(Reply::Quit) => break,
                        Err(e) => {
                            warn!("command failed: {:#}", e);
                            println!("error: {:#}", e);
                        }
                    }
                }
                Ok(None) => {
                    info!("run: stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("run: stdin read failed: {:#}", e);
                    break;
                }
            },
            _ = &mut ctrl_c => {
                info!("run: interrupted");
                break;
            }
        }
    }

    loop_task.abort();
    recorder.shutdown().await;
    if let Some(cam) = camera {
        cam.shutdown().await;
    }
    toast_task.abort();
    info!("run: bye");
    Ok(())
}

/// Starts loading the detector. A build without a backend keeps running with
/// detection off.
fn start_model(cfg: &Config) -> (tokio::sync::watch::Receiver<Option<ModelHandle>>, bool) {
    if !cfg.vision.enable {
        info!("vision disabled by config");
        let (_tx, rx) = tokio::sync::watch::channel(None);
        return (rx, false);
    }

    #[cfg(not(feature = "vision-tflite"))]
    {
        tracing::error!("vision enabled but binary not built with --features vision-tflite; detection is off");
        let (_tx, rx) = tokio::sync::watch::channel(None);
        return (rx, false);
    }

    #[cfg(feature = "vision-tflite")]
    {
        let dc = cfg.vision.detector_config();
        let rx = camwatch_vision::model::load(cfg.vision.variant, move |_variant| {
            let det = TfliteDetector::new(dc)?;
            Ok(Box::new(det) as Box<dyn camwatch_vision::Detector>)
        });
        (rx, true)
    }
}

async fn show_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        info!(?notice, "notice");
        println!("{}", notice);
    }
}
