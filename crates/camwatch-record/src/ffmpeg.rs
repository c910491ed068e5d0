use anyhow::{anyhow, Context, Result};
use camwatch_vision::{CameraFeed, FrameSource};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Finalize, RecorderBackend};

/// How long ffmpeg gets to finalize the container after its input closes.
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Re-encodes the camera's MJPEG stream to WebM (VP8) with `ffmpeg`:
/// `ffmpeg -f image2pipe -c:v mjpeg -framerate N -i - -c:v libvpx -f webm -`
pub struct FfmpegEncoder {
    feed: CameraFeed,
    fps: u32,
    bitrate: String,
    running: Option<Running>,
}

/// One encoder process and its output; each capture gets its own.
struct Running {
    child: Child,
    pump: JoinHandle<()>,
    reader: JoinHandle<()>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl FfmpegEncoder {
    pub fn new(feed: CameraFeed, fps: u32, bitrate: impl Into<String>) -> Self {
        Self { feed, fps: fps.max(1), bitrate: bitrate.into(), running: None }
    }
}

fn drain(buffer: &Mutex<Vec<u8>>) -> Result<Vec<u8>> {
    let mut buf = buffer.lock().map_err(|_| anyhow!("encoder buffer poisoned"))?;
    Ok(std::mem::take(&mut *buf))
}

impl Running {
    /// Close the input, give ffmpeg time to write the container trailer and
    /// collect the rest of its output.
    async fn finish(mut self) -> Result<Vec<u8>> {
        self.pump.abort();

        match tokio::time::timeout(FINALIZE_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("wait for ffmpeg encoder")?;
                debug!("record: encoder exited with {}", status);
            }
            Err(_) => {
                warn!("record: encoder did not finish in {:?}, killing", FINALIZE_TIMEOUT);
                self.child.kill().await.context("kill ffmpeg encoder")?;
            }
        }
        if let Err(e) = self.reader.await {
            debug!("record: encoder reader: {}", e);
        }
        drain(&self.buffer)
    }
}

impl RecorderBackend for FfmpegEncoder {
    fn is_live(&self) -> bool {
        self.feed.is_live()
    }

    async fn begin(&mut self) -> Result<()> {
        anyhow::ensure!(self.running.is_none(), "encoder already running");

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "image2pipe", "-c:v", "mjpeg"])
            .args(["-framerate", &self.fps.to_string()])
            .args(["-i", "-"])
            .args(["-c:v", "libvpx", "-deadline", "realtime", "-b:v", &self.bitrate])
            .args(["-f", "webm", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("spawn ffmpeg encoder")?;
        let mut stdin = child.stdin.take().context("encoder stdin")?;
        let mut stdout = child.stdout.take().context("encoder stdout")?;

        let mut frames = self.feed.stream();
        frames.mark_changed();
        let pump = tokio::spawn(async move {
            let mut last = 0u64;
            while frames.changed().await.is_ok() {
                let Some(frame) = frames.borrow_and_update().clone() else { break; };
                if frame.seq == last {
                    continue;
                }
                last = frame.seq;
                if let Err(e) = stdin.write_all(&frame.jpeg).await {
                    warn!("record: encoder input closed: {:#}", e);
                    break;
                }
            }
            // dropping stdin lets ffmpeg finalize the container
        });

        let buffer: Arc<Mutex<Vec<u8>>> = Arc::default();
        let sink = buffer.clone();
        let reader = tokio::spawn(async move {
            let mut chunk = vec![0u8; 64 * 1024];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut b) => b.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                    Err(e) => {
                        warn!("record: encoder output: {:#}", e);
                        break;
                    }
                }
            }
        });

        info!("record: ffmpeg encoder started ({} fps)", self.fps);
        self.running = Some(Running { child, pump, reader, buffer });
        Ok(())
    }

    async fn request_data(&mut self) -> Result<Vec<u8>> {
        match &self.running {
            Some(run) => drain(&run.buffer),
            None => Ok(Vec::new()),
        }
    }

    fn end(&mut self) -> Finalize {
        match self.running.take() {
            Some(run) => Box::pin(run.finish()),
            None => Box::pin(async { Ok(Vec::new()) }),
        }
    }

    fn extension(&self) -> &'static str {
        "webm"
    }
}
