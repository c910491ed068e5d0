use anyhow::{Context, Result};
use image::RgbImage;
use serde::Deserialize;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Drop buffered bytes if no complete JPEG shows up within this many.
const MAX_PENDING_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enable: bool,
    pub mode: String,   // "libcamera-mjpeg" | "v4l2-mjpeg"
    pub device: String, // /dev/video0 (v4l2)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enable: true,
            mode: "v4l2-mjpeg".into(),
            device: "/dev/video0".into(),
            width: 1280,
            height: 720,
            fps: 15,
        }
    }
}

/// One decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image: Arc::new(image) }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// One JPEG frame as delivered by the capture process.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub seq: u64,
    pub jpeg: Arc<[u8]>,
}

pub trait FrameSource: Send {
    /// True while the camera is delivering a stream.
    fn is_live(&self) -> bool;

    /// Latest frame, or `None` when no frame is ready for reading yet.
    fn frame(&mut self) -> impl Future<Output = Result<Option<Frame>>> + Send;
}

/// Cheap, cloneable view of the live camera stream.
#[derive(Debug, Clone)]
pub struct CameraFeed {
    live: Arc<AtomicBool>,
    latest: watch::Receiver<Option<EncodedFrame>>,
    decoded: Option<(u64, Frame)>,
}

impl CameraFeed {
    fn new(live: Arc<AtomicBool>, latest: watch::Receiver<Option<EncodedFrame>>) -> Self {
        Self { live, latest, decoded: None }
    }

    /// A feed for a camera that was never enabled.
    pub fn disconnected() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self::new(Arc::new(AtomicBool::new(false)), rx)
    }

    /// The continuous encoded stream, for recorders.
    pub fn stream(&self) -> watch::Receiver<Option<EncodedFrame>> {
        self.latest.clone()
    }

    /// Latest encoded frame, if the camera is live.
    pub fn latest_jpeg(&self) -> Option<EncodedFrame> {
        if !self.is_live() {
            return None;
        }
        self.latest.borrow().clone()
    }
}

impl FrameSource for CameraFeed {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Decodes on the blocking pool; repeated calls for the same capture
    /// reuse the last decode.
    async fn frame(&mut self) -> Result<Option<Frame>> {
        let Some(enc) = self.latest_jpeg() else { return Ok(None); };
        if let Some((seq, frame)) = &self.decoded {
            if *seq == enc.seq {
                return Ok(Some(frame.clone()));
            }
        }
        let jpeg = enc.jpeg.clone();
        let img = tokio::task::spawn_blocking(move || image::load_from_memory(&jpeg).map(|i| i.to_rgb8()))
            .await
            .context("jpeg decode task")?
            .context("decode jpeg")?;
        let frame = Frame::new(img);
        self.decoded = Some((enc.seq, frame.clone()));
        Ok(Some(frame))
    }
}

/// Splits a concatenated MJPEG byte stream into whole JPEG images.
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
}

impl MjpegSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &[0xFF, 0xD8]) else {
                // keep a dangling marker byte for the next chunk
                let keep = matches!(self.buf.last(), Some(0xFF));
                self.buf.clear();
                if keep { self.buf.push(0xFF); }
                break;
            };
            let Some(end) = find(&self.buf[start + 2..], &[0xFF, 0xD9]) else {
                self.buf.drain(..start);
                break;
            };
            let end = start + 2 + end + 2;
            out.push(self.buf[start..end].to_vec());
            self.buf.drain(..end);
        }

        if self.buf.len() > MAX_PENDING_BYTES {
            warn!("camera: dropping {} bytes without a frame boundary", self.buf.len());
            self.buf.clear();
        }
        out
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Long-running capture process publishing MJPEG frames:
/// - libcamera-mjpeg: `libcamera-vid -t 0 --codec mjpeg ... -o -`
/// - v4l2-mjpeg: `ffmpeg` reading the V4L2 device and piping MJPEG to stdout
pub struct LiveCamera {
    child: Child,
    reader: JoinHandle<()>,
}

impl LiveCamera {
    pub fn spawn(cfg: &CameraConfig) -> Result<(Self, CameraFeed)> {
        let mut cmd = capture_command(cfg)?;
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| format!("spawn camera capture ({})", cfg.mode))?;
        let mut stdout = child.stdout.take().context("camera capture stdout")?;

        let live = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(None);
        let feed = CameraFeed::new(live.clone(), rx);

        info!("camera: capture started mode={} {}x{}@{}", cfg.mode, cfg.width, cfg.height, cfg.fps);
        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            let mut split = MjpegSplitter::default();
            let mut seq = 0u64;
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for jpeg in split.push(&buf[..n]) {
                            seq += 1;
                            tx.send_replace(Some(EncodedFrame { seq, jpeg: jpeg.into() }));
                            if !live.swap(true, Ordering::SeqCst) {
                                debug!("camera: first frame received");
                            }
                        }
                    }
                    Err(e) => {
                        warn!("camera: read failed: {:#}", e);
                        break;
                    }
                }
            }
            live.store(false, Ordering::SeqCst);
            tx.send_replace(None);
            info!("camera: capture ended");
        });

        Ok((Self { child, reader }, feed))
    }

    pub async fn shutdown(mut self) {
        self.reader.abort();
        if let Err(e) = self.child.kill().await {
            debug!("camera: kill capture: {:#}", e);
        }
    }
}

fn capture_command(cfg: &CameraConfig) -> Result<Command> {
    let size = format!("{}x{}", cfg.width, cfg.height);
    match cfg.mode.as_str() {
        "libcamera-mjpeg" => {
            let mut cmd = Command::new("libcamera-vid");
            cmd.args(["-n", "-t", "0", "--codec", "mjpeg", "--inline"])
                .args(["--width", &cfg.width.to_string()])
                .args(["--height", &cfg.height.to_string()])
                .args(["--framerate", &cfg.fps.to_string()])
                .args(["-o", "-"]);
            Ok(cmd)
        }
        "v4l2-mjpeg" => {
            let mut cmd = Command::new("ffmpeg");
            cmd.args(["-hide_banner", "-loglevel", "error"])
                .args(["-f", "video4linux2", "-input_format", "mjpeg"])
                .args(["-framerate", &cfg.fps.to_string()])
                .args(["-video_size", &size])
                .args(["-i", &cfg.device])
                .args(["-f", "image2pipe", "-vcodec", "mjpeg", "-"]);
            Ok(cmd)
        }
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([200, 10, 10]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    #[test]
    fn splitter_handles_frames_across_chunk_boundaries() {
        let a = jpeg(4, 4);
        let b = jpeg(8, 2);
        let mut stream = b"junk".to_vec();
        stream.extend_from_slice(&a);
        stream.extend_from_slice(&b);

        let mut split = MjpegSplitter::default();
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            frames.extend(split.push(chunk));
        }
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn splitter_keeps_dangling_marker() {
        let mut split = MjpegSplitter::default();
        assert!(split.push(&[0x00, 0xFF]).is_empty());
        assert!(split.push(&[0xD8, 0x01, 0xFF]).is_empty());
        assert_eq!(split.push(&[0xD9]), vec![vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]]);
    }

    #[tokio::test]
    async fn disconnected_feed_is_never_ready() {
        let mut feed = CameraFeed::disconnected();
        assert!(!feed.is_live());
        assert!(feed.frame().await.unwrap().is_none());
        assert!(feed.latest_jpeg().is_none());
    }

    #[tokio::test]
    async fn live_feed_decodes_latest_frame() {
        let (tx, rx) = watch::channel(None);
        let live = Arc::new(AtomicBool::new(true));
        let mut feed = CameraFeed::new(live.clone(), rx);
        assert!(feed.frame().await.unwrap().is_none());

        tx.send_replace(Some(EncodedFrame { seq: 1, jpeg: jpeg(6, 3).into() }));
        let f = feed.frame().await.unwrap().unwrap();
        assert_eq!((f.width(), f.height()), (6, 3));

        let again = feed.frame().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&f.image, &again.image));

        tx.send_replace(Some(EncodedFrame { seq: 2, jpeg: b"not a jpeg".to_vec().into() }));
        assert!(feed.frame().await.is_err());

        live.store(false, Ordering::SeqCst);
        assert!(feed.frame().await.unwrap().is_none());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let cfg = CameraConfig { mode: "gopro".into(), ..Default::default() };
        assert!(capture_command(&cfg).is_err());
    }
}
