use anyhow::{Context, Result};
use camwatch_proto::Notice;
use camwatch_vision::FrameSource;
use image::ImageFormat;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::info;

use crate::naming::{clip_name, Clock};
use crate::notify::Notifier;
use crate::store::Downloads;

/// Save the current frame as a PNG. Returns `None` (after telling the user)
/// when the camera has no frame to give.
pub async fn screenshot<S: FrameSource>(
    source: &mut S,
    downloads: &Downloads,
    clock: &Clock,
    notifier: &dyn Notifier,
) -> Result<Option<PathBuf>> {
    let frame = match source.frame().await? {
        Some(f) if source.is_live() => f,
        _ => {
            notifier.notify(Notice::CameraRequired);
            return Ok(None);
        }
    };

    let mut png = Cursor::new(Vec::new());
    frame.image.write_to(&mut png, ImageFormat::Png).context("encode screenshot")?;

    let path = downloads.save(&clip_name(clock.now()), "png", png.get_ref()).await?;
    info!("screenshot: saved {}", path.display());
    notifier.notify(Notice::ScreenshotSaved);
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_vision::Frame;
    use image::RgbImage;
    use tokio::sync::mpsc;

    struct Still(Option<Frame>);

    impl FrameSource for Still {
        fn is_live(&self) -> bool {
            self.0.is_some()
        }
        async fn frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn no_camera_produces_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let out = screenshot(&mut Still(None), &Downloads::new(tmp.path()), &Clock::local(), &tx)
            .await
            .unwrap();

        assert!(out.is_none());
        assert_eq!(rx.recv().await, Some(Notice::CameraRequired));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn live_frame_is_saved_as_png() {
        let tmp = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut cam = Still(Some(Frame::new(RgbImage::new(8, 6))));
        let path = screenshot(&mut cam, &Downloads::new(tmp.path()), &Clock::local(), &tx)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path.extension().unwrap(), "png");
        let img = image::open(&path).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
        assert_eq!(rx.recv().await, Some(Notice::ScreenshotSaved));
    }
}
