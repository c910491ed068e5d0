use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info};

use crate::{Detection, Detector, Frame};

/// Backbone choice; trades accuracy for speed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    LiteMobilenetV2,
    MobilenetV1,
    #[default]
    MobilenetV2,
}

impl ModelVariant {
    pub fn file_name(self) -> &'static str {
        match self {
            ModelVariant::LiteMobilenetV2 => "ssdlite_mobilenet_v2.tflite",
            ModelVariant::MobilenetV1 => "ssd_mobilenet_v1.tflite",
            ModelVariant::MobilenetV2 => "ssd_mobilenet_v2.tflite",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to load {variant:?} model: {reason}")]
    Load { variant: ModelVariant, reason: String },
    #[error("model loader task aborted")]
    Aborted,
}

/// Loaded detector shared between ticks. Immutable once published.
#[derive(Clone)]
pub struct ModelHandle {
    variant: ModelVariant,
    inner: Arc<Mutex<Box<dyn Detector>>>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").field("variant", &self.variant).finish_non_exhaustive()
    }
}

impl ModelHandle {
    pub fn new(variant: ModelVariant, detector: Box<dyn Detector>) -> Self {
        Self { variant, inner: Arc::new(Mutex::new(detector)) }
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    /// One detection pass, run on the blocking pool.
    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let inner = self.inner.clone();
        let image = frame.image.clone();
        tokio::task::spawn_blocking(move || {
            let mut det = inner.lock().map_err(|_| anyhow!("detector lock poisoned"))?;
            det.detect(&image)
        })
        .await
        .context("detector task")?
    }
}

/// Start loading the model in the background. The receiver holds `None`
/// until the handle is ready; a failed load leaves it `None` for good.
pub fn load<F>(variant: ModelVariant, loader: F) -> watch::Receiver<Option<ModelHandle>>
where
    F: FnOnce(ModelVariant) -> Result<Box<dyn Detector>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    info!("vision: loading {:?} model", variant);

    tokio::spawn(async move {
        match load_blocking(variant, loader).await {
            Ok(handle) => {
                info!("vision: {:?} model ready", variant);
                tx.send_replace(Some(handle));
            }
            Err(e) => error!("vision: {}", e),
        }
    });
    rx
}

async fn load_blocking<F>(variant: ModelVariant, loader: F) -> Result<ModelHandle, ModelError>
where
    F: FnOnce(ModelVariant) -> Result<Box<dyn Detector>> + Send + 'static,
{
    let detector = tokio::task::spawn_blocking(move || loader(variant))
        .await
        .map_err(|_| ModelError::Aborted)?
        .map_err(|e| ModelError::Load { variant, reason: format!("{:#}", e) })?;
    Ok(ModelHandle::new(variant, detector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;
    use image::RgbImage;

    struct Fixed(Vec<Detection>);

    impl Detector for Fixed {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    fn person() -> Detection {
        Detection { class: "person".into(), confidence: 0.9, bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0) }
    }

    #[tokio::test]
    async fn handle_is_published_after_load() {
        let mut rx = load(ModelVariant::LiteMobilenetV2, |_| Ok(Box::new(Fixed(vec![person()])) as Box<dyn Detector>));
        rx.changed().await.unwrap();
        let handle = rx.borrow().clone().unwrap();
        assert_eq!(handle.variant(), ModelVariant::LiteMobilenetV2);

        let dets = handle.detect(&Frame::new(RgbImage::new(4, 4))).await.unwrap();
        assert_eq!(dets, vec![person()]);
    }

    #[tokio::test]
    async fn failed_load_never_publishes() {
        let mut rx = load(ModelVariant::MobilenetV1, |_| Err(anyhow!("no such file")));
        // the sender is dropped once the loader gives up
        assert!(rx.changed().await.is_err());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn load_error_names_the_variant() {
        let err = load_blocking(ModelVariant::MobilenetV1, |_| Err(anyhow!("bad tensor"))).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to load MobilenetV1 model: bad tensor");
    }

    #[test]
    fn variant_parses_from_config_names() {
        #[derive(Deserialize)]
        struct V { variant: ModelVariant }
        let v: V = toml::from_str("variant = \"lite_mobilenet_v2\"").unwrap();
        assert_eq!(v.variant, ModelVariant::LiteMobilenetV2);
    }
}
