//! Fixed-interval detection loop: frame -> detector -> overlay -> auto-record.

use camwatch_proto::LoopConfig;
use camwatch_record::{Recorder, RecorderBackend, StartOutcome};
use camwatch_vision::overlay::{self, Surface};
use camwatch_vision::{Frame, FrameSource, ModelHandle};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::policy;

/// Overlay surface plus the frame it was painted for.
pub struct OverlayView<S> {
    pub surface: S,
    pub frame: Option<Frame>,
    pub mirrored: bool,
}

impl<S> OverlayView<S> {
    pub fn new(surface: S) -> Self {
        Self { surface, frame: None, mirrored: false }
    }
}

/// Shortest accepted poll period.
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

pub type SharedView<S> = Arc<Mutex<OverlayView<S>>>;

pub fn lock_view<S>(view: &SharedView<S>) -> MutexGuard<'_, OverlayView<S>> {
    view.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    ModelLoading,
    FrameNotReady,
    Failed,
    Detected { count: usize, person: bool, recording_started: bool },
}

pub struct DetectionLoop<F, S, B> {
    source: F,
    view: SharedView<S>,
    recorder: Recorder<B>,
    config: watch::Receiver<LoopConfig>,
    model: watch::Receiver<Option<ModelHandle>>,
    period: Duration,
}

impl<F, S, B> DetectionLoop<F, S, B>
where
    F: FrameSource,
    S: Surface,
    B: RecorderBackend,
{
    pub fn new(
        source: F,
        view: SharedView<S>,
        recorder: Recorder<B>,
        config: watch::Receiver<LoopConfig>,
        model: watch::Receiver<Option<ModelHandle>>,
        period: Duration,
    ) -> Self {
        if period < MIN_PERIOD {
            warn!("watch: poll period {:?} too short, using {:?}", period, MIN_PERIOD);
        }
        Self { source, view, recorder, config, model, period: period.max(MIN_PERIOD) }
    }

    /// Poll until the task is aborted. The timer is re-armed whenever the
    /// loop configuration or the model handle changes.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut config_open = true;
        let mut model_open = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let t = self.tick().await;
                    trace!("watch: {:?}", t);
                }
                r = self.config.changed(), if config_open => match r {
                    Ok(()) => {
                        debug!("watch: config changed, re-arming timer");
                        ticker.reset();
                    }
                    Err(_) => config_open = false,
                },
                r = self.model.changed(), if model_open => match r {
                    Ok(()) => {
                        debug!("watch: model handle changed, re-arming timer");
                        ticker.reset();
                    }
                    Err(_) => model_open = false,
                },
            }
        }
    }

    /// One poll. Skips silently while the model loads or no frame is ready.
    pub async fn tick(&mut self) -> Tick {
        let Some(model) = self.model.borrow().clone() else { return Tick::ModelLoading; };
        let frame = match self.source.frame().await {
            Ok(Some(f)) => f,
            Ok(None) => return Tick::FrameNotReady,
            Err(e) => {
                warn!("watch: frame unavailable: {:#}", e);
                return Tick::Failed;
            }
        };

        let detections = match model.detect(&frame).await {
            Ok(d) => d,
            Err(e) => {
                warn!("watch: detection failed: {:#}", e);
                return Tick::Failed;
            }
        };

        // read after the await so flags are current
        let cfg = *self.config.borrow();
        {
            let mut view = lock_view(&self.view);
            view.surface.resize(frame.width(), frame.height());
            overlay::render(&mut view.surface, &detections, cfg.mirrored);
            view.frame = Some(frame);
            view.mirrored = cfg.mirrored;
        }

        let person = policy::person_present(&detections);
        let recording_started = policy::should_record(&detections, &cfg)
            && self.recorder.start(true).await == StartOutcome::Started;

        Tick::Detected { count: detections.len(), person, recording_started }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camwatch_proto::{Notice, Volume};
    use camwatch_record::{Beeper, Clock, Downloads, Finalize, RecorderSettings};
    use camwatch_vision::overlay::RasterSurface;
    use camwatch_vision::{BoundingBox, Detection, Detector, ModelVariant};
    use image::RgbImage;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct Cam {
        ready: Arc<AtomicBool>,
        width: u32,
    }

    impl FrameSource for Cam {
        fn is_live(&self) -> bool {
            true
        }
        async fn frame(&mut self) -> anyhow::Result<Option<Frame>> {
            if !self.ready.load(Ordering::SeqCst) {
                return Ok(None);
            }
            Ok(Some(Frame::new(RgbImage::new(self.width, 100))))
        }
    }

    struct Scripted {
        dets: Arc<Mutex<Result<Vec<Detection>, String>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Detector for Scripted {
        fn detect(&mut self, _frame: &RgbImage) -> anyhow::Result<Vec<Detection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.dets.lock().unwrap().clone().map_err(anyhow::Error::msg)
        }
    }

    struct Mem {
        begins: Arc<AtomicUsize>,
        finalize_delay: Duration,
    }

    impl RecorderBackend for Mem {
        fn is_live(&self) -> bool {
            true
        }
        async fn begin(&mut self) -> anyhow::Result<()> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn request_data(&mut self) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
        fn end(&mut self) -> Finalize {
            let delay = self.finalize_delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(b"clip".to_vec())
            })
        }
        fn extension(&self) -> &'static str {
            "webm"
        }
    }

    struct Quiet;

    impl Beeper for Quiet {
        fn beep(&self, _volume: Volume) {}
    }

    struct Rig {
        lp: DetectionLoop<Cam, RasterSurface, Mem>,
        view: SharedView<RasterSurface>,
        ready: Arc<AtomicBool>,
        dets: Arc<Mutex<Result<Vec<Detection>, String>>>,
        calls: Arc<AtomicUsize>,
        begins: Arc<AtomicUsize>,
        config: watch::Sender<LoopConfig>,
        model: watch::Sender<Option<ModelHandle>>,
        recorder: Recorder<Mem>,
        _notices: mpsc::UnboundedReceiver<Notice>,
        _dir: tempfile::TempDir,
    }

    fn person_at(x: f32) -> Detection {
        Detection { class: "person".into(), confidence: 0.8, bbox: BoundingBox::new(x, 20.0, 30.0, 40.0) }
    }

    fn rig(loaded: bool) -> Rig {
        rig_with(loaded, Duration::from_millis(100), Duration::ZERO)
    }

    fn rig_with(loaded: bool, period: Duration, finalize_delay: Duration) -> Rig {
        let ready = Arc::new(AtomicBool::new(true));
        let dets = Arc::new(Mutex::new(Ok(Vec::new())));
        let calls = Arc::new(AtomicUsize::new(0));
        let begins = Arc::new(AtomicUsize::new(0));
        let (config, config_rx) = watch::channel(LoopConfig::default());
        let handle = ModelHandle::new(
            ModelVariant::default(),
            Box::new(Scripted { dets: dets.clone(), calls: calls.clone() }),
        );
        let (model, model_rx) = watch::channel(loaded.then_some(handle));
        let (tx, notices) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();

        let recorder = Recorder::new(
            Mem { begins: begins.clone(), finalize_delay },
            RecorderSettings::default(),
            Downloads::new(dir.path()),
            Clock::local(),
            config_rx.clone(),
            Arc::new(tx),
            Arc::new(Quiet),
        );
        let view = Arc::new(Mutex::new(OverlayView::new(RasterSurface::new(1, 1))));
        let lp = DetectionLoop::new(
            Cam { ready: ready.clone(), width: 200 },
            view.clone(),
            recorder.clone(),
            config_rx,
            model_rx,
            period,
        );
        Rig { lp, view, ready, dets, calls, begins, config, model, recorder, _notices: notices, _dir: dir }
    }

    #[tokio::test]
    async fn tick_is_a_no_op_until_the_model_is_ready() {
        let mut r = rig(false);
        assert_eq!(r.lp.tick().await, Tick::ModelLoading);
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tick_is_a_no_op_without_a_ready_frame() {
        let mut r = rig(true);
        r.ready.store(false, Ordering::SeqCst);
        assert_eq!(r.lp.tick().await, Tick::FrameNotReady);
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn person_with_auto_record_starts_exactly_once() {
        let mut r = rig(true);
        *r.dets.lock().unwrap() = Ok(vec![person_at(10.0)]);
        r.config.send_modify(|c| c.auto_record = true);

        let first = r.lp.tick().await;
        assert_eq!(first, Tick::Detected { count: 1, person: true, recording_started: true });
        let second = r.lp.tick().await;
        assert_eq!(second, Tick::Detected { count: 1, person: true, recording_started: false });
        assert_eq!(r.begins.load(Ordering::SeqCst), 1);
        assert!(r.recorder.is_recording());
        r.recorder.shutdown().await;
    }

    #[tokio::test]
    async fn no_recording_when_toggle_is_off() {
        let mut r = rig(true);
        *r.dets.lock().unwrap() = Ok(vec![person_at(10.0)]);
        r.lp.tick().await;
        assert_eq!(r.begins.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overlay_follows_frame_size_and_mirror_flag() {
        let mut r = rig(true);
        *r.dets.lock().unwrap() = Ok(vec![person_at(10.0)]);

        r.lp.tick().await;
        {
            let view = r.view.lock().unwrap();
            assert_eq!(view.surface.image().dimensions(), (200, 100));
            assert!(view.mirrored);
            assert!(view.surface.image().get_pixel(170, 40).0[3] > 0);
            assert_eq!(view.surface.image().get_pixel(20, 40).0[3], 0);
        }

        r.config.send_modify(|c| c.mirrored = false);
        r.lp.tick().await;
        let view = r.view.lock().unwrap();
        assert!(view.surface.image().get_pixel(20, 40).0[3] > 0);
        assert_eq!(view.surface.image().get_pixel(170, 40).0[3], 0);
    }

    #[tokio::test]
    async fn detector_errors_skip_the_tick() {
        let mut r = rig(true);
        *r.dets.lock().unwrap() = Err("tensor mismatch".into());
        assert_eq!(r.lp.tick().await, Tick::Failed);

        *r.dets.lock().unwrap() = Ok(Vec::new());
        assert_eq!(r.lp.tick().await, Tick::Detected { count: 0, person: false, recording_started: false });
    }

    #[tokio::test(start_paused = true)]
    async fn loop_polls_on_the_period_and_picks_up_late_model() {
        let r = rig(false);
        let handle = ModelHandle::new(
            ModelVariant::default(),
            Box::new(Scripted { dets: r.dets.clone(), calls: r.calls.clone() }),
        );
        let task = tokio::spawn(r.lp.run());

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);

        r.model.send_replace(Some(handle));
        // re-armed: first detection one full period after the change
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(r.calls.load(Ordering::SeqCst), 0);

        let mut waited = 0;
        while r.calls.load(Ordering::SeqCst) < 3 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        assert!(r.calls.load(Ordering::SeqCst) >= 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn auto_record_toggle_is_seen_by_the_next_tick() {
        let r = rig(true);
        *r.dets.lock().unwrap() = Ok(vec![person_at(0.0)]);
        let recorder = r.recorder.clone();
        let task = tokio::spawn(r.lp.run());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(!recorder.is_recording());

        r.config.send_modify(|c| c.auto_record = true);
        let mut state = recorder.subscribe();
        state.changed().await.unwrap();
        assert!(recorder.is_recording());

        task.abort();
        recorder.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_keep_running_while_a_clip_is_finalized() {
        let r = rig_with(true, Duration::from_millis(100), Duration::from_secs(5));
        *r.dets.lock().unwrap() = Ok(vec![person_at(0.0)]);
        r.config.send_modify(|c| c.auto_record = true);
        let recorder = r.recorder.clone();
        let task = tokio::spawn(r.lp.run());

        // first session hits its 30 s ceiling, then takes 5 s to finalize
        tokio::time::sleep(Duration::from_millis(30_500)).await;
        let before = r.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        let during = r.calls.load(Ordering::SeqCst) - before;

        assert!(during >= 30, "only {} detections while finalizing", during);
        assert_eq!(r.begins.load(Ordering::SeqCst), 2);
        assert!(recorder.is_recording());

        task.abort();
        recorder.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_raised_to_the_minimum() {
        let r = rig_with(true, Duration::ZERO, Duration::ZERO);
        let task = tokio::spawn(r.lp.run());

        tokio::time::sleep(Duration::from_millis(105)).await;
        assert!(!task.is_finished());
        let calls = r.calls.load(Ordering::SeqCst);
        assert!((5..=11).contains(&calls), "{} ticks in 105 ms", calls);
        task.abort();
    }
}
