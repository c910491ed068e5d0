//! Clip recorder: idle -> recording -> idle, with a hard duration ceiling.

use camwatch_proto::{LoopConfig, Notice};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Finalize, RecorderBackend};
use crate::beep::Beeper;
use crate::naming::{clip_name, Clock};
use crate::notify::Notifier;
use crate::store::Downloads;

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub max_duration: Duration,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self { max_duration: Duration::from_millis(30_000) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSession {
    pub id: u64,
    pub started_at: OffsetDateTime,
    pub max_duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRecording,
    CameraUnavailable,
    Failed,
}

struct Active {
    session: RecordingSession,
    ceiling: JoinHandle<()>,
}

/// A capture that was stopped but not yet written out.
struct Stopped {
    session: RecordingSession,
    ext: &'static str,
    head: Vec<u8>,
    tail: Finalize,
}

struct Inner<B> {
    backend: B,
    active: Option<Active>,
    next_id: u64,
}

struct Shared<B> {
    inner: Mutex<Inner<B>>,
    settings: RecorderSettings,
    downloads: Downloads,
    clock: Clock,
    config: watch::Receiver<LoopConfig>,
    notifier: Arc<dyn Notifier>,
    beeper: Arc<dyn Beeper>,
    state: watch::Sender<RecordingState>,
    /// Clips stopped but not yet saved.
    pending: watch::Sender<usize>,
}

/// Cloneable handle; all clones drive the same session.
pub struct Recorder<B> {
    shared: Arc<Shared<B>>,
}

impl<B> Clone for Recorder<B> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<B: RecorderBackend> Recorder<B> {
    pub fn new(
        backend: B,
        settings: RecorderSettings,
        downloads: Downloads,
        clock: Clock,
        config: watch::Receiver<LoopConfig>,
        notifier: Arc<dyn Notifier>,
        beeper: Arc<dyn Beeper>,
    ) -> Self {
        let (state, _) = watch::channel(RecordingState::Idle);
        let (pending, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner { backend, active: None, next_id: 1 }),
                settings,
                downloads,
                clock,
                config,
                notifier,
                beeper,
                state,
                pending,
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        *self.shared.state.borrow() == RecordingState::Recording
    }

    pub fn subscribe(&self) -> watch::Receiver<RecordingState> {
        self.shared.state.subscribe()
    }

    pub async fn session(&self) -> Option<RecordingSession> {
        self.shared.inner.lock().await.active.as_ref().map(|a| a.session)
    }

    /// Begin a session unless one is already running. `cue` plays the
    /// audible cue at the configured volume.
    pub async fn start(&self, cue: bool) -> StartOutcome {
        let mut inner = self.shared.inner.lock().await;
        if inner.active.is_some() {
            debug!("record: already recording, start ignored");
            return StartOutcome::AlreadyRecording;
        }
        if !inner.backend.is_live() {
            self.shared.notifier.notify(Notice::CameraRequired);
            return StartOutcome::CameraUnavailable;
        }
        if let Err(e) = inner.backend.begin().await {
            warn!("record: start failed: {:#}", e);
            self.shared.notifier.notify(Notice::RecordingFailed(format!("{:#}", e)));
            return StartOutcome::Failed;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let max_duration = self.shared.settings.max_duration;

        if cue {
            let volume = self.shared.config.borrow().volume;
            self.shared.beeper.beep(volume);
        }

        let this = self.clone();
        let ceiling = tokio::spawn(async move {
            tokio::time::sleep(max_duration).await;
            this.expire(id).await;
        });

        let session = RecordingSession { id, started_at: self.shared.clock.now(), max_duration };
        inner.active = Some(Active { session, ceiling });
        self.shared.state.send_replace(RecordingState::Recording);
        info!("record: session {} started (cue={})", id, cue);
        self.shared.notifier.notify(Notice::RecordingStarted);
        StartOutcome::Started
    }

    /// Stop the running session, if any. Returns whether one was stopped.
    pub async fn stop(&self) -> bool {
        self.stop_with(false).await
    }

    /// Manual record button: start silently when idle, otherwise force a
    /// flush and stop right away.
    pub async fn toggle(&self) -> Option<StartOutcome> {
        if self.stop_with(true).await {
            return None;
        }
        Some(self.start(false).await)
    }

    /// Teardown: save whatever is running, cancel the ceiling timer and wait
    /// for clips that are still being finalized.
    pub async fn shutdown(&self) {
        if self.stop_with(false).await {
            info!("record: session saved on shutdown");
        }
        let mut pending = self.shared.pending.subscribe();
        if pending.wait_for(|n| *n == 0).await.is_err() {
            debug!("record: finalize counter closed");
        }
    }

    async fn stop_with(&self, flush: bool) -> bool {
        let stopped = {
            let mut inner = self.shared.inner.lock().await;
            let Some(active) = inner.active.take() else { return false; };
            active.ceiling.abort();
            self.detach(&mut inner, active.session, flush).await
        };
        self.finish(stopped).await;
        true
    }

    async fn expire(&self, id: u64) {
        let stopped = {
            let mut inner = self.shared.inner.lock().await;
            match &inner.active {
                Some(a) if a.session.id == id => {}
                _ => return,
            }
            // this task is the ceiling timer; do not abort it
            let Some(active) = inner.active.take() else { return; };
            info!("record: session {} reached {:?} ceiling", id, active.session.max_duration);
            self.detach(&mut inner, active.session, false).await
        };
        self.finish(stopped).await;
    }

    /// Stop the backend and go idle. Runs under the lock and stays short; the
    /// slow container finalization is left to `finish`.
    async fn detach(&self, inner: &mut Inner<B>, session: RecordingSession, flush: bool) -> Stopped {
        let mut head = Vec::new();
        if flush {
            match inner.backend.request_data().await {
                Ok(chunk) => head = chunk,
                Err(e) => warn!("record: flush failed: {:#}", e),
            }
        }
        let tail = inner.backend.end();
        self.shared.pending.send_modify(|n| *n += 1);
        self.shared.state.send_replace(RecordingState::Idle);
        Stopped { session, ext: inner.backend.extension(), head, tail }
    }

    /// Runs without the lock, so a new session can start meanwhile.
    async fn finish(&self, stopped: Stopped) {
        let Stopped { session, ext, mut head, tail } = stopped;
        let notice = match tail.await {
            Ok(tail) => {
                head.extend(tail);
                self.save(session, ext, &head).await
            }
            Err(e) => {
                warn!("record: stop failed: {:#}", e);
                Notice::RecordingFailed(format!("{:#}", e))
            }
        };
        self.shared.notifier.notify(notice);
        self.shared.pending.send_modify(|n| *n -= 1);
    }

    async fn save(&self, session: RecordingSession, ext: &str, data: &[u8]) -> Notice {
        if data.is_empty() {
            warn!("record: session {} produced no data", session.id);
            return Notice::RecordingFailed("no video data was captured".into());
        }
        let stem = clip_name(self.shared.clock.now());
        match self.shared.downloads.save(&stem, ext, data).await {
            Ok(path) => {
                info!("record: session {} saved to {} ({} bytes)", session.id, path.display(), data.len());
                Notice::RecordingSaved
            }
            Err(e) => {
                warn!("record: save failed: {:#}", e);
                Notice::RecordingFailed(format!("{:#}", e))
            }
        }
    }
}
