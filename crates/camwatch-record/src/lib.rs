pub mod backend;
pub mod beep;
pub mod ffmpeg;
pub mod naming;
pub mod notify;
pub mod recorder;
pub mod still;
pub mod store;

pub use backend::{Finalize, RecorderBackend};
pub use beep::{AplayBeeper, Beeper};
pub use ffmpeg::FfmpegEncoder;
pub use naming::{clip_name, Clock};
pub use notify::Notifier;
pub use recorder::{Recorder, RecorderSettings, RecordingSession, RecordingState, StartOutcome};
pub use store::Downloads;
