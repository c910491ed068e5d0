use serde::{Deserialize, Serialize};
use std::fmt;

/// User-facing notifications. Transient; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    CameraRequired,
    RecordingStarted,
    RecordingSaved,
    RecordingFailed(String),
    AutoRecordOn,
    AutoRecordOff,
    ScreenshotSaved,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::CameraRequired => f.write_str("Please enable the webcam first or refresh"),
            Notice::RecordingStarted => f.write_str("Recording has been started"),
            Notice::RecordingSaved => {
                f.write_str("Recording has been stopped and saved to your downloads")
            }
            Notice::RecordingFailed(why) => write!(f, "Recording failed: {}", why),
            Notice::AutoRecordOn => f.write_str("Auto recording is now on"),
            Notice::AutoRecordOff => f.write_str("Auto recording is now off"),
            Notice::ScreenshotSaved => f.write_str("Screenshot saved to your downloads"),
        }
    }
}
