use anyhow::Result;
use std::future::Future;
use std::pin::Pin;

/// Remaining encoded bytes of a stopped capture. Owns everything it needs, so
/// it can be awaited after the backend has moved on.
pub type Finalize = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send>>;

/// Stream-recording facility the recorder drives. Encoding and the container
/// format are entirely the backend's business.
pub trait RecorderBackend: Send + 'static {
    /// True when there is a live stream to record.
    fn is_live(&self) -> bool;

    /// Start capturing the live stream.
    fn begin(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Hand over whatever has been encoded so far.
    fn request_data(&mut self) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Stop capturing. The backend is ready to `begin` again right away; the
    /// returned future finishes the stopped capture.
    fn end(&mut self) -> Finalize;

    /// File extension of the produced clip.
    fn extension(&self) -> &'static str;
}
