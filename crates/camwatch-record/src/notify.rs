use camwatch_proto::Notice;
use tokio::sync::mpsc;
use tracing::debug;

/// Sink for transient user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl Notifier for mpsc::UnboundedSender<Notice> {
    fn notify(&self, notice: Notice) {
        if let Err(e) = self.send(notice) {
            debug!("notice dropped, no listener: {}", e.0);
        }
    }
}
