use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::info;

/// Signals the orchestrator once the encoded bytes held in memory reach a threshold. Fires at most
/// once until [`EncodedSizeNotifier::reset`] is called by the next batch formation.
pub struct EncodedSizeNotifier {
    notify: mpsc::Sender<()>,
    threshold: u64,
    active: AtomicBool,
}

impl EncodedSizeNotifier {
    /// A zero threshold disables the notifier.
    pub fn new(threshold: u64) -> (Self, mpsc::Receiver<()>) {
        let (notify, receiver) = mpsc::channel(1);
        (Self { notify, threshold, active: AtomicBool::new(true) }, receiver)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Returns whether a signal was sent.
    pub fn check(&self, encoded_size: u64) -> bool {
        if self.threshold == 0 || encoded_size < self.threshold {
            return false;
        }
        if self.active.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return false;
        }
        info!(component = "EncodingStreamer", encoded_size, threshold = self.threshold, "Encoded size threshold reached");
        // A full channel already holds an undelivered signal.
        let _ = self.notify.try_send(());
        true
    }

    pub fn reset(&self) {
        self.active.store(true, Ordering::SeqCst);
    }
}
