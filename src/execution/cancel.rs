//! Abort signal for interrupting a running pipeline

use tokio::sync::watch;

/// Cloneable handle that interrupts a run
///
/// Every clone observes the same signal. The first `abort` wins; later
/// reasons are ignored.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    tx: watch::Sender<Option<String>>,
    rx: watch::Receiver<Option<String>>,
}

impl AbortSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx, rx }
    }

    /// Request the run to stop
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Reason given to `abort`, if any
    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolve once the signal fires, yielding its reason
    pub async fn aborted(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            // The sender lives in `self`, so the channel cannot close here
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}
