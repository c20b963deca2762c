use tokio::sync::watch;
use tracing::{debug, info};

/// Cooperative cancellation for the long-running loops. Loops check their [ShutdownListener]
///  between iterations, so a signal never interrupts work that is in flight.
///
/// A listener that subscribes after the signal was triggered still sees it.
#[derive(Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        ShutdownSignal::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> ShutdownSignal {
        let (sender, _) = watch::channel(false);
        ShutdownSignal { sender }
    }

    pub fn trigger(&self) {
        if self.sender.send_replace(true) {
            debug!("shutdown was already triggered");
        }
        else {
            info!("shutdown triggered");
        }
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// completes when shutdown is triggered - never, if the signal is dropped without triggering
    pub async fn triggered(&mut self) {
        if self.receiver.wait_for(|&triggered| triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time::timeout;
    use super::*;

    #[test]
    fn test_is_triggered() {
        let signal = ShutdownSignal::new();
        let listener = signal.subscribe();
        assert!(!listener.is_triggered());

        signal.trigger();
        assert!(listener.is_triggered());
        assert!(signal.subscribe().is_triggered());

        signal.trigger();
        assert!(listener.is_triggered());
    }

    #[tokio::test]
    async fn test_triggered_completes() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();

        let handle = tokio::spawn(async move { listener.triggered().await });
        signal.trigger();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_triggered_before_waiting() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let mut listener = signal.subscribe();
        timeout(Duration::from_secs(5), listener.triggered()).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_signal_never_triggers() {
        let signal = ShutdownSignal::new();
        let mut listener = signal.subscribe();
        drop(signal);

        assert!(timeout(Duration::from_secs(10), listener.triggered()).await.is_err());
        assert!(!listener.is_triggered());
    }
}
