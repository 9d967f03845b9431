/// Cooperative shutdown signal shared by the poll loop, backoff waits and publishes
use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of the shutdown signal. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side of the shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// A listener whose signal can never fire
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    ///
    /// If every `Shutdown` handle is dropped without triggering, this never resolves.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_listener() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.listener();
        assert!(!listener.is_triggered());

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), listener.triggered())
            .await
            .expect("listener should observe shutdown");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_listener_created_after_trigger_sees_it() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let mut listener = shutdown.listener();
        assert!(listener.is_triggered());
        listener.triggered().await;
    }

    #[tokio::test]
    async fn test_never_listener_stays_pending() {
        let mut listener = ShutdownListener::never();
        let result = tokio::time::timeout(Duration::from_millis(20), listener.triggered()).await;
        assert!(result.is_err());
    }
}
