use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Graceful-shutdown fanout. Long-running tasks subscribe and exit their
/// loops when the flag flips.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Flip the flag. Idempotent.
    pub fn begin(&self) {
        if !*self.tx.borrow() {
            info!("shutdown started");
            let _ = self.tx.send(true);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_the_flag() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();

        assert!(!shutdown.is_shutdown());
        shutdown.begin();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(shutdown.is_shutdown());
    }
}
