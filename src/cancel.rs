// gateway/src/cancel.rs

use std::sync::Arc;
use tokio::sync::watch;

/// Trigger side; cloned freely, e.g. into a disconnect watcher.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observed by a dispatch at each of its waits.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) { self.tx.send_replace(true); }
    pub fn is_cancelled(&self) -> bool { *self.tx.borrow() }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool { *self.rx.borrow() }

    /// Resolves once cancelled; stays pending forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
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

    #[tokio::test(start_paused = true)]
    async fn cancel_wakes_waiter() {
        let (handle, mut signal) = cancel_pair();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        waiter.await.unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_stays_pending() {
        let mut signal = CancelSignal::never();
        let res = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(res.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_resolves_immediately() {
        let (handle, mut signal) = cancel_pair();
        handle.cancel();
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }
}
