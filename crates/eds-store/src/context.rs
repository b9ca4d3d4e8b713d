use std::future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Caller-side deadline and cancellation for store operations.
///
/// A finished context only stops the caller from waiting. Lifecycle work
/// already handed to the shard manager keeps running.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] created alongside it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that never finishes.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(rx),
            },
            CancelHandle { tx },
        )
    }

    /// Add a deadline to this context, keeping the earlier of the two.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    pub fn is_done(&self) -> bool {
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        let cancelled = self.cancel.as_ref().is_some_and(|rx| *rx.borrow());
        expired || cancelled
    }

    /// Resolves once the deadline passes or the context is cancelled.
    pub async fn done(&self) {
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => future::pending().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(rx) => {
                    let mut rx = rx.clone();
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // handle dropped without cancelling
                        future::pending::<()>().await;
                    }
                }
                None => future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline => {}
            _ = cancelled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_never_finishes() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn timeout_finishes() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn cancel_finishes_clones() {
        let (ctx, handle) = Context::with_cancel();
        let clone = ctx.clone();
        assert!(!clone.is_done());
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), clone.done())
            .await
            .unwrap();
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (ctx, handle) = Context::with_cancel();
        drop(handle);
        let waited = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(waited.is_err());
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn timeout_keeps_earlier_deadline() {
        let ctx = Context::with_timeout(Duration::from_millis(5)).timeout(Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(1), ctx.done())
            .await
            .unwrap();
    }
}
