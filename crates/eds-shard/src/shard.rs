use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use eds_car::ShardIndex;
use eds_types::ShardKey;
use tokio::sync::{watch, Notify};

use crate::mount::Mount;
use crate::registry::PersistedState;

/// Lifecycle state of a shard as reported to callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardState {
    /// Being indexed; acquisitions wait for the outcome.
    Registering,
    /// Registered with no live accessors.
    Available,
    /// Registered with this many live accessors.
    Acquired(usize),
    /// Registration failed. The shard stays listed until destroyed.
    Errored(String),
    /// Waiting for accessors to drain before removal.
    Destroying,
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registering => f.write_str("registering"),
            Self::Available => f.write_str("available"),
            Self::Acquired(n) => write!(f, "acquired({n})"),
            Self::Errored(reason) => write!(f, "errored: {reason}"),
            Self::Destroying => f.write_str("destroying"),
        }
    }
}

/// Snapshot of one registered shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardInfo {
    pub key: ShardKey,
    pub state: ShardState,
    pub path: PathBuf,
}

impl ShardInfo {
    /// The registration error, if the shard is errored.
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            ShardState::Errored(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Status held in the shard's watch channel. Reference counts are tracked
/// separately so acquire/release never touch the channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Registering,
    Available,
    Errored(String),
    Destroying,
}

impl Status {
    pub fn persisted(&self) -> PersistedState {
        match self {
            Self::Registering => PersistedState::Registering,
            Self::Available | Self::Destroying => PersistedState::Available,
            Self::Errored(reason) => PersistedState::Errored(reason.clone()),
        }
    }
}

/// A registered shard: its mount, status, and live accessor count.
pub(crate) struct Shard {
    pub key: ShardKey,
    pub mount: Arc<dyn Mount>,
    status: watch::Sender<Status>,
    refs: AtomicUsize,
    drained: Notify,
    index: Mutex<Option<Arc<ShardIndex>>>,
}

impl Shard {
    pub fn new(key: ShardKey, mount: Arc<dyn Mount>, status: Status) -> Self {
        let (tx, _rx) = watch::channel(status);
        Self {
            key,
            mount,
            status: tx,
            refs: AtomicUsize::new(0),
            drained: Notify::new(),
            index: Mutex::new(None),
        }
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn set_status(&self, status: Status) -> Status {
        self.status.send_replace(status)
    }

    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Wait until registration has settled and return the resulting status.
    pub async fn settled(&self) -> Status {
        let mut rx = self.watch_status();
        let settled = rx
            .wait_for(|s| *s != Status::Registering)
            .await
            .map(|s| s.clone());
        // the sender lives in `self`, so the channel cannot close here
        settled.unwrap_or_else(|_| self.status())
    }

    /// Move to `Destroying`, returning the status it replaced. Returns
    /// `None` if another destroy got there first.
    pub fn begin_destroy(&self) -> Option<Status> {
        let mut previous = None;
        self.status.send_if_modified(|status| {
            if *status == Status::Destroying {
                return false;
            }
            previous = Some(std::mem::replace(status, Status::Destroying));
            true
        });
        previous
    }

    pub fn info(&self) -> ShardInfo {
        let state = match self.status() {
            Status::Registering => ShardState::Registering,
            Status::Available => match self.refs() {
                0 => ShardState::Available,
                n => ShardState::Acquired(n),
            },
            Status::Errored(reason) => ShardState::Errored(reason),
            Status::Destroying => ShardState::Destroying,
        };
        ShardInfo {
            key: self.key.clone(),
            state,
            path: self.mount.path().to_path_buf(),
        }
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    pub fn add_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn release_ref(&self) {
        if self.refs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until no accessor references the shard.
    pub async fn drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.refs() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn cached_index(&self) -> Option<Arc<ShardIndex>> {
        self.index.lock().expect("shard index lock poisoned").clone()
    }

    pub fn cache_index(&self, index: Arc<ShardIndex>) {
        *self.index.lock().expect("shard index lock poisoned") = Some(index);
    }

    pub fn clear_index(&self) {
        self.index.lock().expect("shard index lock poisoned").take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::FileMount;
    use std::time::Duration;

    fn shard() -> Arc<Shard> {
        Arc::new(Shard::new(
            ShardKey::from_string("k"),
            Arc::new(FileMount::new("/tmp/k")),
            Status::Available,
        ))
    }

    #[test]
    fn info_reflects_refs() {
        let shard = shard();
        assert_eq!(shard.info().state, ShardState::Available);
        shard.add_ref();
        shard.add_ref();
        assert_eq!(shard.info().state, ShardState::Acquired(2));
        shard.release_ref();
        shard.release_ref();
        assert_eq!(shard.info().state, ShardState::Available);
    }

    #[tokio::test]
    async fn drained_wakes_on_last_release() {
        let shard = shard();
        shard.add_ref();
        let waiter = {
            let shard = shard.clone();
            tokio::spawn(async move { shard.drained().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        shard.release_ref();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn errored_info_exposes_reason() {
        let shard = shard();
        shard.set_status(Status::Errored("boom".into()));
        assert_eq!(shard.info().error(), Some("boom"));
    }
}
