use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use eds_car::ShardIndex;
use eds_types::ShardKey;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::accessor::ShardAccessor;
use crate::block_index::BlockIndex;
use crate::error::{ShardError, ShardResult};
use crate::gc::{self, GcResult};
use crate::index_repo::FsIndexRepo;
use crate::mount::{FileMount, Mount, ShardBytes};
use crate::registry::{PersistedShard, PersistedState, Registry, RegistryRecord};
use crate::shard::{Shard, ShardInfo, Status};

const INTERRUPTED: &str = "registration interrupted";

/// Receiving end of an in-flight lifecycle operation. Resolves exactly once.
pub type Pending<T> = oneshot::Receiver<ShardResult<T>>;

/// Configuration for the [`ShardManager`].
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Directory for journals and full per-shard indices.
    pub index_dir: PathBuf,
    /// Directory for transient per-shard scratch state.
    pub transients_dir: PathBuf,
    /// How long `destroy` waits for outstanding accessors.
    pub drain_timeout: Duration,
}

impl ManagerConfig {
    /// Standard layout under `base`: `index/` and `transients/`.
    pub fn new(base: &Path) -> Self {
        Self {
            index_dir: base.join("index"),
            transients_dir: base.join("transients"),
            drain_timeout: Duration::from_secs(60),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.index_dir.join("registry.journal")
    }

    pub fn block_index_path(&self) -> PathBuf {
        self.index_dir.join("blocks.journal")
    }
}

struct ManagerInner {
    config: ManagerConfig,
    shards: RwLock<HashMap<ShardKey, Arc<Shard>>>,
    registry: Registry,
    block_index: Arc<BlockIndex>,
    index_repo: FsIndexRepo,
    acquisitions: AtomicU64,
    closed: AtomicBool,
}

/// Shard lifecycle manager.
///
/// Owns the durable registry of shards. `register`, `acquire`, `destroy`
/// and `gc` validate their request synchronously, then run in the
/// background and deliver their result through a [`Pending`] receiver.
/// Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct ShardManager {
    inner: Arc<ManagerInner>,
}

impl ShardManager {
    /// Open the manager, replaying the registry and block index journals.
    pub fn open(config: ManagerConfig) -> ShardResult<Self> {
        fs::create_dir_all(&config.index_dir)?;
        fs::create_dir_all(&config.transients_dir)?;

        let registry = Registry::open(&config.registry_path())?;
        let block_index = Arc::new(BlockIndex::open(&config.block_index_path())?);
        let index_repo = FsIndexRepo::open(&config.index_dir)?;

        let mut shards = HashMap::new();
        for (key, persisted) in registry.recover()? {
            let status = match persisted.state {
                PersistedState::Available => Status::Available,
                PersistedState::Errored(reason) => Status::Errored(reason),
                PersistedState::Registering => {
                    warn!(key = %key, "shard was mid-registration at shutdown");
                    registry.record(RegistryRecord::Errored {
                        key: key.clone(),
                        reason: INTERRUPTED.into(),
                    })?;
                    Status::Errored(INTERRUPTED.into())
                }
            };
            let mount: Arc<dyn Mount> = Arc::new(FileMount::new(persisted.path));
            shards.insert(key.clone(), Arc::new(Shard::new(key, mount, status)));
        }

        info!(
            index_dir = %config.index_dir.display(),
            shards = shards.len(),
            "shard manager opened"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                shards: RwLock::new(shards),
                registry,
                block_index,
                index_repo,
                acquisitions: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Register a shard and index its contents.
    ///
    /// Fails immediately with `AlreadyExists` if the key is registered in
    /// any state. The pending result fails with `IndexingFailed` if the
    /// mount cannot be read or parsed; the shard is then left `Errored`.
    pub fn register(&self, key: ShardKey, mount: Arc<dyn Mount>) -> ShardResult<Pending<()>> {
        self.ensure_open()?;
        let shard = {
            let mut shards = self.inner.shards.write().expect("registry lock poisoned");
            if shards.contains_key(&key) {
                return Err(ShardError::AlreadyExists(key));
            }
            self.inner.registry.record(RegistryRecord::Registering {
                key: key.clone(),
                path: mount.path().to_path_buf(),
            })?;
            let shard = Arc::new(Shard::new(key.clone(), mount, Status::Registering));
            shards.insert(key, shard.clone());
            shard
        };

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = tx.send(inner.index_shard(shard).await);
        });
        Ok(rx)
    }

    /// Acquire an accessor, waiting for registration to settle first.
    pub fn acquire(&self, key: &ShardKey) -> ShardResult<Pending<ShardAccessor>> {
        self.ensure_open()?;
        let shard = self.shard(key)?;
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = tx.send(inner.acquire_shard(shard).await);
        });
        Ok(rx)
    }

    /// Remove a shard from the registry once its accessors have drained.
    ///
    /// The pending result fails with `Busy` if accessors are still live
    /// after the drain timeout; the shard then keeps its previous state.
    pub fn destroy(&self, key: &ShardKey) -> ShardResult<Pending<()>> {
        self.ensure_open()?;
        let shard = self.shard(key)?;
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _ = tx.send(inner.destroy_shard(shard).await);
        });
        Ok(rx)
    }

    /// Reclaim transient state of every idle or errored shard.
    pub fn gc(&self) -> ShardResult<Pending<GcResult>> {
        self.ensure_open()?;
        let shards: Vec<Arc<Shard>> = self
            .inner
            .shards
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        let transients = self.inner.config.transients_dir.clone();

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let swept = tokio::task::spawn_blocking(move || {
                let mut result = GcResult::default();
                for shard in shards {
                    let eligible = match shard.status() {
                        Status::Available => shard.refs() == 0,
                        Status::Errored(_) => true,
                        Status::Registering | Status::Destroying => false,
                    };
                    if eligible {
                        result
                            .shards
                            .insert(shard.key.clone(), gc::sweep(&transients, &shard));
                    }
                }
                result
            })
            .await
            .map_err(|e| ShardError::Io(std::io::Error::other(e)));
            if let Ok(result) = &swept {
                debug!(swept = result.shards.len(), reclaimed = result.reclaimed(), "gc pass complete");
            }
            let _ = tx.send(swept);
        });
        Ok(rx)
    }

    /// Current state of one shard.
    pub fn shard_info(&self, key: &ShardKey) -> ShardResult<ShardInfo> {
        Ok(self.shard(key)?.info())
    }

    /// Current state of every registered shard, in key order.
    pub fn all_shards(&self) -> Vec<ShardInfo> {
        let mut infos: Vec<ShardInfo> = self
            .inner
            .shards
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|shard| shard.info())
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    pub fn block_index(&self) -> &Arc<BlockIndex> {
        &self.inner.block_index
    }

    /// Number of successful acquisitions since open.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting operations and compact both journals.
    pub fn close(&self) -> ShardResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot: BTreeMap<ShardKey, PersistedShard> = self
            .inner
            .shards
            .read()
            .expect("registry lock poisoned")
            .iter()
            .map(|(key, shard)| {
                (
                    key.clone(),
                    PersistedShard {
                        path: shard.mount.path().to_path_buf(),
                        state: shard.status().persisted(),
                    },
                )
            })
            .collect();
        self.inner.registry.compact(&snapshot)?;
        self.inner.block_index.compact()?;
        info!(shards = snapshot.len(), "shard manager closed");
        Ok(())
    }

    fn ensure_open(&self) -> ShardResult<()> {
        if self.is_closed() {
            return Err(ShardError::Closed);
        }
        Ok(())
    }

    fn shard(&self, key: &ShardKey) -> ShardResult<Arc<Shard>> {
        self.inner
            .shards
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| ShardError::Unknown(key.clone()))
    }
}

impl ManagerInner {
    async fn index_shard(self: Arc<Self>, shard: Arc<Shard>) -> ShardResult<()> {
        let key = shard.key.clone();
        let built = {
            let inner = self.clone();
            let shard = shard.clone();
            tokio::task::spawn_blocking(move || inner.build_index(&shard))
                .await
                .unwrap_or_else(|e| Err(ShardError::Io(std::io::Error::other(e))))
        };
        let outcome = built.and_then(|index| {
            self.registry
                .record(RegistryRecord::Available { key: key.clone() })?;
            Ok(index)
        });

        match outcome {
            Ok(index) => {
                let blocks = index.len();
                shard.cache_index(Arc::new(index));
                shard.set_status(Status::Available);
                info!(key = %key, blocks, "shard registered");
                Ok(())
            }
            Err(e) => {
                let reason = e.to_string();
                shard.set_status(Status::Errored(reason.clone()));
                if let Err(journal_err) = self.registry.record(RegistryRecord::Errored {
                    key: key.clone(),
                    reason: reason.clone(),
                }) {
                    warn!(key = %key, error = %journal_err, "failed to journal errored shard");
                }
                warn!(key = %key, error = %reason, "shard registration failed");
                Err(ShardError::IndexingFailed { key, reason })
            }
        }
    }

    fn build_index(&self, shard: &Shard) -> ShardResult<ShardIndex> {
        let bytes = shard.mount.fetch()?;
        let (_, index) = ShardIndex::scan(&bytes[..])?;
        self.index_repo.put(&shard.key, &index)?;
        self.block_index.add(&shard.key, index.cids().to_vec())?;
        Ok(index)
    }

    async fn acquire_shard(self: Arc<Self>, shard: Arc<Shard>) -> ShardResult<ShardAccessor> {
        unavailable(&shard, shard.settled().await)?;
        shard.add_ref();
        // a destroy may have started between settling and taking the ref
        if let Err(e) = unavailable(&shard, shard.status()) {
            shard.release_ref();
            return Err(e);
        }

        let loaded = {
            let inner = self.clone();
            let shard = shard.clone();
            tokio::task::spawn_blocking(move || inner.load(&shard))
                .await
                .unwrap_or_else(|e| Err(ShardError::Io(std::io::Error::other(e))))
        };
        match loaded {
            Ok((bytes, index)) => {
                self.acquisitions.fetch_add(1, Ordering::SeqCst);
                debug!(key = %shard.key, refs = shard.refs(), "shard acquired");
                Ok(ShardAccessor::new(shard, bytes, index))
            }
            Err(e) => {
                shard.release_ref();
                Err(e)
            }
        }
    }

    fn load(&self, shard: &Shard) -> ShardResult<(ShardBytes, Arc<ShardIndex>)> {
        let bytes = shard.mount.fetch()?;
        if let Some(index) = shard.cached_index() {
            return Ok((bytes, index));
        }
        let index = match self.index_repo.get(&shard.key)? {
            Some(index) => index,
            None => {
                warn!(key = %shard.key, "full index missing; rescanning shard");
                let (_, index) = ShardIndex::scan(&bytes[..])?;
                self.index_repo.put(&shard.key, &index)?;
                index
            }
        };
        let index = Arc::new(index);
        shard.cache_index(index.clone());
        Ok((bytes, index))
    }

    async fn destroy_shard(self: Arc<Self>, shard: Arc<Shard>) -> ShardResult<()> {
        let key = shard.key.clone();
        shard.settled().await;
        let previous = shard
            .begin_destroy()
            .ok_or_else(|| ShardError::Destroying(key.clone()))?;

        if tokio::time::timeout(self.config.drain_timeout, shard.drained())
            .await
            .is_err()
        {
            let refs = shard.refs();
            shard.set_status(previous);
            warn!(key = %key, refs, "accessors did not drain; destroy aborted");
            return Err(ShardError::Busy { key, refs });
        }

        if let Err(e) = self
            .registry
            .record(RegistryRecord::Destroyed { key: key.clone() })
        {
            shard.set_status(previous);
            return Err(e);
        }
        self.shards
            .write()
            .expect("registry lock poisoned")
            .remove(&key);
        shard.clear_index();
        shard.mount.release();
        match self.index_repo.drop_index(&key) {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "no full index to drop"),
            Err(e) => warn!(key = %key, error = %e, "failed to drop full index"),
        }
        info!(key = %key, "shard destroyed");
        Ok(())
    }
}

/// Map a non-available status to the error an acquisition reports.
fn unavailable(shard: &Shard, status: Status) -> ShardResult<()> {
    match status {
        Status::Available => Ok(()),
        Status::Errored(reason) => Err(ShardError::Errored {
            key: shard.key.clone(),
            reason,
        }),
        Status::Destroying => Err(ShardError::Destroying(shard.key.clone())),
        Status::Registering => Err(ShardError::Errored {
            key: shard.key.clone(),
            reason: "registration has not settled".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mount::InMemoryOnceMount;
    use crate::shard::ShardState;
    use eds_car::{CarHeader, CarWriter};
    use eds_types::ContentId;
    use std::io::{Read, Write};

    fn shard_bytes(seed: u8) -> (Vec<u8>, Vec<ContentId>) {
        let header = CarHeader::new(vec![ContentId::from_bytes(&[seed])]);
        let mut writer = CarWriter::new(Vec::new(), &header).unwrap();
        let mut cids = Vec::new();
        for i in 0u8..4 {
            let data = vec![seed, i, 0xAA];
            let cid = ContentId::from_bytes(&data);
            writer.put_block(&cid, &data).unwrap();
            cids.push(cid);
        }
        (writer.into_inner(), cids)
    }

    fn file_mount(dir: &Path, name: &str, bytes: &[u8]) -> Arc<dyn Mount> {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        Arc::new(FileMount::new(path))
    }

    fn open(dir: &Path) -> ShardManager {
        let mut config = ManagerConfig::new(dir);
        config.drain_timeout = Duration::from_millis(200);
        ShardManager::open(config).unwrap()
    }

    fn key(s: &str) -> ShardKey {
        ShardKey::from_string(s)
    }

    #[tokio::test]
    async fn register_indexes_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        let (bytes, cids) = shard_bytes(1);

        manager
            .register(key("a"), file_mount(dir.path(), "a", &bytes))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(manager.shard_info(&key("a")).unwrap().state, ShardState::Available);
        for cid in &cids {
            assert_eq!(manager.block_index().lookup(cid), vec![key("a")]);
        }
        assert!(dir.path().join("index").join("a.index").is_file());
    }

    #[tokio::test]
    async fn duplicate_register_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        let (bytes, _) = shard_bytes(1);
        let mount = file_mount(dir.path(), "a", &bytes);

        let first = manager.register(key("a"), mount.clone()).unwrap();
        let err = manager.register(key("a"), mount).unwrap_err();
        assert!(matches!(err, ShardError::AlreadyExists(_)));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unreadable_mount_leaves_shard_errored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());

        let err = manager
            .register(key("bad"), file_mount(dir.path(), "bad", b"not a shard"))
            .unwrap()
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, ShardError::IndexingFailed { .. }));

        let info = manager.shard_info(&key("bad")).unwrap();
        assert!(info.error().is_some());
        let err = manager.acquire(&key("bad")).unwrap().await.unwrap().unwrap_err();
        assert!(matches!(err, ShardError::Errored { .. }));
        let err = manager
            .register(key("bad"), file_mount(dir.path(), "bad2", b""))
            .unwrap_err();
        assert!(matches!(err, ShardError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn acquire_unknown_fails_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        assert!(matches!(
            manager.acquire(&key("nope")).unwrap_err(),
            ShardError::Unknown(_)
        ));
        assert!(matches!(
            manager.destroy(&key("nope")).unwrap_err(),
            ShardError::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn acquire_counts_references_and_reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        let (bytes, cids) = shard_bytes(2);

        let path = dir.path().join("a");
        let mut mount = InMemoryOnceMount::new(&path);
        mount.write_all(&bytes).unwrap();
        mount.write_to(&mut fs::File::create(&path).unwrap()).unwrap();
        manager
            .register(key("a"), Arc::new(mount))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let accessor = manager.acquire(&key("a")).unwrap().await.unwrap().unwrap();
        let second = manager.acquire(&key("a")).unwrap().await.unwrap().unwrap();
        assert_eq!(manager.acquisitions(), 2);
        assert_eq!(manager.shard_info(&key("a")).unwrap().state, ShardState::Acquired(2));

        let mut read = Vec::new();
        accessor.reader().read_to_end(&mut read).unwrap();
        assert_eq!(read, bytes);
        assert!(second.blockstore().has(&cids[0]));

        drop(accessor);
        drop(second);
        assert_eq!(manager.shard_info(&key("a")).unwrap().state, ShardState::Available);
    }

    #[tokio::test]
    async fn destroy_waits_for_accessors_to_drain() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        let (bytes, cids) = shard_bytes(3);
        manager
            .register(key("a"), file_mount(dir.path(), "a", &bytes))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let accessor = manager.acquire(&key("a")).unwrap().await.unwrap().unwrap();
        let pending = manager.destroy(&key("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.shard_info(&key("a")).unwrap().state, ShardState::Destroying);
        let err = manager.acquire(&key("a")).unwrap().await.unwrap().unwrap_err();
        assert!(matches!(err, ShardError::Destroying(_)));

        drop(accessor);
        pending.await.unwrap().unwrap();
        assert!(matches!(
            manager.shard_info(&key("a")).unwrap_err(),
            ShardError::Unknown(_)
        ));
        assert!(!dir.path().join("index").join("a.index").exists());
        // the block index is dropped separately by the caller
        assert_eq!(manager.block_index().lookup(&cids[0]), vec![key("a")]);
    }

    #[tokio::test]
    async fn destroy_times_out_while_busy() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        let (bytes, _) = shard_bytes(4);
        manager
            .register(key("a"), file_mount(dir.path(), "a", &bytes))
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        let accessor = manager.acquire(&key("a")).unwrap().await.unwrap().unwrap();
        let err = manager.destroy(&key("a")).unwrap().await.unwrap().unwrap_err();
        assert!(matches!(err, ShardError::Busy { refs: 1, .. }));
        assert_eq!(manager.shard_info(&key("a")).unwrap().state, ShardState::Acquired(1));
        drop(accessor);
    }

    #[tokio::test]
    async fn gc_reclaims_transients_of_idle_shards_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = open(dir.path());
        for name in ["a", "b"] {
            let (bytes, _) = shard_bytes(name.as_bytes()[0]);
            manager
                .register(key(name), file_mount(dir.path(), name, &bytes))
                .unwrap()
                .await
                .unwrap()
                .unwrap();
            fs::write(dir.path().join("transients").join(name), b"scratch").unwrap();
        }
        let held = manager.acquire(&key("b")).unwrap().await.unwrap().unwrap();

        let result = manager.gc().unwrap().await.unwrap().unwrap();
        assert_eq!(result.shards.get(&key("a")), Some(&gc::GcOutcome::Reclaimed));
        assert!(!result.shards.contains_key(&key("b")));
        assert!(dir.path().join("a").is_file());
        assert!(dir.path().join("transients").join("b").exists());
        drop(held);
    }

    #[tokio::test]
    async fn reopen_recovers_registry() {
        let dir = tempfile::tempdir().unwrap();
        let (bytes, cids) = shard_bytes(5);
        {
            let manager = open(dir.path());
            manager
                .register(key("ok"), file_mount(dir.path(), "ok", &bytes))
                .unwrap()
                .await
                .unwrap()
                .unwrap();
            let _ = manager
                .register(key("bad"), file_mount(dir.path(), "bad", b"junk"))
                .unwrap()
                .await
                .unwrap();
            manager
                .register(key("gone"), file_mount(dir.path(), "gone", &shard_bytes(6).0))
                .unwrap()
                .await
                .unwrap()
                .unwrap();
            manager.destroy(&key("gone")).unwrap().await.unwrap().unwrap();
            manager.close().unwrap();
            assert!(matches!(manager.gc().unwrap_err(), ShardError::Closed));
        }

        let manager = open(dir.path());
        let keys: Vec<ShardKey> = manager.all_shards().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec![key("bad"), key("ok")]);
        assert!(manager.shard_info(&key("bad")).unwrap().error().is_some());
        assert_eq!(manager.block_index().lookup(&cids[1]), vec![key("ok")]);

        let accessor = manager.acquire(&key("ok")).unwrap().await.unwrap().unwrap();
        assert_eq!(accessor.bytes(), &bytes[..]);
    }

    #[tokio::test]
    async fn interrupted_registration_comes_back_errored() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new(dir.path());
        {
            let registry = Registry::open(&config.registry_path()).unwrap();
            registry
                .record(RegistryRecord::Registering {
                    key: key("half"),
                    path: dir.path().join("half"),
                })
                .unwrap();
        }
        let manager = ShardManager::open(config).unwrap();
        assert_eq!(
            manager.shard_info(&key("half")).unwrap().error(),
            Some(INTERRUPTED)
        );
    }
}
