use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use eds_shard::{
    BlockIndex, GcResult, InMemoryOnceMount, ShardAccessor, ShardBlockstore, ShardError,
    ShardManager, ShardReader,
};
use eds_square::{ods_block_count, read_dah, write_eds, DataAvailabilityHeader, EdsCodec, ExtendedSquare};
use eds_types::{DataRoot, ShardKey};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, info_span, warn, Instrument};

use crate::blockstore::StoreBlockstore;
use crate::cache::AccessorCache;
use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::tracker::await_pending;

struct GcLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct StoreInner {
    config: StoreConfig,
    manager: RwLock<ShardManager>,
    cache: AccessorCache,
    codec: EdsCodec,
    last_gc: RwLock<GcResult>,
    started: AtomicBool,
    gc_loop: Mutex<Option<GcLoop>>,
}

/// Content-addressed store of extended data squares, one shard file per
/// square, keyed by the square's data root.
///
/// [`start`](Store::start) must run before any other operation and
/// [`stop`](Store::stop) flushes index state and releases every handle.
/// Clones share the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open the store under `config.base_path`, creating its directories
    /// and replaying the lifecycle journals.
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        Self::with_codec(config, EdsCodec::default())
    }

    pub fn with_codec(config: StoreConfig, codec: EdsCodec) -> StoreResult<Self> {
        config.validate()?;
        for dir in [config.blocks_dir(), config.index_dir(), config.transients_dir()] {
            fs::create_dir_all(&dir).map_err(|e| {
                StoreError::Config(format!("creating {}: {e}", dir.display()))
            })?;
        }
        let manager = ShardManager::open(config.manager_config())?;
        let cache = AccessorCache::new(config.cache_size, config.stripe_count);
        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                manager: RwLock::new(manager),
                cache,
                codec,
                last_gc: RwLock::new(GcResult::default()),
                started: AtomicBool::new(false),
                gc_loop: Mutex::new(None),
            }),
        })
    }

    /// Start serving and launch the background GC loop if configured.
    ///
    /// A store that was stopped reopens its shard manager, replaying the
    /// journals written by the previous `stop`.
    pub async fn start(&self) -> StoreResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.inner.reopen_manager() {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        *self.inner.last_gc.write().expect("gc result lock poisoned") = GcResult::default();

        if let Some(interval) = self.inner.config.gc_interval() {
            let (shutdown, rx) = watch::channel(false);
            let handle = tokio::spawn(gc_loop(Arc::downgrade(&self.inner), interval, rx));
            *self.inner.gc_loop.lock().expect("gc loop lock poisoned") =
                Some(GcLoop { shutdown, handle });
        }
        info!(
            base_path = %self.inner.config.base_path.display(),
            gc_interval = ?self.inner.config.gc_interval(),
            "store started"
        );
        Ok(())
    }

    /// Stop the GC loop, drop cached accessors and flush the journals.
    pub async fn stop(&self) -> StoreResult<()> {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let gc = self.inner.gc_loop.lock().expect("gc loop lock poisoned").take();
        if let Some(gc) = gc {
            gc.shutdown.send_replace(true);
            if let Err(e) = gc.handle.await {
                warn!(error = %e, "gc loop did not shut down cleanly");
            }
        }
        let cached = self.inner.cache.len();
        self.inner.cache.clear();
        self.inner.manager().close()?;
        info!(cached, "store stopped");
        Ok(())
    }

    /// Store `eds` under `root`.
    ///
    /// The root is trusted, not recomputed. Fails with
    /// [`StoreError::AlreadyExists`] if the root is already registered. A
    /// cancelled put is indeterminate: registration keeps running and
    /// [`has`](Store::has) eventually reflects its outcome.
    pub async fn put(&self, ctx: &Context, root: &DataRoot, eds: &ExtendedSquare) -> StoreResult<()> {
        let span = info_span!("store/put", root = %root.short_hex(), width = eds.width());
        self.put_square(ctx, root, eds).instrument(span).await
    }

    async fn put_square(&self, ctx: &Context, root: &DataRoot, eds: &ExtendedSquare) -> StoreResult<()> {
        self.ensure_started()?;
        let key = ShardKey::from(root);
        let manager = self.inner.manager();

        // held until registration is submitted so concurrent puts of one
        // root never share the shard file
        let stripe = self.lock_stripe(ctx, "put", &key).await?;
        if manager.shard_info(&key).is_ok() {
            return Err(StoreError::AlreadyExists(*root));
        }
        let path = self.shard_path(&key);
        let file = self.create_shard_file(root, &key, &path)?;
        let (mount, written) = write_shard(root, eds, &path, file).await?;

        let registered = manager.register(key.clone(), Arc::new(mount));
        drop(stripe);
        let pending = match registered {
            Ok(pending) => pending,
            Err(e) => {
                if !matches!(e, ShardError::AlreadyExists(_)) {
                    remove_quietly(&path);
                }
                return Err(StoreError::from_shard("put", root, e));
            }
        };
        let ceiling = Duration::from_secs(self.inner.config.register_track_secs);
        match await_pending(ctx, "put", &key, pending, ceiling).await? {
            Ok(()) => {
                info!(bytes = written, "square stored");
                Ok(())
            }
            Err(e) => Err(StoreError::from_shard("put", root, e)),
        }
    }

    /// Decode the square stored under `root`, re-deriving its root.
    pub async fn get(&self, ctx: &Context, root: &DataRoot) -> StoreResult<ExtendedSquare> {
        let span = info_span!("store/get", root = %root.short_hex());
        self.get_square(ctx, root).instrument(span).await
    }

    async fn get_square(&self, ctx: &Context, root: &DataRoot) -> StoreResult<ExtendedSquare> {
        let reader = self.car_reader(ctx, "get", root).await?;
        let codec = self.inner.codec.clone();
        let expected = *root;
        tokio::task::spawn_blocking(move || codec.read_eds(reader, &expected))
            .await
            .map_err(|e| StoreError::io("get", root, io::Error::other(e)))?
            .map_err(|e| StoreError::from_square("get", root, e))
    }

    /// Reader over the shard header and first quadrant. Integrity is not
    /// re-verified on this path.
    pub async fn get_car(&self, ctx: &Context, root: &DataRoot) -> StoreResult<ShardReader> {
        let span = info_span!("store/get-car", root = %root.short_hex());
        self.car_reader(ctx, "get_car", root).instrument(span).await
    }

    /// Block-addressable view of one stored square.
    pub async fn car_blockstore(&self, ctx: &Context, root: &DataRoot) -> StoreResult<ShardBlockstore> {
        let span = info_span!("store/car-blockstore", root = %root.short_hex());
        let accessor = self
            .cached_accessor(ctx, "car_blockstore", root)
            .instrument(span)
            .await?;
        Ok(accessor.blockstore())
    }

    /// Availability header of the square stored under `root`.
    pub async fn get_dah(&self, ctx: &Context, root: &DataRoot) -> StoreResult<DataAvailabilityHeader> {
        let span = info_span!("store/get-dah", root = %root.short_hex());
        self.read_header(ctx, root).instrument(span).await
    }

    async fn read_header(&self, ctx: &Context, root: &DataRoot) -> StoreResult<DataAvailabilityHeader> {
        let accessor = self.cached_accessor(ctx, "get_dah", root).await?;
        let dah = read_dah(accessor.reader()).map_err(|e| StoreError::from_square("get_dah", root, e))?;
        let computed = dah.hash();
        if computed != *root {
            warn!(computed = %computed.short_hex(), "stored header does not match its root");
            return Err(StoreError::IntegrityMismatch {
                root: *root,
                computed,
            });
        }
        Ok(dah)
    }

    /// Whether a square is registered under `root`.
    ///
    /// An errored shard exists but is unusable: it is reported as
    /// [`StoreError::Errored`] rather than `Ok(true)`.
    pub async fn has(&self, root: &DataRoot) -> StoreResult<bool> {
        let _span = debug_span!("store/has", root = %root.short_hex()).entered();
        self.ensure_started()?;
        let key = ShardKey::from(root);
        match self.inner.manager().shard_info(&key) {
            Ok(info) => match info.error() {
                Some(reason) => Err(StoreError::Errored {
                    key,
                    reason: reason.to_string(),
                }),
                None => Ok(true),
            },
            Err(ShardError::Unknown(_)) => Ok(false),
            Err(e) => Err(StoreError::from_shard("has", root, e)),
        }
    }

    /// Remove the square under `root`: destroy its shard, drop its block
    /// index entries and delete its file, in that order.
    pub async fn remove(&self, ctx: &Context, root: &DataRoot) -> StoreResult<()> {
        let span = info_span!("store/remove", root = %root.short_hex());
        self.remove_square(ctx, root).instrument(span).await
    }

    async fn remove_square(&self, ctx: &Context, root: &DataRoot) -> StoreResult<()> {
        self.ensure_started()?;
        let key = ShardKey::from(root);

        // held until destroy settles so the key cannot be re-cached meanwhile
        let _stripe = self.lock_stripe(ctx, "remove", &key).await?;
        if self.inner.cache.remove(&key) {
            debug!("evicted cached accessor");
        }

        let manager = self.inner.manager();
        let pending = manager
            .destroy(&key)
            .map_err(|e| StoreError::from_shard("remove", root, e))?;
        let ceiling = Duration::from_secs(self.inner.config.acquire_track_secs);
        await_pending(ctx, "remove", &key, pending, ceiling)
            .await?
            .map_err(|e| StoreError::from_shard("remove", root, e))?;

        match manager.block_index().drop_all(&key) {
            Ok(true) => {}
            Ok(false) => warn!("no block index entries to drop"),
            Err(e) => return Err(StoreError::from_shard("remove", root, e)),
        }

        match fs::remove_file(self.shard_path(&key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("shard file already gone");
            }
            Err(e) => return Err(StoreError::io("remove", root, e)),
        }
        info!("square removed");
        Ok(())
    }

    /// Roots of every registered square, errored ones included.
    pub async fn list(&self) -> StoreResult<Vec<DataRoot>> {
        let _span = debug_span!("store/list").entered();
        self.ensure_started()?;
        self.inner
            .manager()
            .all_shards()
            .into_iter()
            .map(|info| info.key.to_data_root().map_err(StoreError::from))
            .collect()
    }

    /// Read-only block view across every stored square.
    pub fn blockstore(&self) -> StoreBlockstore {
        StoreBlockstore::new(self.clone())
    }

    /// Outcome of the most recent GC pass.
    pub fn last_gc_result(&self) -> GcResult {
        self.inner.last_gc.read().expect("gc result lock poisoned").clone()
    }

    /// Run one GC pass now and record its result.
    pub async fn gc(&self) -> StoreResult<GcResult> {
        self.ensure_started()?;
        self.inner.run_gc().await
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Handle to the shard manager currently serving the store.
    pub fn manager(&self) -> ShardManager {
        self.inner.manager()
    }

    pub(crate) fn block_index(&self) -> Arc<BlockIndex> {
        Arc::clone(self.inner.manager().block_index())
    }

    /// Cached accessor for `root`, acquiring one on a miss. At most one
    /// acquisition per key is in flight at a time.
    pub(crate) async fn cached_accessor(
        &self,
        ctx: &Context,
        op: &'static str,
        root: &DataRoot,
    ) -> StoreResult<ShardAccessor> {
        self.ensure_started()?;
        let key = ShardKey::from(root);
        let _stripe = self.lock_stripe(ctx, op, &key).await?;
        if let Some(accessor) = self.inner.cache.get(&key) {
            return Ok(accessor);
        }

        let pending = self
            .inner
            .manager()
            .acquire(&key)
            .map_err(|e| StoreError::from_shard(op, root, e))?;
        let ceiling = Duration::from_secs(self.inner.config.acquire_track_secs);
        let accessor = await_pending(ctx, op, &key, pending, ceiling)
            .await?
            .map_err(|e| StoreError::from_shard(op, root, e))?;
        Ok(self.inner.cache.insert(key, accessor))
    }

    async fn car_reader(&self, ctx: &Context, op: &'static str, root: &DataRoot) -> StoreResult<ShardReader> {
        let accessor = self.cached_accessor(ctx, op, root).await?;
        let dah = read_dah(accessor.bytes()).map_err(|e| StoreError::from_square(op, root, e))?;
        accessor
            .prefix_reader(ods_block_count(dah.square_width()))
            .map_err(|e| StoreError::from_shard(op, root, e))
    }

    async fn lock_stripe<'a>(
        &'a self,
        ctx: &Context,
        op: &'static str,
        key: &ShardKey,
    ) -> StoreResult<tokio::sync::MutexGuard<'a, ()>> {
        tokio::select! {
            biased;
            guard = self.inner.cache.lock(key) => Ok(guard),
            _ = ctx.done() => Err(StoreError::Cancelled { op, key: key.clone() }),
        }
    }

    fn ensure_started(&self) -> StoreResult<()> {
        if !self.inner.started.load(Ordering::SeqCst) {
            return Err(StoreError::NotStarted);
        }
        Ok(())
    }

    fn shard_path(&self, key: &ShardKey) -> PathBuf {
        self.inner.config.blocks_dir().join(key.as_str())
    }

    /// Create the shard file exclusively. A file left behind by a put that
    /// never reached the registry is replaced.
    fn create_shard_file(&self, root: &DataRoot, key: &ShardKey, path: &Path) -> StoreResult<File> {
        match open_exclusive(path) {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if self.inner.manager().shard_info(key).is_ok() {
                    return Err(StoreError::AlreadyExists(*root));
                }
                warn!(path = %path.display(), "replacing orphaned shard file");
                fs::remove_file(path).map_err(|e| StoreError::io("put", root, e))?;
                open_exclusive(path).map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => StoreError::AlreadyExists(*root),
                    _ => StoreError::io("put", root, e),
                })
            }
            Err(e) => Err(StoreError::io("put", root, e)),
        }
    }
}

impl StoreInner {
    fn manager(&self) -> ShardManager {
        self.manager.read().expect("manager lock poisoned").clone()
    }

    fn reopen_manager(&self) -> StoreResult<()> {
        let mut manager = self.manager.write().expect("manager lock poisoned");
        if manager.is_closed() {
            *manager = ShardManager::open(self.config.manager_config())?;
            info!("shard manager reopened");
        }
        Ok(())
    }

    async fn run_gc(&self) -> StoreResult<GcResult> {
        let result = self.manager().gc()?.await.map_err(|_| ShardError::Closed)??;
        for (key, reason) in result.failures() {
            warn!(key = %key, reason, "gc failed for shard");
        }
        *self.last_gc.write().expect("gc result lock poisoned") = result.clone();
        Ok(result)
    }
}

async fn gc_loop(store: Weak<StoreInner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = store.upgrade() else { return };
                match inner.run_gc().instrument(info_span!("store/gc")).await {
                    Ok(result) => debug!(
                        swept = result.shards.len(),
                        reclaimed = result.reclaimed(),
                        "gc tick"
                    ),
                    Err(e) => {
                        error!(error = %e, "garbage collection failed; stopping gc loop");
                        return;
                    }
                }
            }
        }
    }
}

/// Encode `eds` and flush it to `file` on the blocking pool. The file is
/// removed again if either step fails.
async fn write_shard(
    root: &DataRoot,
    eds: &ExtendedSquare,
    path: &Path,
    file: File,
) -> StoreResult<(InMemoryOnceMount, usize)> {
    let eds = eds.clone();
    let expected = *root;
    let mut mount = InMemoryOnceMount::new(path);
    let written = tokio::task::spawn_blocking(move || {
        let mut file = file;
        encode_into(&expected, &eds, &mut mount, &mut file).map(|n| (mount, n))
    })
    .await
    .map_err(|e| StoreError::io("put", root, io::Error::other(e)))
    .and_then(|encoded| encoded);
    if written.is_err() {
        remove_quietly(path);
    }
    written
}

/// Encode `eds` into the mount's buffer, then write the buffer to `file`
/// in one pass.
fn encode_into(
    root: &DataRoot,
    eds: &ExtendedSquare,
    mount: &mut InMemoryOnceMount,
    file: &mut File,
) -> StoreResult<usize> {
    write_eds(eds, &mut *mount).map_err(|e| StoreError::from_square("put", root, e))?;
    let written = mount
        .write_to(file)
        .and_then(|n| file.sync_all().map(|_| n))
        .map_err(|e| StoreError::io("put", root, e))?;
    Ok(written)
}

fn open_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial shard file");
        }
    }
}
