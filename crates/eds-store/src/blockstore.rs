use async_trait::async_trait;
use bytes::Bytes;
use eds_shard::ShardBlockstore;
use eds_types::ContentId;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::store::Store;

/// Read-only block access by content id.
#[async_trait]
pub trait ReadBlockstore: Send + Sync {
    async fn has(&self, cid: &ContentId) -> StoreResult<bool>;

    /// Fails with [`StoreError::BlockNotFound`] if no shard holds `cid`.
    async fn get(&self, cid: &ContentId) -> StoreResult<Bytes>;

    async fn get_size(&self, cid: &ContentId) -> StoreResult<usize>;
}

#[async_trait]
impl ReadBlockstore for ShardBlockstore {
    async fn has(&self, cid: &ContentId) -> StoreResult<bool> {
        Ok(ShardBlockstore::has(self, cid))
    }

    async fn get(&self, cid: &ContentId) -> StoreResult<Bytes> {
        ShardBlockstore::get(self, cid)?.ok_or(StoreError::BlockNotFound(*cid))
    }

    async fn get_size(&self, cid: &ContentId) -> StoreResult<usize> {
        ShardBlockstore::get_size(self, cid).ok_or(StoreError::BlockNotFound(*cid))
    }
}

/// Blocks from every stored square, resolved through the block index and
/// served by cached shard accessors.
#[derive(Clone)]
pub struct StoreBlockstore {
    store: Store,
}

impl StoreBlockstore {
    pub(crate) fn new(store: Store) -> Self {
        Self { store }
    }

    /// First shard holding `cid` that can still be opened.
    async fn locate(&self, cid: &ContentId) -> StoreResult<Option<ShardBlockstore>> {
        let ctx = Context::background();
        for key in self.store.block_index().lookup(cid) {
            let root = match key.to_data_root() {
                Ok(root) => root,
                Err(e) => {
                    warn!(key = %key, error = %e, "block index holds a foreign key");
                    continue;
                }
            };
            match self.store.cached_accessor(&ctx, "blockstore", &root).await {
                Ok(accessor) => {
                    let blocks = accessor.blockstore();
                    if blocks.has(cid) {
                        return Ok(Some(blocks));
                    }
                }
                // removed or errored since it was indexed
                Err(e @ (StoreError::NotFound(_) | StoreError::Errored { .. })) => {
                    debug!(key = %key, error = %e, "skipping shard for block lookup");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ReadBlockstore for StoreBlockstore {
    async fn has(&self, cid: &ContentId) -> StoreResult<bool> {
        Ok(!self.store.block_index().lookup(cid).is_empty())
    }

    async fn get(&self, cid: &ContentId) -> StoreResult<Bytes> {
        match self.locate(cid).await? {
            Some(blocks) => ReadBlockstore::get(&blocks, cid).await,
            None => Err(StoreError::BlockNotFound(*cid)),
        }
    }

    async fn get_size(&self, cid: &ContentId) -> StoreResult<usize> {
        match self.locate(cid).await? {
            Some(blocks) => ReadBlockstore::get_size(&blocks, cid).await,
            None => Err(StoreError::BlockNotFound(*cid)),
        }
    }
}
