use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use eds_car::{prefix_len, ShardIndex};
use eds_types::{ContentId, ShardKey};

use crate::error::ShardResult;
use crate::mount::ShardBytes;
use crate::shard::Shard;

struct AccessorInner {
    shard: Arc<Shard>,
    bytes: ShardBytes,
    index: Arc<ShardIndex>,
}

impl Drop for AccessorInner {
    fn drop(&mut self) {
        self.shard.release_ref();
    }
}

/// An open handle over one shard's bytes and full index.
///
/// Clones share the handle. The shard's reference count is released when
/// the last clone (including readers and blockstores made from it) drops.
#[derive(Clone)]
pub struct ShardAccessor {
    inner: Arc<AccessorInner>,
}

impl ShardAccessor {
    /// The caller must already hold a reference on `shard`.
    pub(crate) fn new(shard: Arc<Shard>, bytes: ShardBytes, index: Arc<ShardIndex>) -> Self {
        Self {
            inner: Arc::new(AccessorInner {
                shard,
                bytes,
                index,
            }),
        }
    }

    pub fn key(&self) -> &ShardKey {
        &self.inner.shard.key
    }

    pub fn bytes(&self) -> &[u8] {
        &self.inner.bytes
    }

    pub fn index(&self) -> &ShardIndex {
        &self.inner.index
    }

    /// Number of live clones of this handle.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Sequential reader over the whole shard.
    pub fn reader(&self) -> ShardReader {
        ShardReader::new(self.clone(), self.bytes().len())
    }

    /// Reader over the header and the first `blocks` frames only.
    pub fn prefix_reader(&self, blocks: usize) -> ShardResult<ShardReader> {
        let end = prefix_len(self.bytes(), blocks)?;
        Ok(ShardReader::new(self.clone(), end))
    }

    /// Block-addressable view of this shard.
    pub fn blockstore(&self) -> ShardBlockstore {
        ShardBlockstore {
            accessor: self.clone(),
        }
    }
}

impl fmt::Debug for ShardAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardAccessor")
            .field("key", self.key())
            .field("bytes", &self.inner.bytes)
            .field("blocks", &self.inner.index.len())
            .finish()
    }
}

/// `Read + Seek` over a window `[0, end)` of a shard.
pub struct ShardReader {
    accessor: ShardAccessor,
    pos: usize,
    end: usize,
}

impl ShardReader {
    fn new(accessor: ShardAccessor, end: usize) -> Self {
        Self {
            accessor,
            pos: 0,
            end,
        }
    }

    /// Total length of the readable window.
    pub fn len(&self) -> usize {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    fn window(&self) -> &[u8] {
        &self.accessor.bytes()[..self.end]
    }
}

impl Read for ShardReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos.min(self.end);
        let remaining = &self.window()[start..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos = start + n;
        Ok(n)
    }
}

impl Seek for ShardReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => (self.end as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => (self.pos as u64).checked_add_signed(delta),
        };
        match target {
            Some(n) => {
                self.pos = usize::try_from(n).unwrap_or(usize::MAX);
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

/// Read-only block view of a single shard.
#[derive(Clone)]
pub struct ShardBlockstore {
    accessor: ShardAccessor,
}

impl ShardBlockstore {
    pub fn key(&self) -> &ShardKey {
        self.accessor.key()
    }

    pub fn has(&self, cid: &ContentId) -> bool {
        self.accessor.index().contains(cid)
    }

    /// Block data, checked against the CRC recorded at indexing time.
    pub fn get(&self, cid: &ContentId) -> ShardResult<Option<Bytes>> {
        let data = self.accessor.index().read_block(self.accessor.bytes(), cid)?;
        Ok(data.map(Bytes::copy_from_slice))
    }

    pub fn get_size(&self, cid: &ContentId) -> Option<usize> {
        self.accessor.index().lookup(cid).map(|loc| loc.len as usize)
    }

    /// Every block identifier in the shard, sorted.
    pub fn all_keys(&self) -> Vec<ContentId> {
        self.accessor.index().cids().to_vec()
    }
}
