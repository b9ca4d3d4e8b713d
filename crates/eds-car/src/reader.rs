use std::io::Read;

use eds_types::{ContentId, HASH_LEN};

use crate::error::{CarError, CarResult};
use crate::header::CarHeader;
use crate::writer::{decode_varint, read_varint};

/// Frames larger than this are treated as corruption rather than allocated.
pub const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// A block read back from a container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub cid: ContentId,
    pub data: Vec<u8>,
    /// Offset of `data` from the start of the container.
    pub offset: u64,
}

/// Sequential reader over a container: header first, then one frame at a time.
pub struct BlockReader<R: Read> {
    inner: R,
    header: CarHeader,
    position: u64,
}

impl<R: Read> BlockReader<R> {
    /// Parse the header and position the reader at the first frame.
    pub fn new(mut inner: R) -> CarResult<Self> {
        let header = CarHeader::read_from(&mut inner)?;
        let position = header.encoded_len() as u64;
        Ok(Self {
            inner,
            header,
            position,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Read the next block. Returns `Ok(None)` at a clean end of stream.
    pub fn next_block(&mut self) -> CarResult<Option<Block>> {
        let frame_start = self.position;
        let (frame_len, consumed) = match read_varint(&mut self.inner)? {
            Some(v) => v,
            None => return Ok(None),
        };
        if frame_len < HASH_LEN as u64 || frame_len > MAX_FRAME_LEN {
            return Err(CarError::CorruptBlock {
                offset: frame_start,
                reason: format!("invalid frame length {frame_len}"),
            });
        }

        let mut cid = [0u8; HASH_LEN];
        self.inner.read_exact(&mut cid)?;
        let mut data = vec![0u8; frame_len as usize - HASH_LEN];
        self.inner.read_exact(&mut data)?;

        let offset = frame_start + consumed as u64 + HASH_LEN as u64;
        self.position = offset + data.len() as u64;
        Ok(Some(Block {
            cid: ContentId::from_hash(cid),
            data,
            offset,
        }))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Byte length of the header plus the first `blocks` frames of an encoded
/// container.
pub fn prefix_len(bytes: &[u8], blocks: usize) -> CarResult<usize> {
    let header = CarHeader::read_from(&mut &bytes[..])?;
    let mut pos = header.encoded_len();
    for _ in 0..blocks {
        if pos >= bytes.len() {
            return Err(CarError::CorruptBlock {
                offset: pos as u64,
                reason: "container ends before requested block".into(),
            });
        }
        let (frame_len, consumed) = decode_varint(&bytes[pos..]).map_err(|_| CarError::CorruptBlock {
            offset: pos as u64,
            reason: "truncated frame length".into(),
        })?;
        let end = pos + consumed + frame_len as usize;
        if end > bytes.len() {
            return Err(CarError::CorruptBlock {
                offset: pos as u64,
                reason: "frame extends beyond container".into(),
            });
        }
        pos = end;
    }
    Ok(pos)
}
