use std::io::{self, Read, Write};

use eds_types::{ContentId, HASH_LEN};

use crate::error::{CarError, CarResult};
use crate::header::CarHeader;

/// Appends a header followed by block frames to a byte sink.
///
/// Frame layout:
/// ```text
/// [varint: frame length = 32 + data length]
/// [32 bytes: content identifier]
/// [N bytes: block data]
/// ```
pub struct CarWriter<W: Write> {
    inner: W,
    offset: u64,
    blocks: usize,
}

impl<W: Write> CarWriter<W> {
    /// Write the header and return a writer positioned at the first frame.
    pub fn new(mut inner: W, header: &CarHeader) -> CarResult<Self> {
        header.write_to(&mut inner)?;
        Ok(Self {
            inner,
            offset: header.encoded_len() as u64,
            blocks: 0,
        })
    }

    /// Append one block. Returns the offset of the block's data.
    pub fn put_block(&mut self, cid: &ContentId, data: &[u8]) -> CarResult<u64> {
        let mut prefix = Vec::with_capacity(10);
        encode_varint(&mut prefix, (HASH_LEN + data.len()) as u64);
        self.inner.write_all(&prefix)?;
        self.inner.write_all(cid.as_bytes())?;
        self.inner.write_all(data)?;

        let data_offset = self.offset + prefix.len() as u64 + HASH_LEN as u64;
        self.offset = data_offset + data.len() as u64;
        self.blocks += 1;
        Ok(data_offset)
    }

    /// Bytes written so far, header included.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of block frames written.
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> CarResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(CarError::CorruptBlock {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(CarError::CorruptBlock {
        offset: 0,
        reason: "truncated varint".into(),
    })
}

/// Read a varint from a stream. `Ok(None)` means the stream ended cleanly
/// before the first byte.
pub(crate) fn read_varint<R: Read>(r: &mut R) -> io::Result<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    let mut shift = 0;
    let mut byte = [0u8; 1];
    for i in 0..10 {
        match r.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
        value |= ((byte[0] & 0x7F) as u64) << shift;
        shift += 7;
        if byte[0] & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Err(io::Error::new(io::ErrorKind::InvalidData, "varint overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_small_and_large() {
        for value in [0u64, 42, 127, 128, 1_000_000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            let (decoded, consumed) = decode_varint(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, buf.len());

            let streamed = read_varint(&mut buf.as_slice()).unwrap().unwrap();
            assert_eq!(streamed, (value, buf.len()));
        }
    }

    #[test]
    fn decode_varint_truncated() {
        let err = decode_varint(&[0x80]).unwrap_err();
        assert!(matches!(err, CarError::CorruptBlock { .. }));
    }

    #[test]
    fn read_varint_clean_eof() {
        let empty: &[u8] = &[];
        assert!(read_varint(&mut &*empty).unwrap().is_none());
        let err = read_varint(&mut &[0x80u8][..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn writer_tracks_offsets() {
        let header = CarHeader::new(vec![ContentId::from_bytes(b"root")]);
        let mut writer = CarWriter::new(Vec::new(), &header).unwrap();
        let first = writer.put_block(&ContentId::from_bytes(b"a"), b"aaaa").unwrap();
        // 44 header bytes, 1 varint byte, 32 cid bytes
        assert_eq!(first, 44 + 1 + 32);
        let second = writer.put_block(&ContentId::from_bytes(b"b"), b"bb").unwrap();
        assert_eq!(second, first + 4 + 1 + 32);
        assert_eq!(writer.block_count(), 2);

        let offset = writer.offset();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len() as u64, offset);
        assert_eq!(&bytes[second as usize..], b"bb");
    }
}
