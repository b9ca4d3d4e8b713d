use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ShardError, ShardResult};

/// Frame header: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Append-only, crash-tolerant record log.
///
/// On-disk format, repeated:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized record)]
/// ```
///
/// A record is either fully present or skipped on replay: frames with a bad
/// checksum are dropped and a torn tail ends recovery.
pub struct Journal<T> {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    /// Open (or create) the journal at `path`.
    pub fn open(path: &Path) -> ShardResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
            _record: PhantomData,
        })
    }

    /// Append one record and flush it to the OS.
    pub fn append(&self, record: &T) -> ShardResult<()> {
        let payload = encode(record)?;
        let mut w = self.writer.lock().expect("journal lock poisoned");
        write_frame(&mut *w, &payload)?;
        w.flush()?;
        Ok(())
    }

    /// Read back every intact record, oldest first.
    pub fn recover(&self) -> ShardResult<Vec<T>> {
        let mut data = Vec::new();
        BufReader::new(File::open(&self.path)?).read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut offset = 0usize;
        while offset + HEADER_SIZE <= data.len() {
            let length = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]) as usize;
            let expected_crc = u32::from_le_bytes([
                data[offset + 4],
                data[offset + 5],
                data[offset + 6],
                data[offset + 7],
            ]);

            let start = offset + HEADER_SIZE;
            if length == 0 || start + length > data.len() {
                warn!(
                    path = %self.path.display(),
                    offset,
                    length,
                    "torn journal tail; stopping replay"
                );
                break;
            }

            let payload = &data[start..start + length];
            offset = start + length;

            if crc32fast::hash(payload) != expected_crc {
                warn!(path = %self.path.display(), offset = start, "journal CRC mismatch; skipping record");
                continue;
            }
            match bincode::deserialize::<T>(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %self.path.display(), offset = start, error = %e, "undecodable journal record; skipping")
                }
            }
        }

        debug!(path = %self.path.display(), recovered = records.len(), "journal replayed");
        Ok(records)
    }

    /// Replace the journal's contents with `records`.
    ///
    /// The new log is written next to the old one and renamed over it, so a
    /// crash mid-compaction leaves either the old or the new log intact.
    pub fn compact(&self, records: &[T]) -> ShardResult<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                write_frame(&mut out, &encode(record)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        let mut w = self.writer.lock().expect("journal lock poisoned");
        w.flush()?;
        fs::rename(&tmp, &self.path)?;
        *w = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);

        debug!(path = %self.path.display(), records = records.len(), "journal compacted");
        Ok(())
    }
}

fn encode<T: Serialize>(record: &T) -> ShardResult<Vec<u8>> {
    bincode::serialize(record).map_err(|e| ShardError::Journal(e.to_string()))
}

fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> io::Result<()> {
    w.write_all(&(payload.len() as u32).to_le_bytes())?;
    w.write_all(&crc32fast::hash(payload).to_le_bytes())?;
    w.write_all(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Rec {
        Put(String, u32),
        Gone(String),
    }

    fn path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("sub").join("test.journal")
    }

    fn open(dir: &tempfile::TempDir) -> Journal<Rec> {
        Journal::open(&path(dir)).unwrap()
    }

    #[test]
    fn append_and_recover() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(&dir);
        journal.append(&Rec::Put("a".into(), 1)).unwrap();
        journal.append(&Rec::Gone("a".into())).unwrap();

        let reopened = open(&dir);
        assert_eq!(
            reopened.recover().unwrap(),
            vec![Rec::Put("a".into(), 1), Rec::Gone("a".into())]
        );
    }

    #[test]
    fn torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(&dir);
        journal.append(&Rec::Put("a".into(), 1)).unwrap();
        journal.append(&Rec::Put("b".into(), 2)).unwrap();

        let len = fs::metadata(path(&dir)).unwrap().len();
        let file = OpenOptions::new().write(true).open(path(&dir)).unwrap();
        file.set_len(len - 2).unwrap();

        assert_eq!(journal.recover().unwrap(), vec![Rec::Put("a".into(), 1)]);
    }

    #[test]
    fn corrupt_record_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(&dir);
        journal.append(&Rec::Put("a".into(), 1)).unwrap();
        journal.append(&Rec::Put("b".into(), 2)).unwrap();

        let mut data = fs::read(path(&dir)).unwrap();
        data[HEADER_SIZE] ^= 0xFF;
        fs::write(path(&dir), &data).unwrap();

        assert_eq!(journal.recover().unwrap(), vec![Rec::Put("b".into(), 2)]);
    }

    #[test]
    fn compact_replaces_contents_and_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let journal = open(&dir);
        for i in 0..10 {
            journal.append(&Rec::Put(format!("k{i}"), i)).unwrap();
        }
        journal.compact(&[Rec::Put("k9".into(), 9)]).unwrap();
        journal.append(&Rec::Gone("k9".into())).unwrap();

        assert_eq!(
            open(&dir).recover().unwrap(),
            vec![Rec::Put("k9".into(), 9), Rec::Gone("k9".into())]
        );
    }
}
