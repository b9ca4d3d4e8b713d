use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::debug;

use crate::error::ShardResult;

/// The bytes of a whole shard, either owned in memory or mapped from disk.
pub enum ShardBytes {
    Memory(Bytes),
    Mapped(Mmap),
}

impl Deref for ShardBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Memory(bytes) => bytes,
            Self::Mapped(mmap) => mmap,
        }
    }
}

impl AsRef<[u8]> for ShardBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl fmt::Debug for ShardBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Memory(_) => "memory",
            Self::Mapped(_) => "mapped",
        };
        write!(f, "ShardBytes({kind}, {} bytes)", self.len())
    }
}

/// Byte source backing a shard.
///
/// Every mount is ultimately backed by a file; the path is what the
/// registry persists so a shard can be remounted after restart.
pub trait Mount: Send + Sync + fmt::Debug {
    /// Load the shard's bytes.
    fn fetch(&self) -> ShardResult<ShardBytes>;

    /// Path of the durable file behind this mount.
    fn path(&self) -> &Path;

    /// Drop any in-memory state the mount still holds. Returns `true` if
    /// something was released.
    fn release(&self) -> bool {
        false
    }
}

/// A mount reading a shard file through a read-only memory map.
#[derive(Clone, Debug)]
pub struct FileMount {
    path: PathBuf,
}

impl FileMount {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Mount for FileMount {
    fn fetch(&self) -> ShardResult<ShardBytes> {
        let file = File::open(&self.path)?;
        if file.metadata()?.len() == 0 {
            return Ok(ShardBytes::Memory(Bytes::new()));
        }
        // Safety: the map is only sound while nobody truncates or rewrites
        // the file underneath it; a shrunk file faults on access (SIGBUS).
        // The store creates shard files with `create_new`, never reopens one
        // for writing, and only unlinks them, which leaves existing maps
        // intact. Editing files under `blocks/` by hand breaks this.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(ShardBytes::Mapped(mmap))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// A mount that serves its first fetch from an in-memory buffer and every
/// later fetch from the file at its path.
///
/// Ingestion writes the encoded shard into the buffer, flushes the buffer to
/// disk in a single write, and registers the mount. Registration then
/// indexes straight from memory instead of reading the file back.
pub struct InMemoryOnceMount {
    buf: Mutex<Option<Vec<u8>>>,
    read_once: AtomicBool,
    file: FileMount,
}

impl InMemoryOnceMount {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            buf: Mutex::new(Some(Vec::new())),
            read_once: AtomicBool::new(false),
            file: FileMount::new(path),
        }
    }

    /// Write the whole buffer to `sink` in one call.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> io::Result<usize> {
        let buf = self.buf.lock().expect("mount buffer lock poisoned");
        match buf.as_deref() {
            Some(data) => {
                sink.write_all(data)?;
                Ok(data.len())
            }
            None => Ok(0),
        }
    }

    /// Size of the buffered data, if the buffer has not been consumed yet.
    pub fn buffered_len(&self) -> Option<usize> {
        self.buf
            .lock()
            .expect("mount buffer lock poisoned")
            .as_ref()
            .map(Vec::len)
    }
}

impl Write for InMemoryOnceMount {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let buf = self.buf.get_mut().expect("mount buffer lock poisoned");
        match buf {
            Some(buf) => {
                buf.extend_from_slice(data);
                Ok(data.len())
            }
            None => Err(io::Error::other("in-memory mount buffer already consumed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Mount for InMemoryOnceMount {
    fn fetch(&self) -> ShardResult<ShardBytes> {
        if !self.read_once.swap(true, Ordering::SeqCst) {
            let taken = self.buf.lock().expect("mount buffer lock poisoned").take();
            if let Some(data) = taken {
                debug!(path = %self.file.path().display(), len = data.len(), "serving mount from memory");
                return Ok(ShardBytes::Memory(Bytes::from(data)));
            }
        }
        self.file.fetch()
    }

    fn path(&self) -> &Path {
        self.file.path()
    }

    fn release(&self) -> bool {
        self.read_once.store(true, Ordering::SeqCst);
        self.buf
            .lock()
            .expect("mount buffer lock poisoned")
            .take()
            .is_some()
    }
}

impl fmt::Debug for InMemoryOnceMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryOnceMount")
            .field("path", &self.file.path())
            .field("read_once", &self.read_once.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_mount_maps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard");
        std::fs::write(&path, b"hello shard").unwrap();

        let bytes = FileMount::new(&path).fetch().unwrap();
        assert!(matches!(bytes, ShardBytes::Mapped(_)));
        assert_eq!(&bytes[..], b"hello shard");
    }

    #[cfg(unix)]
    #[test]
    fn mapped_bytes_survive_unlink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard");
        std::fs::write(&path, b"still readable").unwrap();

        let bytes = FileMount::new(&path).fetch().unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(&bytes[..], b"still readable");
    }

    #[test]
    fn file_mount_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert!(FileMount::new(&path).fetch().unwrap().is_empty());
    }

    #[test]
    fn file_mount_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileMount::new(dir.path().join("nope")).fetch().unwrap_err();
        assert!(matches!(err, crate::ShardError::Io(_)));
    }

    #[test]
    fn once_mount_serves_memory_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard");

        let mut mount = InMemoryOnceMount::new(&path);
        mount.write_all(b"buffered").unwrap();
        assert_eq!(mount.buffered_len(), Some(8));

        let mut file = File::create(&path).unwrap();
        assert_eq!(mount.write_to(&mut file).unwrap(), 8);
        drop(file);

        let first = mount.fetch().unwrap();
        assert!(matches!(first, ShardBytes::Memory(_)));
        assert_eq!(&first[..], b"buffered");
        assert_eq!(mount.buffered_len(), None);

        let second = mount.fetch().unwrap();
        assert!(matches!(second, ShardBytes::Mapped(_)));
        assert_eq!(&second[..], b"buffered");
    }

    #[test]
    fn once_mount_release_drops_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard");
        std::fs::write(&path, b"on disk").unwrap();

        let mut mount = InMemoryOnceMount::new(&path);
        mount.write_all(b"in memory").unwrap();
        assert!(mount.release());
        assert!(!mount.release());
        assert_eq!(&mount.fetch().unwrap()[..], b"on disk");
        assert!(mount.write_all(b"more").is_err());
    }
}
