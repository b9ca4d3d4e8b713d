use eds_types::ContentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CarError {
    #[error("invalid magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    #[error("too many header roots: {0}")]
    TooManyRoots(u32),

    #[error("corrupt block at offset {offset}: {reason}")]
    CorruptBlock { offset: u64, reason: String },

    #[error("CRC32 mismatch for block {cid}")]
    CrcMismatch { cid: ContentId },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),
}

pub type CarResult<T> = Result<T, CarError>;
