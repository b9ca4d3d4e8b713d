use eds_car::CarError;
use eds_types::DataRoot;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SquareError {
    #[error("invalid square width {0}: must be a power of two")]
    InvalidWidth(usize),

    #[error("share {index} has size {actual}, expected {expected}")]
    ShareSize {
        index: usize,
        expected: usize,
        actual: usize,
    },

    #[error("invalid root count {0}: expected twice a power-of-two width")]
    InvalidRootCount(usize),

    #[error("corrupt share {index}: {reason}")]
    CorruptShare { index: usize, reason: String },

    #[error("content integrity mismatch: expected {expected}, computed {computed}")]
    IntegrityMismatch {
        expected: DataRoot,
        computed: DataRoot,
    },

    #[error("container error: {0}")]
    Car(#[from] CarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SquareResult<T> = Result<T, SquareError>;
