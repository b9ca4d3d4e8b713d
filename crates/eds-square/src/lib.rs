//! # eds-square
//!
//! Extended data squares: the square model, its data availability header,
//! and the codec that lays a square out inside a shard container.

pub mod codec;
pub mod dah;
pub mod edstest;
pub mod error;
pub mod extend;
pub mod square;

pub use codec::{ods_block_count, read_dah, write_eds, EdsCodec};
pub use dah::DataAvailabilityHeader;
pub use error::{SquareError, SquareResult};
pub use extend::{Extender, XorExtender};
pub use square::ExtendedSquare;
