//! Framed I/O over the connection's transport.
//!
//! [`read`] and [`write`] define the byte-level primitives (varints,
//! length-prefixed strings, fixed-width little-endian integers) behind the
//! [`ClickHouseRead`]/[`ClickHouseWrite`] traits, together with the buffered
//! stream implementations that talk to the socket. [`compressed`] layers the
//! checksummed compression frames of the native protocol on top of the same
//! traits, and [`block`] is the block codec that runs over either.

pub mod block;
pub mod compressed;
pub mod read;
pub mod write;

pub use block::{BlockReader, BlockWriter};
pub use compressed::{CompressedReader, CompressedWriter};
pub use read::{ClickHouseRead, StreamReader};
pub use write::{ClickHouseWrite, StreamWriter};
