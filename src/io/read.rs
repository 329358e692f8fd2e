//! Buffered reading primitives.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Refill granularity for the stream reader.
const READ_BUFFER_SIZE: usize = 1 << 20;

/// Upper bound on a single length-prefixed string, to catch stream
/// desynchronization before it turns into a giant allocation.
const MAX_STRING_SIZE: usize = 1 << 30;

/// Byte-level decoding primitives of the native protocol.
///
/// Implemented by the buffered socket reader and by the decompressed-frame
/// reader, so the block codec and the column codecs are agnostic about
/// whether compression is in effect.
#[async_trait]
pub trait ClickHouseRead: Send {
    /// Read exactly one byte.
    async fn read_byte(&mut self) -> Result<u8>;

    /// Read exactly `buf.len()` bytes. A channel close mid-read is an error.
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Read exactly `n` bytes into a fresh buffer.
    async fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf).await?;
        Ok(buf)
    }

    /// Read a LEB128 varint.
    async fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte().await?;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::Protocol("varint overflow".into()));
            }
        }
    }

    /// Read a varint-length-prefixed byte string.
    async fn read_str(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint().await? as usize;
        if len > MAX_STRING_SIZE {
            return Err(Error::Protocol(format!("string length too large: {len}")));
        }
        self.read_bytes(len).await
    }

    /// Read a varint-length-prefixed UTF-8 string.
    async fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_str().await?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string: {e}")))
    }

    /// Read exactly `n` bytes of a fixed-width string, verbatim.
    async fn read_fixed_str(&mut self, n: usize) -> Result<Vec<u8>> {
        self.read_bytes(n).await
    }

    /// Read a little-endian `u8`.
    async fn read_u8(&mut self) -> Result<u8> {
        self.read_byte().await
    }

    /// Read a little-endian `u16`.
    async fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf).await?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a little-endian `u32`.
    async fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf).await?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a little-endian `u64`.
    async fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf).await?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a little-endian `i8`.
    async fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_byte().await? as i8)
    }

    /// Read a little-endian `i16`.
    async fn read_i16(&mut self) -> Result<i16> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf).await?;
        Ok(i16::from_le_bytes(buf))
    }

    /// Read a little-endian `i32`.
    async fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf).await?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read a little-endian `i64`.
    async fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf).await?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a little-endian IEEE 754 `f32`.
    async fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32().await?))
    }

    /// Read a little-endian IEEE 754 `f64`.
    async fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64().await?))
    }

    /// Read a plain little-endian 16-byte `i128`.
    async fn read_i128(&mut self) -> Result<i128> {
        let mut buf = [0u8; 16];
        self.read_into(&mut buf).await?;
        Ok(i128::from_le_bytes(buf))
    }

    /// Read a plain little-endian 16-byte `u128`.
    async fn read_u128(&mut self) -> Result<u128> {
        let mut buf = [0u8; 16];
        self.read_into(&mut buf).await?;
        Ok(u128::from_le_bytes(buf))
    }

    /// Read a pair-encoded 128-bit integer: high 64-bit half first, then the
    /// low half, each little-endian. Used by UUIDs and checksums.
    async fn read_u128_pair(&mut self) -> Result<u128> {
        let hi = self.read_u64().await?;
        let lo = self.read_u64().await?;
        Ok((u128::from(hi) << 64) | u128::from(lo))
    }
}

/// Buffered reader over one half of the connection's transport.
///
/// Pulls fixed-size chunks into a heap buffer and serves requests from it,
/// refilling on exhaustion.
pub struct StreamReader {
    inner: Box<dyn AsyncRead + Unpin + Send + Sync>,
    buffer: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl StreamReader {
    /// Wrap the read half of a transport.
    pub fn new(inner: Box<dyn AsyncRead + Unpin + Send + Sync>) -> Self {
        Self::with_capacity(inner, READ_BUFFER_SIZE)
    }

    /// Wrap with an explicit refill chunk size (used by tests to force
    /// refills on small payloads).
    pub fn with_capacity(inner: Box<dyn AsyncRead + Unpin + Send + Sync>, capacity: usize) -> Self {
        StreamReader {
            inner,
            buffer: vec![0u8; capacity.max(1)],
            pos: 0,
            filled: 0,
        }
    }

    async fn refill(&mut self) -> Result<()> {
        let n = self.inner.read(&mut self.buffer).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        self.pos = 0;
        self.filled = n;
        Ok(())
    }
}

#[async_trait]
impl ClickHouseRead for StreamReader {
    async fn read_byte(&mut self) -> Result<u8> {
        if self.pos == self.filled {
            self.refill().await?;
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            if self.pos == self.filled {
                self.refill().await?;
            }
            let take = (buf.len() - written).min(self.filled - self.pos);
            buf[written..written + take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
            written += take;
        }
        Ok(())
    }
}

/// In-memory reader used for decompressed frames and unit tests.
pub struct SliceReader {
    data: Vec<u8>,
    pos: usize,
}

impl SliceReader {
    /// Wrap an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        SliceReader { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[async_trait]
impl ClickHouseRead for SliceReader {
    async fn read_byte(&mut self) -> Result<u8> {
        if self.pos == self.data.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of buffer",
            )));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.remaining() < buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of buffer",
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }
}
