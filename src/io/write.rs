//! Buffered writing primitives.

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Flush threshold for the stream writer.
const WRITE_BUFFER_SIZE: usize = 1 << 20;

/// Byte-level encoding primitives of the native protocol.
///
/// Implemented by the buffered socket writer and by the compressing writer,
/// so packet and block serialization are agnostic about compression.
#[async_trait]
pub trait ClickHouseWrite: Send {
    /// Append raw bytes.
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Push everything buffered so far to the underlying sink.
    async fn flush(&mut self) -> Result<()>;

    /// Write a LEB128 varint.
    async fn write_varint(&mut self, mut value: u64) -> Result<()> {
        let mut out = [0u8; 10];
        let mut n = 0;
        loop {
            let mut byte = (value & 0x7f) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            out[n] = byte;
            n += 1;
            if value == 0 {
                break;
            }
        }
        self.write_bytes(&out[..n]).await
    }

    /// Write a varint-length-prefixed byte string.
    async fn write_str(&mut self, data: &[u8]) -> Result<()> {
        self.write_varint(data.len() as u64).await?;
        self.write_bytes(data).await
    }

    /// Write a varint-length-prefixed UTF-8 string.
    async fn write_string(&mut self, data: &str) -> Result<()> {
        self.write_str(data.as_bytes()).await
    }

    /// Write exactly `n` bytes, right-padding with NUL. The input must not
    /// exceed `n` bytes; the caller validates that.
    async fn write_fixed_str(&mut self, data: &[u8], n: usize) -> Result<()> {
        self.write_bytes(data).await?;
        if data.len() < n {
            let padding = vec![0u8; n - data.len()];
            self.write_bytes(&padding).await?;
        }
        Ok(())
    }

    /// Write a `u8`.
    async fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value]).await
    }

    /// Write a little-endian `u16`.
    async fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian `u32`.
    async fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian `u64`.
    async fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write an `i8`.
    async fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian `i16`.
    async fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian `i32`.
    async fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian `i64`.
    async fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a little-endian IEEE 754 `f32`.
    async fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits()).await
    }

    /// Write a little-endian IEEE 754 `f64`.
    async fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits()).await
    }

    /// Write a plain little-endian 16-byte `i128`.
    async fn write_i128(&mut self, value: i128) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a plain little-endian 16-byte `u128`.
    async fn write_u128(&mut self, value: u128) -> Result<()> {
        self.write_bytes(&value.to_le_bytes()).await
    }

    /// Write a pair-encoded 128-bit integer: high 64-bit half first, then
    /// the low half, each little-endian. Used by UUIDs and checksums.
    async fn write_u128_pair(&mut self, value: u128) -> Result<()> {
        self.write_u64((value >> 64) as u64).await?;
        self.write_u64(value as u64).await
    }
}

/// Buffered writer over one half of the connection's transport.
///
/// Accumulates into a heap buffer and pushes to the socket when the buffer
/// exceeds the threshold or on explicit flush.
pub struct StreamWriter {
    inner: Box<dyn AsyncWrite + Unpin + Send + Sync>,
    buffer: Vec<u8>,
    threshold: usize,
}

impl StreamWriter {
    /// Wrap the write half of a transport.
    pub fn new(inner: Box<dyn AsyncWrite + Unpin + Send + Sync>) -> Self {
        Self::with_threshold(inner, WRITE_BUFFER_SIZE)
    }

    /// Wrap with an explicit flush threshold.
    pub fn with_threshold(inner: Box<dyn AsyncWrite + Unpin + Send + Sync>, threshold: usize) -> Self {
        StreamWriter { inner, buffer: Vec::new(), threshold: threshold.max(1) }
    }

    /// Shut down the transport after flushing what is buffered.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl ClickHouseWrite for StreamWriter {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.threshold {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.inner.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.inner.flush().await?;
        Ok(())
    }
}

/// In-memory writer used for compression staging and unit tests.
#[derive(Default)]
pub struct VecWriter {
    buffer: Vec<u8>,
}

impl VecWriter {
    /// An empty buffer.
    pub fn new() -> Self {
        VecWriter::default()
    }

    /// Consume the writer, returning the accumulated bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// The accumulated bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}

#[async_trait]
impl ClickHouseWrite for VecWriter {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn varint_encoding_matches_leb128() {
        let cases: [(u64, &[u8]); 5] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
            (u64::MAX, &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]),
        ];
        for (value, encoded) in cases {
            let mut writer = VecWriter::new();
            writer.write_varint(value).await.unwrap();
            assert_eq!(writer.as_slice(), encoded, "encoding of {value}");
        }
    }

    #[tokio::test]
    async fn fixed_str_pads_with_nul() {
        let mut writer = VecWriter::new();
        writer.write_fixed_str(b"ab", 5).await.unwrap();
        assert_eq!(writer.as_slice(), b"ab\0\0\0");
    }

    #[tokio::test]
    async fn stream_writer_flushes_past_threshold() {
        let buf: Vec<u8> = Vec::new();
        let cursor = std::io::Cursor::new(buf);
        let mut writer = StreamWriter::with_threshold(Box::new(cursor), 4);
        writer.write_bytes(&[1, 2]).await.unwrap();
        writer.write_bytes(&[3, 4, 5]).await.unwrap();
        writer.write_u8(6).await.unwrap();
        writer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn u128_pair_puts_high_half_first() {
        let mut writer = VecWriter::new();
        writer.write_u128_pair(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10).await.unwrap();
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[8..], &0x090a_0b0c_0d0e_0f10u64.to_le_bytes());
    }
}
