//! Compressed framing over the raw buffered streams.
//!
//! The writer stages a whole block in memory; flushing compresses it into
//! one checksummed frame and forwards the frame to the transport in
//! `compress_block_size` chunks. The reader is the mirror image: it refills
//! its buffer one decompressed frame at a time, so block payloads may span
//! frame boundaries transparently.

use async_trait::async_trait;
use bytes::Bytes;

use crate::compression::{compress_frame, decompress_body, CompressionMethod};
use crate::error::Result;
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;

/// Reader that surfaces the decompressed byte stream carried by a sequence
/// of compressed frames.
pub struct CompressedReader<'a, R: ClickHouseRead + ?Sized> {
    raw: &'a mut R,
    buffer: Bytes,
    pos: usize,
}

impl<'a, R: ClickHouseRead + ?Sized> CompressedReader<'a, R> {
    /// Start reading frames from `raw`.
    pub fn new(raw: &'a mut R) -> Self {
        CompressedReader { raw, buffer: Bytes::new(), pos: 0 }
    }

    async fn refill(&mut self) -> Result<()> {
        let checksum = self.raw.read_u128_pair().await?;
        let method_byte = self.raw.read_u8().await?;
        let size_with_header = self.raw.read_u32().await?;

        // Everything past the method byte and the size we just consumed.
        let remaining = (size_with_header as usize).saturating_sub(5);
        let rest = self.raw.read_bytes(remaining).await?;

        let mut body = Vec::with_capacity(size_with_header as usize);
        body.push(method_byte);
        body.extend_from_slice(&size_with_header.to_le_bytes());
        body.extend_from_slice(&rest);

        self.buffer = decompress_body(checksum, &body)?;
        self.pos = 0;
        Ok(())
    }
}

#[async_trait]
impl<R: ClickHouseRead + ?Sized> ClickHouseRead for CompressedReader<'_, R> {
    async fn read_byte(&mut self) -> Result<u8> {
        while self.pos == self.buffer.len() {
            self.refill().await?;
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    async fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            while self.pos == self.buffer.len() {
                self.refill().await?;
            }
            let take = (buf.len() - written).min(self.buffer.len() - self.pos);
            buf[written..written + take].copy_from_slice(&self.buffer[self.pos..self.pos + take]);
            self.pos += take;
            written += take;
        }
        Ok(())
    }
}

/// Writer that stages block bytes and emits one compressed frame per flush.
pub struct CompressedWriter<'a, W: ClickHouseWrite + ?Sized> {
    raw: &'a mut W,
    method: CompressionMethod,
    block_size: usize,
    buffer: Vec<u8>,
}

impl<'a, W: ClickHouseWrite + ?Sized> CompressedWriter<'a, W> {
    /// Stage writes for `raw`, framing them with `method` on flush. The
    /// emitted frame is forwarded in `block_size`-byte chunks.
    pub fn new(raw: &'a mut W, method: CompressionMethod, block_size: usize) -> Self {
        CompressedWriter { raw, method, block_size: block_size.max(1), buffer: Vec::new() }
    }
}

#[async_trait]
impl<W: ClickHouseWrite + ?Sized> ClickHouseWrite for CompressedWriter<'_, W> {
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let frame = compress_frame(self.method, &self.buffer)?;
        self.buffer.clear();
        for chunk in frame.chunks(self.block_size) {
            self.raw.write_bytes(chunk).await?;
        }
        self.raw.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read::SliceReader;
    use crate::io::write::VecWriter;

    #[tokio::test]
    async fn frames_roundtrip_through_the_stream_pair() {
        let mut sink = VecWriter::new();
        {
            let mut writer =
                CompressedWriter::new(&mut sink, CompressionMethod::Lz4, 7);
            writer.write_varint(3).await.unwrap();
            writer.write_string("abc").await.unwrap();
            writer.write_i32(-77).await.unwrap();
            writer.flush().await.unwrap();
            // A second frame on the same stream.
            writer.write_string("second frame").await.unwrap();
            writer.flush().await.unwrap();
        }

        let mut raw = SliceReader::new(sink.into_inner());
        let mut reader = CompressedReader::new(&mut raw);
        assert_eq!(reader.read_varint().await.unwrap(), 3);
        assert_eq!(reader.read_string().await.unwrap(), "abc");
        assert_eq!(reader.read_i32().await.unwrap(), -77);
        assert_eq!(reader.read_string().await.unwrap(), "second frame");
    }

    #[tokio::test]
    async fn payloads_span_frame_boundaries() {
        let big = vec![0xabu8; 3000];
        let mut sink = VecWriter::new();
        {
            let mut writer =
                CompressedWriter::new(&mut sink, CompressionMethod::Zstd, 1024);
            writer.write_bytes(&big[..1000]).await.unwrap();
            writer.flush().await.unwrap();
            writer.write_bytes(&big[1000..]).await.unwrap();
            writer.flush().await.unwrap();
        }

        let mut raw = SliceReader::new(sink.into_inner());
        let mut reader = CompressedReader::new(&mut raw);
        let read = reader.read_bytes(3000).await.unwrap();
        assert_eq!(read, big);
    }
}
