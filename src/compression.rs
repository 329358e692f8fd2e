//! Block compression codecs and the checksummed frame layout.
//!
//! A compressed frame on the wire is:
//!
//! ```text
//! CityHash128 over everything below      16 bytes (high u64, then low u64)
//! method byte                             1 byte  (LZ4/LZ4HC 0x82, ZSTD 0x90)
//! compressed size including this header   4 bytes LE
//! uncompressed size                       4 bytes LE
//! payload                                 N bytes
//! ```
//!
//! LZ4 and LZ4HC share a method byte; they differ only in how hard the
//! client compresses.

use bytes::{BufMut, Bytes, BytesMut};
use cityhash_rs::cityhash_102_128;

use crate::error::{Error, Result};

/// Method byte + sizes.
const FRAME_HEADER_SIZE: usize = 9;
/// CityHash128 prefix.
const CHECKSUM_SIZE: usize = 16;
/// Upper bound accepted for either size field (1 GiB).
const MAX_BLOCK_SIZE: usize = 0x4000_0000;

/// Method byte shared by LZ4 and LZ4HC frames.
pub const METHOD_BYTE_LZ4: u8 = 0x82;
/// Method byte of ZSTD frames.
pub const METHOD_BYTE_ZSTD: u8 = 0x90;

/// ZSTD effort; matches the server's default codec level.
const ZSTD_LEVEL: i32 = 3;
/// LZ4HC effort.
const LZ4HC_LEVEL: i32 = 9;

/// Block compression algorithm chosen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// LZ4, fast with a decent ratio.
    Lz4,
    /// LZ4 high-compression mode. Same frames as LZ4 on the wire.
    Lz4Hc,
    /// ZSTD, better ratio, slower.
    Zstd,
}

impl CompressionMethod {
    /// The frame method byte this algorithm produces.
    pub fn method_byte(self) -> u8 {
        match self {
            CompressionMethod::Lz4 | CompressionMethod::Lz4Hc => METHOD_BYTE_LZ4,
            CompressionMethod::Zstd => METHOD_BYTE_ZSTD,
        }
    }

    /// Parse a DSN/options algorithm name.
    pub fn from_name(name: &str) -> Result<CompressionMethod> {
        match name {
            "lz4" => Ok(CompressionMethod::Lz4),
            "lz4hc" => Ok(CompressionMethod::Lz4Hc),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(Error::UnknownCompressionMethod(other.to_owned())),
        }
    }
}

/// Compress `data` into a complete frame, checksum included.
pub fn compress_frame(method: CompressionMethod, data: &[u8]) -> Result<Bytes> {
    let payload = match method {
        CompressionMethod::Lz4 => lz4_compress(data, None)?,
        CompressionMethod::Lz4Hc => {
            lz4_compress(data, Some(lz4::block::CompressionMode::HIGHCOMPRESSION(LZ4HC_LEVEL)))?
        }
        CompressionMethod::Zstd => zstd::bulk::compress(data, ZSTD_LEVEL)
            .map_err(|e| Error::StructPack(format!("zstd compression failed: {e}")))?,
    };

    let mut body = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    body.put_u8(method.method_byte());
    body.put_u32_le((FRAME_HEADER_SIZE + payload.len()) as u32);
    body.put_u32_le(data.len() as u32);
    body.put_slice(&payload);

    let checksum = cityhash_102_128(&body);
    let mut frame = BytesMut::with_capacity(CHECKSUM_SIZE + body.len());
    frame.put_u64_le((checksum >> 64) as u64);
    frame.put_u64_le(checksum as u64);
    frame.put_slice(&body);
    Ok(frame.freeze())
}

fn lz4_compress(data: &[u8], mode: Option<lz4::block::CompressionMode>) -> Result<Vec<u8>> {
    let bound = lz4::block::compress_bound(data.len())?;
    let mut out = vec![0u8; bound.max(1)];
    let written = lz4::block::compress_to_buffer(data, mode, false, &mut out)?;
    out.truncate(written);
    Ok(out)
}

/// Verify and decompress the body of a frame.
///
/// `checksum` is the embedded hash (already decoded from its high/low pair);
/// `body` is everything that was hashed: method byte, both sizes and the
/// payload. The uncompressed size embedded in the header must match the
/// decompressor's output exactly.
pub fn decompress_body(checksum: u128, body: &[u8]) -> Result<Bytes> {
    let actual = cityhash_102_128(body);
    if actual != checksum {
        return Err(Error::ChecksumMismatch { expected: checksum, actual });
    }
    if body.len() < FRAME_HEADER_SIZE {
        return Err(Error::Protocol("compressed frame shorter than its header".into()));
    }

    let method_byte = body[0];
    let size_with_header = u32::from_le_bytes(body[1..5].try_into().expect("4 bytes")) as usize;
    let uncompressed_size = u32::from_le_bytes(body[5..9].try_into().expect("4 bytes")) as usize;
    if size_with_header != body.len() {
        return Err(Error::Protocol(format!(
            "compressed frame size mismatch: header says {size_with_header}, got {}",
            body.len()
        )));
    }
    if uncompressed_size > MAX_BLOCK_SIZE {
        return Err(Error::Protocol(format!(
            "uncompressed size too large: {uncompressed_size}"
        )));
    }
    let payload = &body[FRAME_HEADER_SIZE..];

    let data = match method_byte {
        METHOD_BYTE_LZ4 => lz4::block::decompress(payload, Some(uncompressed_size as i32))?,
        METHOD_BYTE_ZSTD => zstd::bulk::decompress(payload, uncompressed_size)
            .map_err(|e| Error::Protocol(format!("zstd decompression failed: {e}")))?,
        other => {
            return Err(Error::UnknownCompressionMethod(format!("{other:#04x}")));
        }
    };
    if data.len() != uncompressed_size {
        return Err(Error::Protocol(format!(
            "decompressed size mismatch: expected {uncompressed_size}, got {}",
            data.len()
        )));
    }
    Ok(Bytes::from(data))
}

/// Split a complete frame back into its embedded checksum and hashed body.
/// Used where a whole frame is already in memory (tests, mock servers).
pub fn split_frame(frame: &[u8]) -> Result<(u128, &[u8])> {
    if frame.len() < CHECKSUM_SIZE + FRAME_HEADER_SIZE {
        return Err(Error::Protocol("compressed frame too small".into()));
    }
    let hi = u64::from_le_bytes(frame[..8].try_into().expect("8 bytes"));
    let lo = u64::from_le_bytes(frame[8..16].try_into().expect("8 bytes"));
    let checksum = (u128::from(hi) << 64) | u128::from(lo);
    Ok((checksum, &frame[CHECKSUM_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(method: CompressionMethod, data: &[u8]) -> Bytes {
        let frame = compress_frame(method, data).unwrap();
        let (checksum, body) = split_frame(&frame).unwrap();
        decompress_body(checksum, body).unwrap()
    }

    #[test]
    fn lz4_roundtrip() {
        let data = b"ClickHouse is a columnar database ".repeat(64);
        assert_eq!(roundtrip(CompressionMethod::Lz4, &data), data);
    }

    #[test]
    fn lz4hc_shares_the_lz4_method_byte() {
        let data = b"abcabcabc".repeat(100);
        let frame = compress_frame(CompressionMethod::Lz4Hc, &data).unwrap();
        assert_eq!(frame[16], METHOD_BYTE_LZ4);
        assert_eq!(roundtrip(CompressionMethod::Lz4Hc, &data), data);
    }

    #[test]
    fn zstd_roundtrip() {
        let data = vec![7u8; 100_000];
        let frame = compress_frame(CompressionMethod::Zstd, &data).unwrap();
        assert_eq!(frame[16], METHOD_BYTE_ZSTD);
        assert!(frame.len() < data.len() / 10);
        assert_eq!(roundtrip(CompressionMethod::Zstd, &data), data);
    }

    #[test]
    fn empty_payload_roundtrips() {
        assert!(roundtrip(CompressionMethod::Lz4, b"").is_empty());
    }

    #[test]
    fn corruption_anywhere_fails_the_checksum() {
        let data = b"integrity matters".repeat(10);
        let frame = compress_frame(CompressionMethod::Lz4, &data).unwrap();
        for index in [16usize, 17, 20, frame.len() - 1] {
            let mut corrupted = frame.to_vec();
            corrupted[index] ^= 0x01;
            let (checksum, body) = split_frame(&corrupted).unwrap();
            assert!(
                matches!(decompress_body(checksum, body), Err(Error::ChecksumMismatch { .. })),
                "byte {index} corruption must be caught"
            );
        }
    }

    #[test]
    fn unknown_method_byte_is_rejected() {
        let data = b"x";
        let frame = compress_frame(CompressionMethod::Lz4, data).unwrap();
        let mut body = frame[16..].to_vec();
        body[0] = 0x42;
        let checksum = cityhash_102_128(&body);
        assert!(matches!(
            decompress_body(checksum, &body),
            Err(Error::UnknownCompressionMethod(_))
        ));
    }

    #[test]
    fn method_names_parse() {
        assert_eq!(CompressionMethod::from_name("lz4").unwrap(), CompressionMethod::Lz4);
        assert_eq!(CompressionMethod::from_name("lz4hc").unwrap(), CompressionMethod::Lz4Hc);
        assert_eq!(CompressionMethod::from_name("zstd").unwrap(), CompressionMethod::Zstd);
        assert!(CompressionMethod::from_name("snappy").is_err());
    }
}
