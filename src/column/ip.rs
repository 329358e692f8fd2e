//! IP address columns: `IPv4` (UInt32 with network semantics) and `IPv6`
//! (16 raw bytes). Writes accept address values, strings or (for IPv4)
//! plain integers.

use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `IPv4`.
pub struct Ipv4Codec;

#[async_trait]
impl ColumnCodec for Ipv4Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 4).await?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| {
                let raw = u32::from_le_bytes(chunk.try_into().expect("4 bytes"));
                Value::Ipv4(Ipv4Addr::from(raw))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for value in values {
            let raw = match value {
                Value::Ipv4(addr) => u32::from(*addr),
                Value::String(s) => u32::from(
                    s.parse::<Ipv4Addr>()
                        .map_err(|_| Error::CannotParseDomain(s.clone()))?,
                ),
                other => match other.to_u128() {
                    Some(v) => u32::try_from(v)
                        .map_err(|_| Error::CannotParseDomain(other.to_string()))?,
                    None => return Err(wrong_kind("IPv4", other)),
                },
            };
            out.extend_from_slice(&raw.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Ipv4(Ipv4Addr::UNSPECIFIED)
    }
}

/// Codec for `IPv6`.
pub struct Ipv6Codec;

#[async_trait]
impl ColumnCodec for Ipv6Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 16).await?;
        Ok(bytes
            .chunks_exact(16)
            .map(|chunk| {
                let raw: [u8; 16] = chunk.try_into().expect("16 bytes");
                Value::Ipv6(Ipv6Addr::from(raw))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 16);
        for value in values {
            let octets = match value {
                Value::Ipv6(addr) => addr.octets(),
                Value::String(s) => s
                    .parse::<Ipv6Addr>()
                    .map_err(|_| Error::CannotParseDomain(s.clone()))?
                    .octets(),
                Value::Bytes(b) => <[u8; 16]>::try_from(b.as_slice())
                    .map_err(|_| Error::CannotParseDomain(format!("{} bytes", b.len())))?,
                other => return Err(wrong_kind("IPv6", other)),
            };
            out.extend_from_slice(&octets);
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Ipv6(Ipv6Addr::UNSPECIFIED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::testutil::{assert_roundtrip, roundtrip};
    use crate::column::{codec_for_spec, CodecOptions};
    use crate::io::write::VecWriter;

    #[tokio::test]
    async fn ipv4_roundtrips() {
        assert_roundtrip(
            "IPv4",
            &[
                Value::Ipv4(Ipv4Addr::new(127, 0, 0, 1)),
                Value::Ipv4(Ipv4Addr::new(255, 255, 255, 255)),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn ipv4_from_string_and_int() {
        let read =
            roundtrip("IPv4", &[Value::String("10.0.0.1".into()), Value::UInt32(0x7f000001)])
                .await;
        assert_eq!(
            read,
            vec![
                Value::Ipv4(Ipv4Addr::new(10, 0, 0, 1)),
                Value::Ipv4(Ipv4Addr::new(127, 0, 0, 1)),
            ]
        );
    }

    #[tokio::test]
    async fn ipv6_roundtrips() {
        assert_roundtrip(
            "IPv6",
            &[
                Value::Ipv6(Ipv6Addr::LOCALHOST),
                Value::Ipv6("2001:db8::8a2e:370:7334".parse().unwrap()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn bad_address_string_fails_parse() {
        let codec = codec_for_spec("IPv4", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        let err = codec
            .write_data(&mut out, &[Value::String("not-an-ip".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::CannotParseDomain(_)), "got {err}");
    }
}
