//! String columns: `String` (varint length + bytes per value) and
//! `FixedString(n)` (exactly `n` bytes, NUL-padded on write).
//!
//! With the `strings_as_bytes` client setting the codecs skip UTF-8
//! decoding and yield [`Value::Bytes`].

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `String`.
pub struct StringCodec {
    as_bytes: bool,
}

impl StringCodec {
    /// Construct; `as_bytes` skips UTF-8 decoding on read.
    pub fn new(as_bytes: bool) -> Self {
        StringCodec { as_bytes }
    }
}

fn decode(bytes: Vec<u8>, as_bytes: bool) -> Result<Value> {
    if as_bytes {
        Ok(Value::Bytes(bytes))
    } else {
        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 in string column: {e}")))
    }
}

fn value_bytes(value: &Value) -> Option<&[u8]> {
    match value {
        Value::String(s) => Some(s.as_bytes()),
        Value::Bytes(b) => Some(b),
        _ => None,
    }
}

#[async_trait]
impl ColumnCodec for StringCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            let bytes = input.read_str().await?;
            values.push(decode(bytes, self.as_bytes)?);
        }
        Ok(values)
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        for value in values {
            let bytes = value_bytes(value).ok_or_else(|| wrong_kind("String", value))?;
            output.write_str(bytes).await?;
        }
        Ok(())
    }

    fn default_value(&self) -> Value {
        if self.as_bytes {
            Value::Bytes(Vec::new())
        } else {
            Value::String(String::new())
        }
    }
}

/// Codec for `FixedString(n)`.
pub struct FixedStringCodec {
    length: usize,
    as_bytes: bool,
}

impl FixedStringCodec {
    /// Construct for width `length`.
    pub fn new(length: usize, as_bytes: bool) -> Self {
        FixedStringCodec { length, as_bytes }
    }
}

#[async_trait]
impl ColumnCodec for FixedStringCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            // Padding NULs are part of the value and come back verbatim.
            let bytes = input.read_fixed_str(self.length).await?;
            values.push(decode(bytes, self.as_bytes)?);
        }
        Ok(values)
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        for value in values {
            let bytes = value_bytes(value).ok_or_else(|| wrong_kind("FixedString", value))?;
            if bytes.len() > self.length {
                return Err(Error::StructPack(format!(
                    "value of {} bytes too long for FixedString({})",
                    bytes.len(),
                    self.length
                )));
            }
            output.write_fixed_str(bytes, self.length).await?;
        }
        Ok(())
    }

    fn default_value(&self) -> Value {
        if self.as_bytes {
            Value::Bytes(Vec::new())
        } else {
            Value::String(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::column::testutil::{assert_roundtrip, roundtrip, roundtrip_opts};
    use crate::column::{codec_for_spec, CodecOptions};
    use crate::error::Error;
    use crate::io::write::VecWriter;
    use crate::value::Value;

    #[tokio::test]
    async fn strings_roundtrip() {
        assert_roundtrip(
            "String",
            &[
                Value::String(String::new()),
                Value::String("hello".into()),
                Value::String("мир 🦀".into()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn strings_as_bytes_yields_raw_bytes() {
        let opts = CodecOptions { strings_as_bytes: true, ..Default::default() };
        let read = roundtrip_opts(
            "String",
            &[Value::Bytes(vec![0xff, 0x00, 0x41])],
            &opts,
        )
        .await;
        assert_eq!(read, vec![Value::Bytes(vec![0xff, 0x00, 0x41])]);
    }

    #[tokio::test]
    async fn fixed_string_pads_on_write() {
        let read = roundtrip("FixedString(4)", &[Value::String("ab".into())]).await;
        assert_eq!(read, vec![Value::String("ab\0\0".into())]);
    }

    #[tokio::test]
    async fn fixed_string_exact_width_untouched() {
        assert_roundtrip("FixedString(4)", &[Value::String("abcd".into())]).await;
    }

    #[tokio::test]
    async fn fixed_string_too_long_fails() {
        let codec = codec_for_spec("FixedString(2)", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        let err = codec.write_data(&mut out, &[Value::String("abc".into())]).await.unwrap_err();
        assert!(matches!(err, Error::StructPack(_)), "got {err}");
    }
}
