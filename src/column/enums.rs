//! Enum columns: `Enum8` / `Enum16`.
//!
//! The wire carries the underlying signed integer. Writes accept member
//! names (mapped through the declared name/value table) or raw integers;
//! reads always yield the member name.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

macro_rules! enum_codec {
    ($name:ident, $int:ty, $width:expr, $type_name:literal) => {
        /// Codec for the correspondingly sized enum type.
        pub struct $name {
            items: Vec<(String, $int)>,
            by_name: HashMap<String, $int>,
            by_value: HashMap<$int, String>,
        }

        impl $name {
            /// Construct from the declared member table.
            pub fn new(items: Vec<(String, $int)>) -> Self {
                let by_name = items.iter().map(|(n, v)| (n.clone(), *v)).collect();
                let by_value = items.iter().map(|(n, v)| (*v, n.clone())).collect();
                $name { items, by_name, by_value }
            }

            fn wire_value(&self, value: &Value) -> Result<$int> {
                match value {
                    Value::String(name) => {
                        self.by_name.get(name.as_str()).copied().ok_or_else(|| {
                            Error::ColumnTypeMismatch(format!(
                                "'{name}' is not a member of {}",
                                $type_name
                            ))
                        })
                    }
                    other => {
                        let wide = other.to_i128().ok_or_else(|| wrong_kind($type_name, other))?;
                        let narrow = <$int>::try_from(wide)
                            .map_err(|_| wrong_kind($type_name, other))?;
                        if !self.by_value.contains_key(&narrow) {
                            return Err(Error::ColumnTypeMismatch(format!(
                                "{narrow} is not a member of {}",
                                $type_name
                            )));
                        }
                        Ok(narrow)
                    }
                }
            }
        }

        #[async_trait]
        impl ColumnCodec for $name {
            async fn read_data(
                &self,
                input: &mut (dyn ClickHouseRead + '_),
                n: usize,
            ) -> Result<Vec<Value>> {
                let bytes = input.read_bytes(n * $width).await?;
                bytes
                    .chunks_exact($width)
                    .map(|chunk| {
                        let raw = <$int>::from_le_bytes(chunk.try_into().expect("enum width"));
                        self.by_value
                            .get(&raw)
                            .map(|name| Value::String(name.clone()))
                            .ok_or_else(|| {
                                Error::Protocol(format!(
                                    "server sent {raw}, which is not a member of {}",
                                    $type_name
                                ))
                            })
                    })
                    .collect()
            }

            async fn write_data(
                &self,
                output: &mut (dyn ClickHouseWrite + '_),
                values: &[Value],
            ) -> Result<()> {
                let mut out = Vec::with_capacity(values.len() * $width);
                for value in values {
                    out.extend_from_slice(&self.wire_value(value)?.to_le_bytes());
                }
                output.write_bytes(&out).await
            }

            fn default_value(&self) -> Value {
                // NULL slots inside Nullable(Enum) carry the first member.
                Value::String(self.items.first().map(|(n, _)| n.clone()).unwrap_or_default())
            }
        }
    };
}

enum_codec!(Enum8Codec, i8, 1, "Enum8");
enum_codec!(Enum16Codec, i16, 2, "Enum16");

#[cfg(test)]
mod tests {
    use crate::column::testutil::{assert_roundtrip, roundtrip};
    use crate::column::{codec_for_spec, CodecOptions};
    use crate::error::Error;
    use crate::io::write::VecWriter;
    use crate::value::Value;

    const SPEC: &str = "Enum8('red' = -1, 'green' = 1, 'blue' = 2)";

    #[tokio::test]
    async fn names_roundtrip() {
        assert_roundtrip(
            SPEC,
            &[
                Value::String("blue".into()),
                Value::String("red".into()),
                Value::String("green".into()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn integers_map_to_names_on_read() {
        let read = roundtrip(SPEC, &[Value::Int8(2)]).await;
        assert_eq!(read, vec![Value::String("blue".into())]);
    }

    #[tokio::test]
    async fn unknown_member_rejected() {
        let codec = codec_for_spec(SPEC, &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        let err =
            codec.write_data(&mut out, &[Value::String("mauve".into())]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnTypeMismatch(_)), "got {err}");
        let err = codec.write_data(&mut out, &[Value::Int8(9)]).await.unwrap_err();
        assert!(matches!(err, Error::ColumnTypeMismatch(_)), "got {err}");
    }

    #[tokio::test]
    async fn enum16_uses_two_bytes() {
        assert_roundtrip(
            "Enum16('lo' = -32768, 'hi' = 32767)",
            &[Value::String("lo".into()), Value::String("hi".into())],
        )
        .await;
    }
}
