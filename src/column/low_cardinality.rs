//! `LowCardinality(T)` dictionary-encoded columns.
//!
//! State prefix: a UInt64 serialization version, always 1. Per block of
//! data: a UInt64 flags word whose low nibble is the key width code
//! (0 = UInt8, 1 = UInt16, 2 = UInt32, 3 = UInt64) plus the
//! `has_additional_keys` and `need_update_dictionary` bits; then the
//! dictionary size, the dictionary as the inner non-nullable column, the
//! key count, and the key array.
//!
//! Nullability folds into the dictionary: slot 0 is reserved for NULL and
//! null rows point at index 0.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::column::{create_codec, CodecOptions, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::types::TypeNode;
use crate::value::Value;

/// Serialization version written in the state prefix.
const SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS: u64 = 1;

/// Additional keys are stored in-block, before the key array.
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
/// The previous granule used a different dictionary.
const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;
/// A shared global dictionary is required to decode; unsupported here.
const NEED_GLOBAL_DICTIONARY: u64 = 1 << 8;

const KEY_WIDTH_MASK: u64 = 0xf;

/// Codec for `LowCardinality(T)`.
pub struct LowCardinalityCodec {
    /// Codec of the dictionary column: the inner type with any `Nullable`
    /// wrapper stripped, since the null slot lives in the dictionary.
    dictionary: Box<dyn ColumnCodec>,
    nullable: bool,
}

impl LowCardinalityCodec {
    /// Build from the inner type node of the `LowCardinality(...)` spec.
    pub fn new(inner: &TypeNode, opts: &CodecOptions) -> Result<Self> {
        let nullable = inner.is_nullable();
        let dictionary = create_codec(inner.unwrap_nullable(), opts)?;
        Ok(LowCardinalityCodec { dictionary, nullable })
    }
}

/// Dictionary lookup key: equality and hashing over a value's wire
/// identity. Floats hash by bit pattern, which is exactly the identity the
/// dictionary needs.
struct DictKey(Value);

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for DictKey {}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    std::mem::discriminant(value).hash(state);
    match value {
        Value::Null => {}
        Value::Bool(v) => v.hash(state),
        Value::Int8(v) => v.hash(state),
        Value::Int16(v) => v.hash(state),
        Value::Int32(v) => v.hash(state),
        Value::Int64(v) => v.hash(state),
        Value::Int128(v) => v.hash(state),
        Value::Int256(v) => v.0.hash(state),
        Value::UInt8(v) => v.hash(state),
        Value::UInt16(v) => v.hash(state),
        Value::UInt32(v) => v.hash(state),
        Value::UInt64(v) => v.hash(state),
        Value::UInt128(v) => v.hash(state),
        Value::UInt256(v) => v.0.hash(state),
        Value::Float32(v) => v.to_bits().hash(state),
        Value::Float64(v) => v.to_bits().hash(state),
        Value::String(v) => v.hash(state),
        Value::Bytes(v) => v.hash(state),
        Value::Uuid(v) => v.hash(state),
        Value::Date(v) => v.hash(state),
        Value::Date32(v) => v.hash(state),
        Value::DateTime(v) => v.hash(state),
        Value::DateTime64 { ticks, precision } => {
            ticks.hash(state);
            precision.hash(state);
        }
        Value::Decimal32 { value, scale } => {
            value.hash(state);
            scale.hash(state);
        }
        Value::Decimal64 { value, scale } => {
            value.hash(state);
            scale.hash(state);
        }
        Value::Decimal128 { value, scale } => {
            value.hash(state);
            scale.hash(state);
        }
        Value::Decimal256 { value, scale } => {
            value.0.hash(state);
            scale.hash(state);
        }
        Value::Ipv4(v) => v.hash(state),
        Value::Ipv6(v) => v.hash(state),
        Value::Array(items) | Value::Tuple(items) => {
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        }
        Value::Map(pairs) => {
            pairs.len().hash(state);
            for (k, v) in pairs {
                hash_value(k, state);
                hash_value(v, state);
            }
        }
    }
}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

/// Key-integer width code from the dictionary size: `floor(log2(len)) / 8`.
/// Dictionaries of 2^32 entries and beyond use UInt64 keys; anything larger
/// than UInt64 can index is impossible to construct in memory, but the
/// guard stays explicit.
fn key_width_code(dictionary_len: usize) -> Result<u64> {
    if dictionary_len as u128 > u128::from(u64::MAX) {
        return Err(Error::ColumnTypeMismatch(
            "low-cardinality dictionary cannot be indexed by UInt64".into(),
        ));
    }
    let floor_log2 = 63 - (dictionary_len as u64).leading_zeros() as u64;
    Ok((floor_log2 / 8).min(3))
}

async fn write_keys(
    output: &mut (dyn ClickHouseWrite + '_),
    keys: &[u64],
    width_code: u64,
) -> Result<()> {
    match width_code {
        0 => {
            let bytes: Vec<u8> = keys.iter().map(|&k| k as u8).collect();
            output.write_bytes(&bytes).await
        }
        1 => {
            let mut bytes = Vec::with_capacity(keys.len() * 2);
            for &k in keys {
                bytes.extend_from_slice(&(k as u16).to_le_bytes());
            }
            output.write_bytes(&bytes).await
        }
        2 => {
            let mut bytes = Vec::with_capacity(keys.len() * 4);
            for &k in keys {
                bytes.extend_from_slice(&(k as u32).to_le_bytes());
            }
            output.write_bytes(&bytes).await
        }
        _ => {
            let mut bytes = Vec::with_capacity(keys.len() * 8);
            for &k in keys {
                bytes.extend_from_slice(&k.to_le_bytes());
            }
            output.write_bytes(&bytes).await
        }
    }
}

async fn read_keys(
    input: &mut (dyn ClickHouseRead + '_),
    n: usize,
    width_code: u64,
) -> Result<Vec<u64>> {
    let mut keys = Vec::with_capacity(n);
    match width_code {
        0 => {
            let bytes = input.read_bytes(n).await?;
            keys.extend(bytes.into_iter().map(u64::from));
        }
        1 => {
            let bytes = input.read_bytes(n * 2).await?;
            keys.extend(bytes.chunks_exact(2).map(|c| {
                u64::from(u16::from_le_bytes(c.try_into().expect("2 bytes")))
            }));
        }
        2 => {
            let bytes = input.read_bytes(n * 4).await?;
            keys.extend(bytes.chunks_exact(4).map(|c| {
                u64::from(u32::from_le_bytes(c.try_into().expect("4 bytes")))
            }));
        }
        3 => {
            let bytes = input.read_bytes(n * 8).await?;
            keys.extend(
                bytes
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes(c.try_into().expect("8 bytes"))),
            );
        }
        other => {
            return Err(Error::Protocol(format!(
                "unknown low-cardinality key width code: {other}"
            )));
        }
    }
    Ok(keys)
}

#[async_trait]
impl ColumnCodec for LowCardinalityCodec {
    async fn read_state_prefix(&self, input: &mut (dyn ClickHouseRead + '_)) -> Result<()> {
        let version = input.read_u64().await?;
        if version != SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS {
            return Err(Error::Protocol(format!(
                "unsupported LowCardinality serialization version: {version}"
            )));
        }
        Ok(())
    }

    async fn write_state_prefix(&self, output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        output.write_u64(SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS).await
    }

    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let flags = input.read_u64().await?;
        if flags & NEED_GLOBAL_DICTIONARY != 0 {
            return Err(Error::Protocol(
                "global low-cardinality dictionaries are not supported".into(),
            ));
        }
        let width_code = flags & KEY_WIDTH_MASK;

        let dictionary_len = input.read_u64().await? as usize;
        let mut dictionary = self.dictionary.read_data(input, dictionary_len).await?;
        if self.nullable {
            if let Some(slot) = dictionary.first_mut() {
                *slot = Value::Null;
            }
        }

        let _keys_len = input.read_u64().await?;
        let keys = read_keys(input, n, width_code).await?;

        keys.into_iter()
            .map(|key| {
                dictionary
                    .get(key as usize)
                    .cloned()
                    .ok_or_else(|| {
                        Error::Protocol(format!(
                            "low-cardinality key {key} outside dictionary of {dictionary_len}"
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
        // Nothing is written for an empty column; this happens while
        // writing empty arrays of LowCardinality elements.
        if values.is_empty() {
            return Ok(());
        }

        let mut dictionary: Vec<Value> = Vec::new();
        let mut slot_by_value: HashMap<DictKey, u64> = HashMap::new();
        let mut keys = Vec::with_capacity(values.len());

        if self.nullable {
            // Slot 0 represents NULL; the dictionary stores a default cell.
            dictionary.push(self.dictionary.default_value());
        }
        for value in values {
            if value.is_null() {
                if !self.nullable {
                    return Err(Error::ColumnTypeMismatch(
                        "NULL in a non-nullable low-cardinality column".into(),
                    ));
                }
                keys.push(0u64);
                continue;
            }
            let next_slot = dictionary.len() as u64;
            match slot_by_value.entry(DictKey(value.clone())) {
                std::collections::hash_map::Entry::Occupied(entry) => keys.push(*entry.get()),
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(next_slot);
                    dictionary.push(value.clone());
                    keys.push(next_slot);
                }
            }
        }

        let width_code = key_width_code(dictionary.len())?;
        output.write_u64(HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY | width_code).await?;
        output.write_u64(dictionary.len() as u64).await?;
        self.dictionary.write_data(output, &dictionary).await?;
        output.write_u64(keys.len() as u64).await?;
        write_keys(output, &keys, width_code).await
    }

    fn default_value(&self) -> Value {
        if self.nullable {
            Value::Null
        } else {
            self.dictionary.default_value()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::testutil::assert_roundtrip;
    use crate::column::codec_for_spec;
    use crate::io::read::SliceReader;
    use crate::io::write::VecWriter;

    #[tokio::test]
    async fn strings_roundtrip_with_dedup() {
        assert_roundtrip(
            "LowCardinality(String)",
            &[
                Value::String("a".into()),
                Value::String("b".into()),
                Value::String("a".into()),
                Value::String("a".into()),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn nullable_dictionary_reserves_slot_zero() {
        let spec = "LowCardinality(Nullable(String))";
        let values = [
            Value::String("a".into()),
            Value::Null,
            Value::String("a".into()),
            Value::String("b".into()),
        ];
        let codec = codec_for_spec(spec, &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        codec.write_state_prefix(&mut out).await.unwrap();
        codec.write_data(&mut out, &values).await.unwrap();
        let bytes = out.into_inner();

        // version, flags, then the dictionary size: NULL slot + "a" + "b".
        let dict_size = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        assert_eq!(dict_size, 3);

        let mut input = SliceReader::new(bytes);
        codec.read_state_prefix(&mut input).await.unwrap();
        let read = codec.read_data(&mut input, values.len()).await.unwrap();
        assert_eq!(read, values);
        assert_eq!(input.remaining(), 0);
    }

    #[tokio::test]
    async fn single_value_dictionary_uses_u8_keys() {
        let codec = codec_for_spec("LowCardinality(String)", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        codec.write_data(&mut out, &[Value::String("only".into())]).await.unwrap();
        let bytes = out.as_slice();
        let flags = u64::from_le_bytes(bytes[..8].try_into().unwrap());
        assert_eq!(flags & KEY_WIDTH_MASK, 0, "one entry rounds to UInt8 keys");
        assert_ne!(flags & HAS_ADDITIONAL_KEYS, 0);
        assert_ne!(flags & NEED_UPDATE_DICTIONARY, 0);
    }

    #[tokio::test]
    async fn key_width_grows_with_dictionary() {
        // 300 distinct values push floor(log2)/8 to the UInt16 code.
        let values: Vec<Value> = (0..300u32).map(|i| Value::String(format!("v{i}"))).collect();
        let codec = codec_for_spec("LowCardinality(String)", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        codec.write_data(&mut out, &values).await.unwrap();
        let flags = u64::from_le_bytes(out.as_slice()[..8].try_into().unwrap());
        assert_eq!(flags & KEY_WIDTH_MASK, 1);

        let mut input = SliceReader::new(out.into_inner());
        let read = codec.read_data(&mut input, values.len()).await.unwrap();
        assert_eq!(read, values);
    }

    #[tokio::test]
    async fn low_cardinality_integers_roundtrip() {
        assert_roundtrip(
            "LowCardinality(UInt16)",
            &[Value::UInt16(7), Value::UInt16(7), Value::UInt16(9)],
        )
        .await;
    }

    #[test]
    fn width_codes_match_the_formula() {
        assert_eq!(key_width_code(1).unwrap(), 0);
        assert_eq!(key_width_code(255).unwrap(), 0);
        assert_eq!(key_width_code(256).unwrap(), 1);
        assert_eq!(key_width_code(65_536).unwrap(), 2);
        assert_eq!(key_width_code(1 << 24).unwrap(), 3);
    }
}
