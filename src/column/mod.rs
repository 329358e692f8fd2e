//! Column codecs for every supported ClickHouse type.
//!
//! A codec is selected from a parsed type specification by [`create_codec`]
//! and exposes four operations: an optional serialization-state prefix pair
//! and the bulk data read/write pair. Codecs for composite types
//! (`Nullable`, `Array`, `Tuple`, `Map`, `LowCardinality`, `Nested`, JSON)
//! wrap the codecs of their inner types.
//!
//! Nesting rules are the server's: `Nullable` only wraps scalars,
//! `LowCardinality` wraps scalars or `Nullable` scalars, arrays nest freely.

pub mod array;
pub mod date;
pub mod decimal;
pub mod enums;
pub mod float;
pub mod int;
pub mod ip;
pub mod json;
pub mod low_cardinality;
pub mod map;
pub mod nullable;
pub mod string;
pub mod tuple;
pub mod uuid;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::types::TypeNode;
use crate::value::Value;

/// Per-call codec behaviour flags, the column-relevant slice of the
/// connection's client settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecOptions {
    /// Return string cells as raw bytes instead of UTF-8 strings.
    pub strings_as_bytes: bool,
    /// Validate values against column preconditions before packing
    /// (decimal precision, unsigned non-negativity, signed range masks).
    pub types_check: bool,
}

/// A column (de)serializer for one concrete type specification.
#[async_trait]
pub trait ColumnCodec: Send + Sync {
    /// Read per-column serialization metadata preceding the first block of
    /// data. Most types have none.
    async fn read_state_prefix(&self, _input: &mut (dyn ClickHouseRead + '_)) -> Result<()> {
        Ok(())
    }

    /// Write per-column serialization metadata.
    async fn write_state_prefix(&self, _output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        Ok(())
    }

    /// Read a column of `n` values.
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>>;

    /// Write a column of values.
    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()>;

    /// The value written in place of NULL when this codec sits inside a
    /// `Nullable` wrapper or a `LowCardinality` dictionary.
    fn default_value(&self) -> Value;
}

/// Instantiate the codec for a parsed type specification.
pub fn create_codec(node: &TypeNode, opts: &CodecOptions) -> Result<Box<dyn ColumnCodec>> {
    Ok(match node {
        TypeNode::Bool => Box::new(int::BoolCodec),
        TypeNode::Int8 => Box::new(int::IntCodec::<i8>::new(opts.types_check)),
        TypeNode::Int16 => Box::new(int::IntCodec::<i16>::new(opts.types_check)),
        TypeNode::Int32 => Box::new(int::IntCodec::<i32>::new(opts.types_check)),
        TypeNode::Int64 | TypeNode::Interval(_) => {
            Box::new(int::IntCodec::<i64>::new(opts.types_check))
        }
        TypeNode::Int128 => Box::new(int::IntCodec::<i128>::new(opts.types_check)),
        TypeNode::Int256 => Box::new(int::Int256Codec),
        TypeNode::UInt8 => Box::new(int::UIntCodec::<u8>::new(opts.types_check)),
        TypeNode::UInt16 => Box::new(int::UIntCodec::<u16>::new(opts.types_check)),
        TypeNode::UInt32 => Box::new(int::UIntCodec::<u32>::new(opts.types_check)),
        TypeNode::UInt64 => Box::new(int::UIntCodec::<u64>::new(opts.types_check)),
        TypeNode::UInt128 => Box::new(int::UIntCodec::<u128>::new(opts.types_check)),
        TypeNode::UInt256 => Box::new(int::UInt256Codec),
        TypeNode::Float32 => Box::new(float::Float32Codec),
        TypeNode::Float64 => Box::new(float::Float64Codec),
        TypeNode::String => Box::new(string::StringCodec::new(opts.strings_as_bytes)),
        TypeNode::FixedString(n) => {
            Box::new(string::FixedStringCodec::new(*n, opts.strings_as_bytes))
        }
        TypeNode::Date => Box::new(date::DateCodec),
        TypeNode::Date32 => Box::new(date::Date32Codec),
        TypeNode::DateTime { .. } => Box::new(date::DateTimeCodec),
        TypeNode::DateTime64 { precision, .. } => {
            Box::new(date::DateTime64Codec::new(*precision))
        }
        TypeNode::Decimal { precision, scale } => {
            Box::new(decimal::DecimalCodec::new(*precision, *scale, opts.types_check))
        }
        TypeNode::Uuid => Box::new(uuid::UuidCodec),
        TypeNode::Ipv4 => Box::new(ip::Ipv4Codec),
        TypeNode::Ipv6 => Box::new(ip::Ipv6Codec),
        TypeNode::Enum8(items) => Box::new(enums::Enum8Codec::new(items.clone())),
        TypeNode::Enum16(items) => Box::new(enums::Enum16Codec::new(items.clone())),
        TypeNode::Nullable(inner) => {
            Box::new(nullable::NullableCodec::new(create_codec(inner, opts)?))
        }
        TypeNode::Array(inner) => Box::new(array::ArrayCodec::new(create_codec(inner, opts)?)),
        TypeNode::Tuple(items) => {
            let inners = items
                .iter()
                .map(|item| create_codec(item, opts))
                .collect::<Result<Vec<_>>>()?;
            Box::new(tuple::TupleCodec::new(inners))
        }
        TypeNode::Map(key, value) => Box::new(map::MapCodec::new(
            create_codec(key, opts)?,
            create_codec(value, opts)?,
        )),
        TypeNode::LowCardinality(inner) => {
            Box::new(low_cardinality::LowCardinalityCodec::new(inner, opts)?)
        }
        // With flatten_nested = 0, Nested(n1 T1, ..., nk Tk) is encoded as
        // Array(Tuple(T1, ..., Tk)).
        TypeNode::Nested(items) => {
            let inners = items
                .iter()
                .map(|(_, item)| create_codec(item, opts))
                .collect::<Result<Vec<_>>>()?;
            Box::new(array::ArrayCodec::new(Box::new(tuple::TupleCodec::new(inners))))
        }
        TypeNode::Json => Box::new(json::JsonCodec::new(*opts)),
    })
}

/// Convenience: parse a specification string and build its codec.
pub fn codec_for_spec(spec: &str, opts: &CodecOptions) -> Result<Box<dyn ColumnCodec>> {
    let node = crate::types::parse_type_name(spec)?;
    create_codec(&node, opts)
}

/// The supplied value's variant cannot belong to this column.
pub(crate) fn wrong_kind(expected: &str, value: &Value) -> Error {
    Error::ColumnTypeMismatch(format!("expected {expected}, got {} ({value})", value.kind()))
}

/// The supplied value is the right kind but does not fit the wire width.
pub(crate) fn out_of_range(value: &Value, target: &str) -> Error {
    Error::StructPack(format!("value {value} out of range for {target}"))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::io::read::SliceReader;
    use crate::io::write::VecWriter;

    /// Write `values` through the codec for `spec` and read them back,
    /// asserting byte-exhaustion and equality.
    pub async fn roundtrip(spec: &str, values: &[Value]) -> Vec<Value> {
        roundtrip_opts(spec, values, &CodecOptions::default()).await
    }

    pub async fn roundtrip_opts(
        spec: &str,
        values: &[Value],
        opts: &CodecOptions,
    ) -> Vec<Value> {
        let codec = codec_for_spec(spec, opts).unwrap();
        let mut out = VecWriter::new();
        codec.write_state_prefix(&mut out).await.unwrap();
        codec.write_data(&mut out, values).await.unwrap();

        let mut input = SliceReader::new(out.into_inner());
        codec.read_state_prefix(&mut input).await.unwrap();
        let read = codec.read_data(&mut input, values.len()).await.unwrap();
        assert_eq!(input.remaining(), 0, "codec for {spec} left bytes unread");
        assert_eq!(read.len(), values.len());
        read
    }

    pub async fn assert_roundtrip(spec: &str, values: &[Value]) {
        let read = roundtrip(spec, values).await;
        assert_eq!(read, values, "roundtrip through {spec}");
    }
}
