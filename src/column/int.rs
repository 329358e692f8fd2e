//! Integer columns: `Int8`..`Int256`, `UInt8`..`UInt256`, `Bool` and the
//! `Interval*` family (which is `Int64` on the wire).

use async_trait::async_trait;

use crate::column::{out_of_range, wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::{Int256, UInt256, Value};

/// A fixed-width signed integer with a wire encoding.
pub trait SignedWire: Copy + Send + Sync + 'static {
    /// Width in bytes.
    const WIDTH: usize;
    /// Type name for error messages.
    const NAME: &'static str;
    /// Decode from exactly `WIDTH` little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;
    /// Append the little-endian encoding.
    fn extend_le(self, out: &mut Vec<u8>);
    /// Wrap in the matching [`Value`] variant.
    fn into_value(self) -> Value;
    /// Narrow from `i128`, failing when out of range.
    fn try_narrow(value: i128) -> Option<Self>;
}

/// A fixed-width unsigned integer with a wire encoding.
pub trait UnsignedWire: Copy + Send + Sync + 'static {
    /// Width in bytes.
    const WIDTH: usize;
    /// Type name for error messages.
    const NAME: &'static str;
    /// Decode from exactly `WIDTH` little-endian bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;
    /// Append the little-endian encoding.
    fn extend_le(self, out: &mut Vec<u8>);
    /// Wrap in the matching [`Value`] variant.
    fn into_value(self) -> Value;
    /// Narrow from `u128`, failing when out of range.
    fn try_narrow(value: u128) -> Option<Self>;
}

macro_rules! impl_signed_wire {
    ($($ty:ty => $name:literal, $variant:ident;)*) => {
        $(
            impl SignedWire for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                const NAME: &'static str = $name;

                fn from_le_slice(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes.try_into().expect("width checked"))
                }

                fn extend_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn try_narrow(value: i128) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }
            }
        )*
    };
}

macro_rules! impl_unsigned_wire {
    ($($ty:ty => $name:literal, $variant:ident;)*) => {
        $(
            impl UnsignedWire for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();
                const NAME: &'static str = $name;

                fn from_le_slice(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes.try_into().expect("width checked"))
                }

                fn extend_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn into_value(self) -> Value {
                    Value::$variant(self)
                }

                fn try_narrow(value: u128) -> Option<Self> {
                    <$ty>::try_from(value).ok()
                }
            }
        )*
    };
}

impl_signed_wire! {
    i8 => "Int8", Int8;
    i16 => "Int16", Int16;
    i32 => "Int32", Int32;
    i64 => "Int64", Int64;
    i128 => "Int128", Int128;
}

impl_unsigned_wire! {
    u8 => "UInt8", UInt8;
    u16 => "UInt16", UInt16;
    u32 => "UInt32", UInt32;
    u64 => "UInt64", UInt64;
    u128 => "UInt128", UInt128;
}

/// Codec for signed integers up to 128 bits.
pub struct IntCodec<T> {
    types_check: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T> IntCodec<T> {
    /// Construct; `types_check` enables the range-masking write mode.
    pub fn new(types_check: bool) -> Self {
        IntCodec { types_check, _marker: std::marker::PhantomData }
    }
}

/// Chop a magnitude to the bits that fit `width` bytes, preserving sign.
fn mask_signed(value: i128, width: usize) -> i128 {
    if width >= 16 {
        return value;
    }
    let mask = (1i128 << (8 * width)) - 1;
    let sign = if value < 0 { -1 } else { 1 };
    sign * (value.unsigned_abs() as i128 & mask)
}

#[async_trait]
impl<T: SignedWire> ColumnCodec for IntCodec<T> {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * T::WIDTH).await?;
        Ok(bytes.chunks_exact(T::WIDTH).map(|chunk| T::from_le_slice(chunk).into_value()).collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for value in values {
            let wide = value.to_i128().ok_or_else(|| wrong_kind(T::NAME, value))?;
            let wide = if self.types_check { mask_signed(wide, T::WIDTH) } else { wide };
            let narrow = T::try_narrow(wide).ok_or_else(|| out_of_range(value, T::NAME))?;
            narrow.extend_le(&mut out);
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        T::try_narrow(0).expect("zero fits every width").into_value()
    }
}

/// Codec for unsigned integers up to 128 bits.
pub struct UIntCodec<T> {
    types_check: bool,
    _marker: std::marker::PhantomData<T>,
}

impl<T> UIntCodec<T> {
    /// Construct; `types_check` enables non-negativity checks and masking.
    pub fn new(types_check: bool) -> Self {
        UIntCodec { types_check, _marker: std::marker::PhantomData }
    }
}

#[async_trait]
impl<T: UnsignedWire> ColumnCodec for UIntCodec<T> {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * T::WIDTH).await?;
        Ok(bytes.chunks_exact(T::WIDTH).map(|chunk| T::from_le_slice(chunk).into_value()).collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * T::WIDTH);
        for value in values {
            if self.types_check && value.to_i128().is_some_and(|v| v < 0) {
                return Err(Error::ColumnTypeMismatch(format!(
                    "negative value {value} for {}",
                    T::NAME
                )));
            }
            let wide = value.to_u128().ok_or_else(|| wrong_kind(T::NAME, value))?;
            let wide = if self.types_check && T::WIDTH < 16 {
                wide & ((1u128 << (8 * T::WIDTH)) - 1)
            } else {
                wide
            };
            let narrow = T::try_narrow(wide).ok_or_else(|| out_of_range(value, T::NAME))?;
            narrow.extend_le(&mut out);
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        T::try_narrow(0).expect("zero fits every width").into_value()
    }
}

/// Codec for `Int256`.
pub struct Int256Codec;

#[async_trait]
impl ColumnCodec for Int256Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 32).await?;
        Ok(bytes
            .chunks_exact(32)
            .map(|chunk| {
                Value::Int256(Int256::from_le_bytes(chunk.try_into().expect("32 bytes")))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 32);
        for value in values {
            let wide = match value {
                Value::Int256(v) => *v,
                other => Int256::from(other.to_i128().ok_or_else(|| wrong_kind("Int256", other))?),
            };
            out.extend_from_slice(&wide.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Int256(Int256::ZERO)
    }
}

/// Codec for `UInt256`.
pub struct UInt256Codec;

#[async_trait]
impl ColumnCodec for UInt256Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 32).await?;
        Ok(bytes
            .chunks_exact(32)
            .map(|chunk| {
                Value::UInt256(UInt256::from_le_bytes(chunk.try_into().expect("32 bytes")))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 32);
        for value in values {
            let wide = match value {
                Value::UInt256(v) => *v,
                other => {
                    UInt256::from(other.to_u128().ok_or_else(|| wrong_kind("UInt256", other))?)
                }
            };
            out.extend_from_slice(&wide.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::UInt256(UInt256::ZERO)
    }
}

/// Codec for `Bool`: one byte per value, 0 or 1.
pub struct BoolCodec;

#[async_trait]
impl ColumnCodec for BoolCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n).await?;
        Ok(bytes.into_iter().map(|b| Value::Bool(b != 0)).collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            let truthy = match value {
                Value::Bool(b) => *b,
                other => other.to_i128().ok_or_else(|| wrong_kind("Bool", other))? != 0,
            };
            out.push(u8::from(truthy));
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Bool(false)
    }
}
