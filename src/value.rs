//! Dynamic values exchanged with the server.
//!
//! Every cell of a result block is a [`Value`]. The same enum is accepted on
//! the write side (INSERT data, external tables, query parameters), where
//! each column codec converts and validates the variants it understands.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// A 256-bit signed integer, stored as 32 little-endian two's-complement
/// bytes. Only construction, comparison and decimal formatting are
/// supported; the driver moves these values, it does not do arithmetic on
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Int256(pub [u8; 32]);

/// A 256-bit unsigned integer, stored as 32 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UInt256(pub [u8; 32]);

impl Int256 {
    /// The smallest representable value, -2^255.
    pub const MIN: Int256 = {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x80;
        Int256(bytes)
    };

    /// The largest representable value, 2^255 - 1.
    pub const MAX: Int256 = {
        let mut bytes = [0xffu8; 32];
        bytes[31] = 0x7f;
        Int256(bytes)
    };

    /// Zero.
    pub const ZERO: Int256 = Int256([0u8; 32]);

    /// True when the sign bit is set.
    pub fn is_negative(&self) -> bool {
        self.0[31] & 0x80 != 0
    }

    /// Little-endian wire bytes.
    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Build from little-endian wire bytes.
    pub fn from_le_bytes(bytes: [u8; 32]) -> Int256 {
        Int256(bytes)
    }
}

impl UInt256 {
    /// The largest representable value, 2^256 - 1.
    pub const MAX: UInt256 = UInt256([0xffu8; 32]);

    /// Zero.
    pub const ZERO: UInt256 = UInt256([0u8; 32]);

    /// Little-endian wire bytes.
    pub fn to_le_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Build from little-endian wire bytes.
    pub fn from_le_bytes(bytes: [u8; 32]) -> UInt256 {
        UInt256(bytes)
    }
}

impl From<i128> for Int256 {
    fn from(value: i128) -> Int256 {
        let mut bytes = if value < 0 { [0xffu8; 32] } else { [0u8; 32] };
        bytes[..16].copy_from_slice(&value.to_le_bytes());
        Int256(bytes)
    }
}

impl From<u128> for UInt256 {
    fn from(value: u128) -> UInt256 {
        let mut bytes = [0u8; 32];
        bytes[..16].copy_from_slice(&value.to_le_bytes());
        UInt256(bytes)
    }
}

/// Format an unsigned 32-byte little-endian magnitude in decimal.
fn format_magnitude(mut bytes: [u8; 32], out: &mut String) {
    let mut digits = Vec::new();
    loop {
        // One long division of the magnitude by 10, most significant first.
        let mut remainder = 0u32;
        let mut all_zero = true;
        for byte in bytes.iter_mut().rev() {
            let cur = remainder * 256 + u32::from(*byte);
            *byte = (cur / 10) as u8;
            remainder = cur % 10;
            if *byte != 0 {
                all_zero = false;
            }
        }
        digits.push(b'0' + remainder as u8);
        if all_zero {
            break;
        }
    }
    digits.reverse();
    out.push_str(std::str::from_utf8(&digits).expect("decimal digits"));
}

impl fmt::Display for Int256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        if self.is_negative() {
            out.push('-');
            // Two's complement negate to get the magnitude.
            let mut magnitude = [0u8; 32];
            let mut carry = 1u16;
            for (i, byte) in self.0.iter().enumerate() {
                let cur = u16::from(!byte) + carry;
                magnitude[i] = cur as u8;
                carry = cur >> 8;
            }
            format_magnitude(magnitude, &mut out);
        } else {
            format_magnitude(self.0, &mut out);
        }
        f.write_str(&out)
    }
}

impl fmt::Display for UInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        format_magnitude(self.0, &mut out);
        f.write_str(&out)
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL (only valid inside `Nullable(T)` columns).
    Null,
    /// `Bool`.
    Bool(bool),
    /// `Int8`.
    Int8(i8),
    /// `Int16`.
    Int16(i16),
    /// `Int32`.
    Int32(i32),
    /// `Int64` and the `Interval*` family.
    Int64(i64),
    /// `Int128`.
    Int128(i128),
    /// `Int256`.
    Int256(Int256),
    /// `UInt8`.
    UInt8(u8),
    /// `UInt16`.
    UInt16(u16),
    /// `UInt32`.
    UInt32(u32),
    /// `UInt64`.
    UInt64(u64),
    /// `UInt128`.
    UInt128(u128),
    /// `UInt256`.
    UInt256(UInt256),
    /// `Float32`.
    Float32(f32),
    /// `Float64`.
    Float64(f64),
    /// `String`, `FixedString(n)`, enum members by name, JSON text.
    String(String),
    /// Raw bytes; what string columns yield when `strings_as_bytes` is set.
    Bytes(Vec<u8>),
    /// `UUID`.
    Uuid(Uuid),
    /// `Date`: days since 1970-01-01 as a calendar date.
    Date(NaiveDate),
    /// `Date32`: extended-range calendar date.
    Date32(NaiveDate),
    /// `DateTime`: seconds precision.
    DateTime(DateTime<Utc>),
    /// `DateTime64(p)`: `ticks` at scale `10^precision` since the epoch.
    DateTime64 {
        /// Tick count, possibly negative for pre-epoch instants.
        ticks: i64,
        /// Decimal digits of sub-second precision.
        precision: u8,
    },
    /// `Decimal32(p, s)`: `value = round(decimal * 10^scale)`.
    Decimal32 {
        /// Scaled integer representation.
        value: i32,
        /// Declared scale.
        scale: u8,
    },
    /// `Decimal64(p, s)`.
    Decimal64 {
        /// Scaled integer representation.
        value: i64,
        /// Declared scale.
        scale: u8,
    },
    /// `Decimal128(p, s)`.
    Decimal128 {
        /// Scaled integer representation.
        value: i128,
        /// Declared scale.
        scale: u8,
    },
    /// `Decimal256(p, s)`.
    Decimal256 {
        /// Scaled integer representation.
        value: Int256,
        /// Declared scale.
        scale: u8,
    },
    /// `IPv4`.
    Ipv4(Ipv4Addr),
    /// `IPv6`.
    Ipv6(Ipv6Addr),
    /// `Array(T)`.
    Array(Vec<Value>),
    /// `Tuple(T1, ..., Tk)` and `Nested` rows.
    Tuple(Vec<Value>),
    /// `Map(K, V)`: pairs in server order, duplicate keys already collapsed
    /// (last occurrence wins).
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int8(_) => "Int8",
            Value::Int16(_) => "Int16",
            Value::Int32(_) => "Int32",
            Value::Int64(_) => "Int64",
            Value::Int128(_) => "Int128",
            Value::Int256(_) => "Int256",
            Value::UInt8(_) => "UInt8",
            Value::UInt16(_) => "UInt16",
            Value::UInt32(_) => "UInt32",
            Value::UInt64(_) => "UInt64",
            Value::UInt128(_) => "UInt128",
            Value::UInt256(_) => "UInt256",
            Value::Float32(_) => "Float32",
            Value::Float64(_) => "Float64",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Uuid(_) => "UUID",
            Value::Date(_) => "Date",
            Value::Date32(_) => "Date32",
            Value::DateTime(_) => "DateTime",
            Value::DateTime64 { .. } => "DateTime64",
            Value::Decimal32 { .. } => "Decimal32",
            Value::Decimal64 { .. } => "Decimal64",
            Value::Decimal128 { .. } => "Decimal128",
            Value::Decimal256 { .. } => "Decimal256",
            Value::Ipv4(_) => "IPv4",
            Value::Ipv6(_) => "IPv6",
            Value::Array(_) => "Array",
            Value::Tuple(_) => "Tuple",
            Value::Map(_) => "Map",
        }
    }

    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widen any signed or unsigned integer variant (and Bool) to `i128`.
    /// `UInt128` values above `i128::MAX` and 256-bit values are rejected.
    pub(crate) fn to_i128(&self) -> Option<i128> {
        match *self {
            Value::Bool(b) => Some(i128::from(b)),
            Value::Int8(v) => Some(i128::from(v)),
            Value::Int16(v) => Some(i128::from(v)),
            Value::Int32(v) => Some(i128::from(v)),
            Value::Int64(v) => Some(i128::from(v)),
            Value::Int128(v) => Some(v),
            Value::UInt8(v) => Some(i128::from(v)),
            Value::UInt16(v) => Some(i128::from(v)),
            Value::UInt32(v) => Some(i128::from(v)),
            Value::UInt64(v) => Some(i128::from(v)),
            Value::UInt128(v) => i128::try_from(v).ok(),
            _ => None,
        }
    }

    /// Widen any non-negative integer variant to `u128`.
    pub(crate) fn to_u128(&self) -> Option<u128> {
        match *self {
            Value::Bool(b) => Some(u128::from(b)),
            Value::Int8(v) => u128::try_from(v).ok(),
            Value::Int16(v) => u128::try_from(v).ok(),
            Value::Int32(v) => u128::try_from(v).ok(),
            Value::Int64(v) => u128::try_from(v).ok(),
            Value::Int128(v) => u128::try_from(v).ok(),
            Value::UInt8(v) => Some(u128::from(v)),
            Value::UInt16(v) => Some(u128::from(v)),
            Value::UInt32(v) => Some(u128::from(v)),
            Value::UInt64(v) => Some(u128::from(v)),
            Value::UInt128(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Int128(v) => write!(f, "{v}"),
            Value::Int256(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::UInt128(v) => write!(f, "{v}"),
            Value::UInt256(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Bytes(v) => write!(f, "{v:?}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::Date32(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
            Value::DateTime64 { ticks, precision } => {
                write!(f, "DateTime64({ticks}, {precision})")
            }
            Value::Decimal32 { value, scale } => format_decimal(f, i128::from(*value), *scale),
            Value::Decimal64 { value, scale } => format_decimal(f, i128::from(*value), *scale),
            Value::Decimal128 { value, scale } => format_decimal(f, *value, *scale),
            Value::Decimal256 { value, scale } => {
                // 256-bit decimals print the scaled integer with a shifted
                // point, using the Int256 decimal formatter.
                let digits = value.to_string();
                write_shifted_point(f, &digits, *scale)
            }
            Value::Ipv4(v) => write!(f, "{v}"),
            Value::Ipv6(v) => write!(f, "{v}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn format_decimal(f: &mut fmt::Formatter<'_>, value: i128, scale: u8) -> fmt::Result {
    let digits = value.unsigned_abs().to_string();
    if value < 0 {
        f.write_str("-")?;
    }
    write_shifted_point(f, &digits, scale)
}

fn write_shifted_point(f: &mut fmt::Formatter<'_>, digits: &str, scale: u8) -> fmt::Result {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    f.write_str(sign)?;
    let scale = scale as usize;
    if scale == 0 {
        return f.write_str(digits);
    }
    if digits.len() <= scale {
        write!(f, "0.{:0>width$}", digits, width = scale)
    } else {
        let split = digits.len() - scale;
        write!(f, "{}.{}", &digits[..split], &digits[split..])
    }
}

macro_rules! impl_value_from {
    ($($from:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$from> for Value {
                fn from(value: $from) -> Value {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    i128 => Int128,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    u128 => UInt128,
    f32 => Float32,
    f64 => Float64,
    String => String,
    Uuid => Uuid,
    Ipv4Addr => Ipv4,
    Ipv6Addr => Ipv6,
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::String(value.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Value {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Value {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}
