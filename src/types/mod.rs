//! The ClickHouse type system.
//!
//! Column types arrive from the server as specification strings in the
//! server's own textual syntax, e.g. `Array(Nullable(Decimal(9, 2)))`. The
//! [`parser`] turns such a string into a [`TypeNode`] tree; the column
//! registry then maps the tree to a codec.
//!
//! Composite nesting follows the server's rules: `Nullable` may only wrap
//! scalar types, `LowCardinality` wraps scalars or `Nullable` scalars, and
//! arrays nest freely.

mod parser;

pub use parser::parse_type_name;

/// Time interval units, each encoded on the wire as an `Int64` count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    /// `IntervalYear`.
    Year,
    /// `IntervalQuarter`.
    Quarter,
    /// `IntervalMonth`.
    Month,
    /// `IntervalWeek`.
    Week,
    /// `IntervalDay`.
    Day,
    /// `IntervalHour`.
    Hour,
    /// `IntervalMinute`.
    Minute,
    /// `IntervalSecond`.
    Second,
}

/// A parsed type specification.
///
/// Leaves are scalar types; composites carry their parsed sub-trees. The
/// four geo aliases (`Point`, `Ring`, `Polygon`, `MultiPolygon`) are
/// expanded by the parser and never appear as nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeNode {
    /// `Bool`: one byte, 0 or 1.
    Bool,
    /// `Int8`.
    Int8,
    /// `Int16`.
    Int16,
    /// `Int32`.
    Int32,
    /// `Int64`.
    Int64,
    /// `Int128`.
    Int128,
    /// `Int256`.
    Int256,
    /// `UInt8`.
    UInt8,
    /// `UInt16`.
    UInt16,
    /// `UInt32`.
    UInt32,
    /// `UInt64`.
    UInt64,
    /// `UInt128`.
    UInt128,
    /// `UInt256`.
    UInt256,
    /// `Float32`.
    Float32,
    /// `Float64`.
    Float64,
    /// `String`: varint length + bytes per value.
    String,
    /// `FixedString(n)`: exactly `n` bytes per value, NUL-padded on write.
    FixedString(usize),
    /// `Date`: UInt16 days since 1970-01-01.
    Date,
    /// `Date32`: Int32 days since 1970-01-01.
    Date32,
    /// `DateTime` / `DateTime('TZ')`: UInt32 seconds since the epoch.
    DateTime {
        /// Optional timezone parameter from the declaration.
        timezone: Option<String>,
    },
    /// `DateTime64(p[, 'TZ'])`: Int64 ticks at scale 10^p.
    DateTime64 {
        /// Sub-second decimal digits (0..=9).
        precision: u8,
        /// Optional timezone parameter from the declaration.
        timezone: Option<String>,
    },
    /// Any `Decimal` spelling, normalized to precision + scale. The backing
    /// integer width follows from the precision (9/18/38/76 digit caps).
    Decimal {
        /// Total significant digits.
        precision: u8,
        /// Digits after the point.
        scale: u8,
    },
    /// `UUID`: two UInt64 halves, high then low.
    Uuid,
    /// `IPv4`: UInt32 with network semantics.
    Ipv4,
    /// `IPv6`: 16 raw bytes.
    Ipv6,
    /// The `Interval*` family.
    Interval(IntervalUnit),
    /// `Enum8('a' = 1, ...)`: Int8 wire values with a name map.
    Enum8(Vec<(String, i8)>),
    /// `Enum16('a' = 1, ...)`: Int16 wire values with a name map.
    Enum16(Vec<(String, i16)>),
    /// `Nullable(T)`: byte-wise null mask before the payload.
    Nullable(Box<TypeNode>),
    /// `Array(T)`: cumulative UInt64 offsets + flattened inner column.
    Array(Box<TypeNode>),
    /// `Tuple(T1, ..., Tk)`: sub-columns written independently.
    Tuple(Vec<TypeNode>),
    /// `Map(K, V)`: encoded as `Array(Tuple(K, V))`.
    Map(Box<TypeNode>, Box<TypeNode>),
    /// `LowCardinality(T)`: dictionary-encoded column.
    LowCardinality(Box<TypeNode>),
    /// `Nested(n1 T1, ..., nk Tk)`: `Array(Tuple(T1, ..., Tk))` per row.
    Nested(Vec<(String, TypeNode)>),
    /// `Object('json')`: server-delegated inner representation.
    Json,
}

impl TypeNode {
    /// True when a `Nullable` wrapper sits directly at this node.
    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeNode::Nullable(_))
    }

    /// Strip one `Nullable` wrapper, if present.
    pub fn unwrap_nullable(&self) -> &TypeNode {
        match self {
            TypeNode::Nullable(inner) => inner,
            other => other,
        }
    }
}
