//! Recursive-descent parser for the server's type-specification strings.

use crate::error::{Error, Result};
use crate::types::{IntervalUnit, TypeNode};

/// Parse a type specification such as `Array(Nullable(Decimal(9, 2)))` into
/// a [`TypeNode`] tree.
pub fn parse_type_name(spec: &str) -> Result<TypeNode> {
    let mut parser = Parser::new(spec);
    let node = parser.parse_type()?;
    parser.expect_end()?;
    Ok(node)
}

struct Parser<'a> {
    spec: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(spec: &'a str) -> Self {
        Parser { spec, bytes: spec.as_bytes(), pos: 0 }
    }

    fn error(&self, message: &str) -> Error {
        Error::UnknownType(format!("{message} in '{}'", self.spec))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8) -> Result<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", expected as char)))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.peek().is_some() {
            return Err(self.error("trailing input"));
        }
        Ok(())
    }

    fn ident(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.error("expected a type name"));
        }
        Ok(&self.spec[start..self.pos])
    }

    fn number(&mut self) -> Result<i64> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.bytes.get(self.pos), Some(b'-') | Some(b'+')) {
            self.pos += 1;
        }
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        self.spec[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected a number"))
    }

    /// A single-quoted string literal with backslash escapes; `''` also
    /// escapes a quote, as the server prints Enum member names either way.
    fn quoted_string(&mut self) -> Result<String> {
        self.expect(b'\'')?;
        let mut out = String::new();
        loop {
            match self.bytes.get(self.pos).copied() {
                None => return Err(self.error("unterminated string literal")),
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self.spec[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other,
                    });
                    self.pos += escaped.len_utf8();
                }
                Some(b'\'') => {
                    if self.bytes.get(self.pos + 1) == Some(&b'\'') {
                        out.push('\'');
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        return Ok(out);
                    }
                }
                Some(_) => {
                    let ch = self.spec[self.pos..]
                        .chars()
                        .next()
                        .ok_or_else(|| self.error("invalid utf-8 position"))?;
                    out.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    fn parse_type(&mut self) -> Result<TypeNode> {
        let name = self.ident()?;
        match name {
            "Nullable" => {
                self.expect(b'(')?;
                let inner = self.parse_type()?;
                self.expect(b')')?;
                Ok(TypeNode::Nullable(Box::new(inner)))
            }
            "Array" => {
                self.expect(b'(')?;
                let inner = self.parse_type()?;
                self.expect(b')')?;
                Ok(TypeNode::Array(Box::new(inner)))
            }
            "LowCardinality" => {
                self.expect(b'(')?;
                let inner = self.parse_type()?;
                self.expect(b')')?;
                Ok(TypeNode::LowCardinality(Box::new(inner)))
            }
            "Tuple" => {
                self.expect(b'(')?;
                let mut items = vec![self.parse_type()?];
                while self.eat(b',') {
                    items.push(self.parse_type()?);
                }
                self.expect(b')')?;
                Ok(TypeNode::Tuple(items))
            }
            "Map" => {
                self.expect(b'(')?;
                let key = self.parse_type()?;
                self.expect(b',')?;
                let value = self.parse_type()?;
                self.expect(b')')?;
                Ok(TypeNode::Map(Box::new(key), Box::new(value)))
            }
            "Nested" => {
                self.expect(b'(')?;
                let mut items = vec![self.parse_nested_field()?];
                while self.eat(b',') {
                    items.push(self.parse_nested_field()?);
                }
                self.expect(b')')?;
                Ok(TypeNode::Nested(items))
            }
            "SimpleAggregateFunction" => {
                // The function name is irrelevant for (de)serialization.
                self.expect(b'(')?;
                let _function = self.ident()?;
                self.expect(b',')?;
                let inner = self.parse_type()?;
                self.expect(b')')?;
                Ok(inner)
            }
            "Enum8" => {
                let items = self.parse_enum_items()?;
                items
                    .into_iter()
                    .map(|(name, value)| {
                        i8::try_from(value)
                            .map(|v| (name, v))
                            .map_err(|_| self.error("Enum8 value out of range"))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(TypeNode::Enum8)
            }
            "Enum16" => {
                let items = self.parse_enum_items()?;
                items
                    .into_iter()
                    .map(|(name, value)| {
                        i16::try_from(value)
                            .map(|v| (name, v))
                            .map_err(|_| self.error("Enum16 value out of range"))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(TypeNode::Enum16)
            }
            "FixedString" => {
                self.expect(b'(')?;
                let n = self.number()?;
                self.expect(b')')?;
                if n <= 0 {
                    return Err(self.error("FixedString length must be positive"));
                }
                Ok(TypeNode::FixedString(n as usize))
            }
            "DateTime" => {
                let timezone = if self.eat(b'(') {
                    let tz = self.quoted_string()?;
                    self.expect(b')')?;
                    Some(tz)
                } else {
                    None
                };
                Ok(TypeNode::DateTime { timezone })
            }
            "DateTime64" => {
                self.expect(b'(')?;
                let precision = self.number()?;
                if !(0..=9).contains(&precision) {
                    return Err(self.error("DateTime64 precision must be 0..=9"));
                }
                let timezone = if self.eat(b',') {
                    let tz = self.quoted_string()?;
                    Some(tz)
                } else {
                    None
                };
                self.expect(b')')?;
                Ok(TypeNode::DateTime64 { precision: precision as u8, timezone })
            }
            "Decimal" => {
                self.expect(b'(')?;
                let precision = self.number()?;
                self.expect(b',')?;
                let scale = self.number()?;
                self.expect(b')')?;
                self.decimal(precision, scale)
            }
            "Decimal32" => self.sized_decimal(9),
            "Decimal64" => self.sized_decimal(18),
            "Decimal128" => self.sized_decimal(38),
            "Decimal256" => self.sized_decimal(76),
            "Object" => {
                self.expect(b'(')?;
                let kind = self.quoted_string()?;
                self.expect(b')')?;
                if kind.eq_ignore_ascii_case("json") {
                    Ok(TypeNode::Json)
                } else {
                    Err(Error::UnknownType(format!("Object('{kind}')")))
                }
            }
            // Geo aliases expand transparently.
            "Point" => Ok(point()),
            "Ring" => Ok(TypeNode::Array(Box::new(point()))),
            "Polygon" => Ok(TypeNode::Array(Box::new(TypeNode::Array(Box::new(point()))))),
            "MultiPolygon" => Ok(TypeNode::Array(Box::new(TypeNode::Array(Box::new(
                TypeNode::Array(Box::new(point())),
            ))))),
            "Bool" => Ok(TypeNode::Bool),
            "Int8" => Ok(TypeNode::Int8),
            "Int16" => Ok(TypeNode::Int16),
            "Int32" => Ok(TypeNode::Int32),
            "Int64" => Ok(TypeNode::Int64),
            "Int128" => Ok(TypeNode::Int128),
            "Int256" => Ok(TypeNode::Int256),
            "UInt8" => Ok(TypeNode::UInt8),
            "UInt16" => Ok(TypeNode::UInt16),
            "UInt32" => Ok(TypeNode::UInt32),
            "UInt64" => Ok(TypeNode::UInt64),
            "UInt128" => Ok(TypeNode::UInt128),
            "UInt256" => Ok(TypeNode::UInt256),
            "Float32" => Ok(TypeNode::Float32),
            "Float64" => Ok(TypeNode::Float64),
            "String" => Ok(TypeNode::String),
            "Date" => Ok(TypeNode::Date),
            "Date32" => Ok(TypeNode::Date32),
            "UUID" => Ok(TypeNode::Uuid),
            "IPv4" => Ok(TypeNode::Ipv4),
            "IPv6" => Ok(TypeNode::Ipv6),
            "IntervalYear" => Ok(TypeNode::Interval(IntervalUnit::Year)),
            "IntervalQuarter" => Ok(TypeNode::Interval(IntervalUnit::Quarter)),
            "IntervalMonth" => Ok(TypeNode::Interval(IntervalUnit::Month)),
            "IntervalWeek" => Ok(TypeNode::Interval(IntervalUnit::Week)),
            "IntervalDay" => Ok(TypeNode::Interval(IntervalUnit::Day)),
            "IntervalHour" => Ok(TypeNode::Interval(IntervalUnit::Hour)),
            "IntervalMinute" => Ok(TypeNode::Interval(IntervalUnit::Minute)),
            "IntervalSecond" => Ok(TypeNode::Interval(IntervalUnit::Second)),
            other => Err(Error::UnknownType(other.to_owned())),
        }
    }

    fn sized_decimal(&mut self, precision: i64) -> Result<TypeNode> {
        self.expect(b'(')?;
        let scale = self.number()?;
        self.expect(b')')?;
        self.decimal(precision, scale)
    }

    fn decimal(&mut self, precision: i64, scale: i64) -> Result<TypeNode> {
        if !(1..=76).contains(&precision) {
            return Err(self.error("Decimal precision must be 1..=76"));
        }
        if !(0..=precision).contains(&scale) {
            return Err(self.error("Decimal scale must be 0..=precision"));
        }
        Ok(TypeNode::Decimal { precision: precision as u8, scale: scale as u8 })
    }

    fn parse_nested_field(&mut self) -> Result<(String, TypeNode)> {
        let name = self.ident()?.to_owned();
        let node = self.parse_type()?;
        Ok((name, node))
    }

    fn parse_enum_items(&mut self) -> Result<Vec<(String, i64)>> {
        self.expect(b'(')?;
        let mut items = Vec::new();
        loop {
            let name = self.quoted_string()?;
            self.expect(b'=')?;
            let value = self.number()?;
            items.push((name, value));
            if !self.eat(b',') {
                break;
            }
        }
        self.expect(b')')?;
        Ok(items)
    }
}

fn point() -> TypeNode {
    TypeNode::Tuple(vec![TypeNode::Float64, TypeNode::Float64])
}
