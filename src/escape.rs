//! SQL parameter substitution.
//!
//! For non-INSERT queries, named arguments are substituted into the query
//! text at `{name}` placeholders, each value escaped by kind. `{{` and `}}`
//! are literal braces.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::value::Value;

/// Render one value in SQL-literal form.
pub fn escape_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Date(d) | Value::Date32(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
        Value::DateTime64 { ticks, precision } => {
            let scale = 10i64.pow(u32::from(*precision));
            let secs = ticks.div_euclid(scale);
            let frac = ticks.rem_euclid(scale);
            match chrono::DateTime::from_timestamp(secs, 0) {
                Some(dt) if *precision > 0 => format!(
                    "'{}.{:0>width$}'",
                    dt.format("%Y-%m-%d %H:%M:%S"),
                    frac,
                    width = *precision as usize
                ),
                Some(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S")),
                None => ticks.to_string(),
            }
        }
        Value::String(s) => escape_str(s),
        Value::Bytes(b) => escape_str(&String::from_utf8_lossy(b)),
        Value::Uuid(u) => format!("'{u}'"),
        Value::Ipv4(addr) => format!("'{addr}'"),
        Value::Ipv6(addr) => format!("'{addr}'"),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(escape_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(escape_value).collect();
            format!("({})", inner.join(", "))
        }
        Value::Map(pairs) => {
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}: {}", escape_value(k), escape_value(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
        // Numbers, bools and the date-time scalars print verbatim.
        other => other.to_string(),
    }
}

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\x08' => out.push_str("\\b"),
            '\x0c' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            '\x07' => out.push_str("\\a"),
            '\x0b' => out.push_str("\\v"),
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Substitute named parameters into `query`.
pub fn substitute_params(query: &str, params: &HashMap<String, Value>) -> Result<String> {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => name.push(c),
                        None => {
                            return Err(Error::ColumnTypeMismatch(
                                "unterminated parameter placeholder".into(),
                            ));
                        }
                    }
                }
                let value = params.get(&name).ok_or_else(|| {
                    Error::ColumnTypeMismatch(format!("parameter '{name}' not found"))
                })?;
                out.push_str(&escape_value(value));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate, Utc};
    use uuid::Uuid;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
    }

    #[test]
    fn scalars_substitute() {
        let query = substitute_params(
            "SELECT * FROM t WHERE a = {a} AND b = {b}",
            &params(&[("a", Value::Int32(-5)), ("b", Value::Null)]),
        )
        .unwrap();
        assert_eq!(query, "SELECT * FROM t WHERE a = -5 AND b = NULL");
    }

    #[test]
    fn strings_escape_control_characters() {
        assert_eq!(escape_value(&Value::String("a'b".into())), r"'a\'b'");
        assert_eq!(escape_value(&Value::String("a\\b".into())), r"'a\\b'");
        assert_eq!(
            escape_value(&Value::String("\x08\x0c\r\n\t\0\x07\x0b".into())),
            r"'\b\f\r\n\t\0\a\v'"
        );
    }

    #[test]
    fn datetime64_renders_fractional_seconds() {
        let v = Value::DateTime64 { ticks: 1_500, precision: 3 };
        assert_eq!(escape_value(&v), "'1970-01-01 00:00:01.500'");
    }

    #[test]
    fn dates_and_uuids_quote() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(escape_value(&Value::Date(date)), "'2024-02-29'");
        let dt = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(escape_value(&Value::DateTime(dt)), "'1970-01-01 00:00:00'");
        let uuid = Uuid::nil();
        assert_eq!(
            escape_value(&Value::Uuid(uuid)),
            "'00000000-0000-0000-0000-000000000000'"
        );
    }

    #[test]
    fn collections_bracket() {
        let array = Value::Array(vec![Value::Int8(1), Value::String("x".into())]);
        assert_eq!(escape_value(&array), "[1, 'x']");
        let tuple = Value::Tuple(vec![Value::Int8(1), Value::Null]);
        assert_eq!(escape_value(&tuple), "(1, NULL)");
    }

    #[test]
    fn literal_braces_pass_through() {
        let query = substitute_params("SELECT '{{}}'", &HashMap::new()).unwrap();
        assert_eq!(query, "SELECT '{}'");
    }

    #[test]
    fn missing_parameter_is_an_error() {
        assert!(substitute_params("SELECT {missing}", &HashMap::new()).is_err());
    }
}
