//! `Tuple(T1, ..., Tk)` columns: no framing of their own, each sub-column
//! is written independently at the full row count. Row assembly zips them.

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Tuple(...)` (also the element codec behind `Nested`).
pub struct TupleCodec {
    inners: Vec<Box<dyn ColumnCodec>>,
}

impl TupleCodec {
    /// Wrap the codecs of the element types, in declaration order.
    pub fn new(inners: Vec<Box<dyn ColumnCodec>>) -> Self {
        TupleCodec { inners }
    }
}

#[async_trait]
impl ColumnCodec for TupleCodec {
    async fn read_state_prefix(&self, input: &mut (dyn ClickHouseRead + '_)) -> Result<()> {
        for inner in &self.inners {
            inner.read_state_prefix(input).await?;
        }
        Ok(())
    }

    async fn write_state_prefix(&self, output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        for inner in &self.inners {
            inner.write_state_prefix(output).await?;
        }
        Ok(())
    }

    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let mut columns = Vec::with_capacity(self.inners.len());
        for inner in &self.inners {
            columns.push(inner.read_data(input, n).await?);
        }

        let mut rows = Vec::with_capacity(n);
        for i in 0..n {
            rows.push(Value::Tuple(columns.iter().map(|col| col[i].clone()).collect()));
        }
        Ok(rows)
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut columns: Vec<Vec<Value>> =
            self.inners.iter().map(|_| Vec::with_capacity(values.len())).collect();
        for value in values {
            match value {
                Value::Tuple(items) if items.len() == self.inners.len() => {
                    for (column, item) in columns.iter_mut().zip(items) {
                        column.push(item.clone());
                    }
                }
                Value::Tuple(items) => {
                    return Err(Error::ColumnTypeMismatch(format!(
                        "tuple of {} elements where {} expected",
                        items.len(),
                        self.inners.len()
                    )));
                }
                other => return Err(wrong_kind("Tuple", other)),
            }
        }

        for (inner, column) in self.inners.iter().zip(&columns) {
            inner.write_data(output, column).await?;
        }
        Ok(())
    }

    fn default_value(&self) -> Value {
        Value::Tuple(self.inners.iter().map(|inner| inner.default_value()).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::column::testutil::assert_roundtrip;
    use crate::column::{codec_for_spec, CodecOptions};
    use crate::error::Error;
    use crate::io::write::VecWriter;
    use crate::value::Value;

    #[tokio::test]
    async fn tuples_roundtrip() {
        assert_roundtrip(
            "Tuple(UInt8, String, Nullable(Float64))",
            &[
                Value::Tuple(vec![Value::UInt8(1), Value::String("a".into()), Value::Null]),
                Value::Tuple(vec![
                    Value::UInt8(2),
                    Value::String(String::new()),
                    Value::Float64(0.5),
                ]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn nested_encodes_as_array_of_tuples() {
        assert_roundtrip(
            "Nested(id UInt32, tag String)",
            &[
                Value::Array(vec![
                    Value::Tuple(vec![Value::UInt32(1), Value::String("a".into())]),
                    Value::Tuple(vec![Value::UInt32(2), Value::String("b".into())]),
                ]),
                Value::Array(vec![]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn arity_mismatch_rejected() {
        let codec = codec_for_spec("Tuple(UInt8, UInt8)", &CodecOptions::default()).unwrap();
        let mut out = VecWriter::new();
        let err = codec
            .write_data(&mut out, &[Value::Tuple(vec![Value::UInt8(1)])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ColumnTypeMismatch(_)), "got {err}");
    }
}
