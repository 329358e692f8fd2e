//! `Array(T)` columns.
//!
//! The wire form is a `UInt64[n]` of cumulative offsets (the count of inner
//! items after row `i`), followed by the concatenated inner values as one
//! `T` column whose length is the last offset. Multi-dimensional arrays
//! recurse naturally: the inner codec of `Array(Array(T))` reads its own
//! offsets for the flattened row count.

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Array(T)`.
pub struct ArrayCodec {
    inner: Box<dyn ColumnCodec>,
}

impl ArrayCodec {
    /// Wrap the codec of the element type.
    pub fn new(inner: Box<dyn ColumnCodec>) -> Self {
        ArrayCodec { inner }
    }
}

#[async_trait]
impl ColumnCodec for ArrayCodec {
    async fn read_state_prefix(&self, input: &mut (dyn ClickHouseRead + '_)) -> Result<()> {
        self.inner.read_state_prefix(input).await
    }

    async fn write_state_prefix(&self, output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        self.inner.write_state_prefix(output).await
    }

    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let mut offsets = Vec::with_capacity(n);
        for _ in 0..n {
            offsets.push(input.read_u64().await? as usize);
        }
        let total = offsets.last().copied().unwrap_or(0);
        let mut flat = self.inner.read_data(input, total).await?.into_iter();

        let mut rows = Vec::with_capacity(n);
        let mut start = 0usize;
        for end in offsets {
            if end < start {
                return Err(Error::Protocol("array offsets are not monotonic".into()));
            }
            rows.push(Value::Array(flat.by_ref().take(end - start).collect()));
            start = end;
        }
        Ok(rows)
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut total = 0u64;
        for value in values {
            match value {
                Value::Array(items) => {
                    total += items.len() as u64;
                    output.write_u64(total).await?;
                }
                other => return Err(wrong_kind("Array", other)),
            }
        }

        let mut flat = Vec::with_capacity(total as usize);
        for value in values {
            if let Value::Array(items) = value {
                flat.extend_from_slice(items);
            }
        }
        self.inner.write_data(output, &flat).await
    }

    fn default_value(&self) -> Value {
        Value::Array(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use crate::column::testutil::assert_roundtrip;
    use crate::value::Value;

    fn arr(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[tokio::test]
    async fn flat_arrays_roundtrip() {
        assert_roundtrip(
            "Array(Int32)",
            &[
                arr(vec![Value::Int32(1), Value::Int32(2)]),
                arr(vec![]),
                arr(vec![Value::Int32(-3)]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn nested_empty_arrays_roundtrip_at_every_depth() {
        assert_roundtrip(
            "Array(Array(Array(UInt8)))",
            &[
                arr(vec![]),
                arr(vec![arr(vec![])]),
                arr(vec![arr(vec![arr(vec![])])]),
            ],
        )
        .await;
    }

    #[tokio::test]
    async fn arrays_of_nullable_roundtrip() {
        assert_roundtrip(
            "Array(Nullable(String))",
            &[arr(vec![Value::String("a".into()), Value::Null, Value::String("b".into())])],
        )
        .await;
    }

    #[tokio::test]
    async fn geo_alias_multipolygon() {
        let point =
            |x: f64, y: f64| Value::Tuple(vec![Value::Float64(x), Value::Float64(y)]);
        let ring = arr(vec![point(0.0, 0.0), point(1.0, 0.0), point(1.0, 1.0)]);
        let polygon = arr(vec![ring]);
        assert_roundtrip("MultiPolygon", &[arr(vec![polygon])]).await;
    }
}
