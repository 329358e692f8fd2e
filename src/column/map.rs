//! `Map(K, V)` columns, encoded identically to `Array(Tuple(K, V))`:
//! cumulative `UInt64` offsets, then the flattened key column, then the
//! flattened value column. The reader materializes per-row pairs with
//! last-wins de-duplication of equal keys.

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Map(K, V)`.
pub struct MapCodec {
    key: Box<dyn ColumnCodec>,
    value: Box<dyn ColumnCodec>,
}

impl MapCodec {
    /// Wrap the key and value codecs.
    pub fn new(key: Box<dyn ColumnCodec>, value: Box<dyn ColumnCodec>) -> Self {
        MapCodec { key, value }
    }
}

#[async_trait]
impl ColumnCodec for MapCodec {
    async fn read_state_prefix(&self, input: &mut (dyn ClickHouseRead + '_)) -> Result<()> {
        self.key.read_state_prefix(input).await?;
        self.value.read_state_prefix(input).await
    }

    async fn write_state_prefix(&self, output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        self.key.write_state_prefix(output).await?;
        self.value.write_state_prefix(output).await
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
        let keys = self.key.read_data(input, total).await?;
        let values = self.value.read_data(input, total).await?;
        let mut flat = keys.into_iter().zip(values);

        let mut rows = Vec::with_capacity(n);
        let mut start = 0usize;
        for end in offsets {
            if end < start || end > total {
                return Err(Error::Protocol("map offsets are not monotonic".into()));
            }
            let mut pairs: Vec<(Value, Value)> = Vec::with_capacity(end - start);
            for (key, value) in flat.by_ref().take(end - start) {
                match pairs.iter_mut().find(|(k, _)| *k == key) {
                    Some(existing) => existing.1 = value,
                    None => pairs.push((key, value)),
                }
            }
            rows.push(Value::Map(pairs));
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
                Value::Map(pairs) => {
                    total += pairs.len() as u64;
                    output.write_u64(total).await?;
                }
                other => return Err(wrong_kind("Map", other)),
            }
        }

        let mut keys = Vec::with_capacity(total as usize);
        let mut vals = Vec::with_capacity(total as usize);
        for value in values {
            if let Value::Map(pairs) = value {
                for (k, v) in pairs {
                    keys.push(k.clone());
                    vals.push(v.clone());
                }
            }
        }
        self.key.write_data(output, &keys).await?;
        self.value.write_data(output, &vals).await
    }

    fn default_value(&self) -> Value {
        Value::Map(Vec::new())
    }
}
