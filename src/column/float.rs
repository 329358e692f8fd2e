//! Float columns: IEEE 754 little-endian `Float32`/`Float64`.

use async_trait::async_trait;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::Result;
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Float32`.
pub struct Float32Codec;

/// Codec for `Float64`.
pub struct Float64Codec;

fn as_f64(value: &Value) -> Option<f64> {
    match *value {
        Value::Float32(v) => Some(f64::from(v)),
        Value::Float64(v) => Some(v),
        // Integers are accepted and converted, like the server does in SQL.
        ref other => other.to_i128().map(|v| v as f64),
    }
}

#[async_trait]
impl ColumnCodec for Float32Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 4).await?;
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| {
                Value::Float32(f32::from_le_bytes(chunk.try_into().expect("4 bytes")))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 4);
        for value in values {
            let v = as_f64(value).ok_or_else(|| wrong_kind("Float32", value))?;
            out.extend_from_slice(&(v as f32).to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Float32(0.0)
    }
}

#[async_trait]
impl ColumnCodec for Float64Codec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 8).await?;
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                Value::Float64(f64::from_le_bytes(chunk.try_into().expect("8 bytes")))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 8);
        for value in values {
            let v = as_f64(value).ok_or_else(|| wrong_kind("Float64", value))?;
            out.extend_from_slice(&v.to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Float64(0.0)
    }
}
