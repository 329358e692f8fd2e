//! `Nullable(T)` wrapper.
//!
//! A byte-wise null mask of length `n` (1 = NULL, 0 = present) precedes the
//! payload. The payload is written as if the nulls were default-initialized;
//! the reader substitutes NULL wherever the mask is set.

use async_trait::async_trait;

use crate::column::ColumnCodec;
use crate::error::Result;
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Nullable(T)`.
pub struct NullableCodec {
    inner: Box<dyn ColumnCodec>,
}

impl NullableCodec {
    /// Wrap the codec of the inner type.
    pub fn new(inner: Box<dyn ColumnCodec>) -> Self {
        NullableCodec { inner }
    }
}

#[async_trait]
impl ColumnCodec for NullableCodec {
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
        let mask = input.read_bytes(n).await?;
        let mut values = self.inner.read_data(input, n).await?;
        for (value, is_null) in values.iter_mut().zip(&mask) {
            if *is_null != 0 {
                *value = Value::Null;
            }
        }
        Ok(values)
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mask: Vec<u8> = values.iter().map(|v| u8::from(v.is_null())).collect();
        output.write_bytes(&mask).await?;

        if values.iter().any(Value::is_null) {
            let default = self.inner.default_value();
            let substituted: Vec<Value> = values
                .iter()
                .map(|v| if v.is_null() { default.clone() } else { v.clone() })
                .collect();
            self.inner.write_data(output, &substituted).await
        } else {
            self.inner.write_data(output, values).await
        }
    }

    fn default_value(&self) -> Value {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use crate::column::testutil::assert_roundtrip;
    use crate::value::Value;

    #[tokio::test]
    async fn null_bits_preserved_independently_of_payload() {
        assert_roundtrip(
            "Nullable(Int32)",
            &[Value::Int32(-1), Value::Null, Value::Int32(42), Value::Null],
        )
        .await;
    }

    #[tokio::test]
    async fn nullable_string_roundtrips() {
        assert_roundtrip(
            "Nullable(String)",
            &[Value::Null, Value::String("x".into()), Value::String(String::new())],
        )
        .await;
    }

    #[tokio::test]
    async fn all_null_column() {
        assert_roundtrip("Nullable(UInt64)", &[Value::Null, Value::Null]).await;
    }
}
