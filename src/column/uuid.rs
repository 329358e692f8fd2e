//! UUID column: each value is two UInt64 halves, high half first.

use async_trait::async_trait;
use uuid::Uuid;

use crate::column::{wrong_kind, ColumnCodec};
use crate::error::{Error, Result};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `UUID`.
pub struct UuidCodec;

#[async_trait]
impl ColumnCodec for UuidCodec {
    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let bytes = input.read_bytes(n * 16).await?;
        Ok(bytes
            .chunks_exact(16)
            .map(|chunk| {
                let hi = u64::from_le_bytes(chunk[..8].try_into().expect("8 bytes"));
                let lo = u64::from_le_bytes(chunk[8..].try_into().expect("8 bytes"));
                Value::Uuid(Uuid::from_u128((u128::from(hi) << 64) | u128::from(lo)))
            })
            .collect())
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        let mut out = Vec::with_capacity(values.len() * 16);
        for value in values {
            let uuid = match value {
                Value::Uuid(u) => *u,
                Value::String(s) => {
                    Uuid::parse_str(s).map_err(|_| Error::CannotParseUuid(s.clone()))?
                }
                other => return Err(wrong_kind("UUID", other)),
            };
            let raw = uuid.as_u128();
            out.extend_from_slice(&((raw >> 64) as u64).to_le_bytes());
            out.extend_from_slice(&(raw as u64).to_le_bytes());
        }
        output.write_bytes(&out).await
    }

    fn default_value(&self) -> Value {
        Value::Uuid(Uuid::nil())
    }
}
