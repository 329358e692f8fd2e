//! `Object('json')` columns.
//!
//! On write the client sends a `UInt8(1)` state prefix and the values as a
//! plain string column of JSON text. On read the server announces the
//! concrete representation it chose: a `UInt8` version, then the delegated
//! type specification, then that codec's own prefix and data.

use async_trait::async_trait;

use crate::column::{codec_for_spec, string::StringCodec, CodecOptions, ColumnCodec};
use crate::error::Result;
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::value::Value;

/// Codec for `Object('json')`.
pub struct JsonCodec {
    opts: CodecOptions,
    text: StringCodec,
}

impl JsonCodec {
    /// Construct; `opts` is needed to build the server-delegated codec on
    /// read.
    pub fn new(opts: CodecOptions) -> Self {
        JsonCodec { opts, text: StringCodec::new(opts.strings_as_bytes) }
    }
}

#[async_trait]
impl ColumnCodec for JsonCodec {
    async fn write_state_prefix(&self, output: &mut (dyn ClickHouseWrite + '_)) -> Result<()> {
        output.write_u8(1).await
    }

    async fn read_data(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        n: usize,
    ) -> Result<Vec<Value>> {
        let _version = input.read_u8().await?;
        let spec = input.read_string().await?;
        let delegated = codec_for_spec(&spec, &self.opts)?;
        delegated.read_state_prefix(input).await?;
        delegated.read_data(input, n).await
    }

    async fn write_data(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        values: &[Value],
    ) -> Result<()> {
        self.text.write_data(output, values).await
    }

    fn default_value(&self) -> Value {
        Value::String("{}".into())
    }
}
