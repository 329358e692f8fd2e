//! The block codec: frames a [`Block`] on top of the byte primitives and
//! the column codecs, with optional compression.
//!
//! Wire layout: BlockInfo (field-id tagged, on revisions that carry it),
//! varint column count, varint row count, then per column the name, the
//! type-specification string and, when rows are present, the codec's state
//! prefix followed by its data.

use crate::block::{Block, BlockInfo};
use crate::column::{codec_for_spec, CodecOptions};
use crate::compression::CompressionMethod;
use crate::error::{Error, Result};
use crate::io::compressed::{CompressedReader, CompressedWriter};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::protocol::DBMS_MIN_REVISION_WITH_BLOCK_INFO;

/// Reads blocks off a transport for one connection.
pub struct BlockReader {
    revision: u64,
    compression: Option<CompressionMethod>,
}

impl BlockReader {
    /// Plain reader for a server at `revision`.
    pub fn new(revision: u64) -> Self {
        BlockReader { revision, compression: None }
    }

    /// Expect compressed frames around every block.
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = Some(method);
        self
    }

    /// Read one block. `input` is positioned after the packet tag and the
    /// temporary-table name.
    pub async fn read_block(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        opts: &CodecOptions,
    ) -> Result<Block> {
        if self.compression.is_some() {
            let mut framed = CompressedReader::new(input);
            self.read_block_plain(&mut framed, opts).await
        } else {
            self.read_block_plain(input, opts).await
        }
    }

    async fn read_block_plain(
        &self,
        input: &mut (dyn ClickHouseRead + '_),
        opts: &CodecOptions,
    ) -> Result<Block> {
        let mut info = BlockInfo::default();
        if self.revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            info = read_block_info(input).await?;
        }

        let n_columns = input.read_varint().await? as usize;
        let n_rows = input.read_varint().await? as usize;

        let mut columns = Vec::with_capacity(n_columns);
        let mut data = Vec::with_capacity(n_columns);
        for _ in 0..n_columns {
            let name = input.read_string().await?;
            let type_spec = input.read_string().await?;
            if n_rows > 0 {
                let codec = codec_for_spec(&type_spec, opts)?;
                codec.read_state_prefix(input).await?;
                data.push(codec.read_data(input, n_rows).await?);
            } else {
                data.push(Vec::new());
            }
            columns.push((name, type_spec));
        }

        let mut block = Block::from_columns(columns, data)?;
        block.info = info;
        Ok(block)
    }
}

/// Writes blocks onto a transport for one connection.
pub struct BlockWriter {
    revision: u64,
    compression: Option<(CompressionMethod, usize)>,
}

impl BlockWriter {
    /// Plain writer for a server at `revision`.
    pub fn new(revision: u64) -> Self {
        BlockWriter { revision, compression: None }
    }

    /// Frame every block with `method`, forwarding frames in
    /// `block_size`-byte chunks.
    pub fn with_compression(mut self, method: CompressionMethod, block_size: usize) -> Self {
        self.compression = Some((method, block_size));
        self
    }

    /// Write one block. The caller has already written the packet tag and
    /// the table-name string, which stay uncompressed.
    pub async fn write_block(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        block: &Block,
        opts: &CodecOptions,
    ) -> Result<()> {
        if let Some((method, block_size)) = self.compression {
            let mut framed = CompressedWriter::new(output, method, block_size);
            self.write_block_plain(&mut framed, block, opts).await?;
            framed.flush().await
        } else {
            self.write_block_plain(output, block, opts).await?;
            output.flush().await
        }
    }

    async fn write_block_plain(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        block: &Block,
        opts: &CodecOptions,
    ) -> Result<()> {
        if self.revision >= DBMS_MIN_REVISION_WITH_BLOCK_INFO {
            write_block_info(output, &block.info).await?;
        }

        output.write_varint(block.n_columns() as u64).await?;
        output.write_varint(block.n_rows() as u64).await?;

        for (index, (name, type_spec)) in block.columns_with_types().iter().enumerate() {
            output.write_string(name).await?;
            output.write_string(type_spec).await?;
            if block.n_rows() > 0 {
                let codec = codec_for_spec(type_spec, opts)?;
                codec.write_state_prefix(output).await?;
                let values = block.column_data(index).expect("descriptor/data parity");
                codec
                    .write_data(output, values)
                    .await
                    .map_err(|e| name_write_error(e, name, type_spec))?;
            }
        }
        Ok(())
    }
}

/// Attach the column name and declared type to value-level write errors.
fn name_write_error(err: Error, column: &str, type_spec: &str) -> Error {
    match err {
        Error::ColumnTypeMismatch(detail) | Error::StructPack(detail) => Error::TypeMismatch {
            expected: type_spec.to_owned(),
            got: detail,
            column: column.to_owned(),
        },
        other => other,
    }
}

async fn read_block_info(input: &mut (dyn ClickHouseRead + '_)) -> Result<BlockInfo> {
    let mut info = BlockInfo::default();
    loop {
        match input.read_varint().await? {
            0 => return Ok(info),
            1 => info.is_overflows = input.read_u8().await? != 0,
            2 => info.bucket_num = input.read_i32().await?,
            other => {
                return Err(Error::Protocol(format!("unknown BlockInfo field id: {other}")));
            }
        }
    }
}

async fn write_block_info(
    output: &mut (dyn ClickHouseWrite + '_),
    info: &BlockInfo,
) -> Result<()> {
    output.write_varint(1).await?;
    output.write_u8(u8::from(info.is_overflows)).await?;
    output.write_varint(2).await?;
    output.write_i32(info.bucket_num).await?;
    output.write_varint(0).await
}
