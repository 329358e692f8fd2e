//! # clickhouse-async
//!
//! An async driver for ClickHouse speaking the native TCP binary protocol:
//! cursor-style queries, streaming results, batched INSERTs, LZ4/LZ4HC/ZSTD
//! block compression with CityHash128 integrity checks, optional TLS, and a
//! bounded connection pool.
//!
//! # Quick start
//!
//! ```no_run
//! use clickhouse_async::{parse_dsn, Connection, Value};
//!
//! # async fn example() -> clickhouse_async::Result<()> {
//! let options = parse_dsn("clickhouse://default@localhost:9000/default?compression=lz4")?;
//! let mut conn = Connection::new(options);
//! conn.connect().await?;
//!
//! conn.execute(
//!     "CREATE TABLE IF NOT EXISTS points (id UInt64, label String) ENGINE = Memory",
//! )
//! .await?;
//!
//! let inserted = conn
//!     .insert(
//!         "INSERT INTO points (id, label) VALUES",
//!         vec![
//!             vec![Value::UInt64(1), Value::String("a".into())],
//!             vec![Value::UInt64(2), Value::String("b".into())],
//!         ],
//!     )
//!     .await?;
//! assert_eq!(inserted, 2);
//!
//! let result = conn.execute("SELECT id, label FROM points ORDER BY id").await?;
//! for row in result.rows() {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Pooling
//!
//! ```no_run
//! use clickhouse_async::{ConnectionOptions, Pool};
//!
//! # async fn example() -> clickhouse_async::Result<()> {
//! let pool = Pool::new(ConnectionOptions::new("localhost", 9000), 2, 10)?;
//! pool.startup().await?;
//! {
//!     let mut conn = pool.connection().await?;
//!     conn.execute("SELECT 1").await?;
//!     conn.release().await;
//! }
//! pool.shutdown().await?;
//! # Ok(())
//! # }
//! ```

/// Data blocks exchanged in DATA packets.
pub mod block;
/// Column codecs for every supported type.
pub mod column;
/// LZ4/LZ4HC/ZSTD block compression and the checksummed frame layout.
pub mod compression;
/// The connection: handshake, packet dispatcher, query lifecycle.
pub mod connection;
/// DSN parsing (`clickhouse://`, `clickhouses://`).
pub mod dsn;
/// Error types and the crate-wide `Result` alias.
pub mod error;
/// Query parameter escaping and substitution.
pub mod escape;
/// Framed I/O: buffered streams, compressed streams, the block codec.
pub mod io;
/// Connection configuration.
pub mod options;
/// The bounded connection pool.
pub mod pool;
/// Protocol constants: packet tags and revision gates.
pub mod protocol;
/// Query-scoped records: server info, progress, profile, exceptions.
pub mod query;
/// Buffered results and streaming row iteration.
pub mod result;
/// Query settings serialization.
pub mod settings;
/// Dynamic cell values.
pub mod value;

/// The type-specification parser and type tree.
pub mod types;

/// TLS support (requires the `tls` feature).
#[cfg(feature = "tls")]
pub mod ssl;

pub use block::{Block, BlockInfo};
pub use compression::CompressionMethod;
pub use connection::{Connection, ConnectionStatus, ExecuteOptions};
pub use dsn::parse_dsn;
pub use error::{Error, Result, ServerException};
pub use options::{ConnectionOptions, TlsVersion};
pub use pool::{Pool, PooledConnection, PoolStatus};
pub use query::{ExternalTable, Progress, ProfileInfo, QueryInfo, ServerInfo, TracingContext};
pub use result::{QueryResult, RowStream};
pub use value::{Int256, UInt256, Value};
