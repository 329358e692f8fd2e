//! Error types for the driver.
//!
//! All fallible operations in this crate return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`.

use thiserror::Error;

/// A structured exception received from the ClickHouse server.
///
/// Server exceptions form a chain: the outermost exception may carry a
/// `nested` cause, which may itself be nested.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("server exception, code {code}: {message}")]
pub struct ServerException {
    /// ClickHouse error code (e.g. 60 for UNKNOWN_TABLE).
    pub code: i32,
    /// Exception class name, usually `DB::Exception`.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Server-side stack trace. Empty unless the connection was configured
    /// to surface stack traces.
    pub stack_trace: String,
    /// The nested cause, if the server sent one.
    pub nested: Option<Box<ServerException>>,
}

/// Errors that can occur while using the driver.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O failure or EOF on the underlying TCP or TLS transport.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The server sent a packet outside the expected set for the current
    /// dispatcher state. The connection is force-closed.
    #[error("unexpected packet from server {server}: expected {expected}, got {got}")]
    UnexpectedPacket {
        /// `host:port` of the offending server.
        server: String,
        /// What the dispatcher was prepared to handle.
        expected: &'static str,
        /// What actually arrived.
        got: String,
    },

    /// The server sent a packet tag outside the known tag set.
    #[error("unknown packet {0} from server {1}")]
    UnknownPacket(u64, String),

    /// CityHash128 over a compressed frame did not match the embedded hash.
    #[error("checksum mismatch for compressed frame: expected {expected:#034x}, computed {actual:#034x}")]
    ChecksumMismatch {
        /// Hash embedded in the frame.
        expected: u128,
        /// Hash recomputed over the received bytes.
        actual: u128,
    },

    /// A type-specification string did not resolve to any known column type.
    #[error("unknown type: {0}")]
    UnknownType(String),

    /// A compression method name or method byte outside the supported set.
    #[error("unknown compression method: {0}")]
    UnknownCompressionMethod(String),

    /// A user-supplied value does not fit the column it is written to.
    #[error("type mismatch in VALUES section: expected {expected}, got {got} for column \"{column}\"")]
    TypeMismatch {
        /// The column's type specification.
        expected: String,
        /// A description of the offending value.
        got: String,
        /// Name of the column being written.
        column: String,
    },

    /// A value failed to pack into its fixed-width wire representation.
    /// Repeat the query with `types_check` enabled for detailed checking.
    #[error("error packing value: {0}")]
    StructPack(String),

    /// A value failed a types-check precondition for its column.
    #[error("column type mismatch: {0}")]
    ColumnTypeMismatch(String),

    /// A domain value (IPv4/IPv6) could not be parsed from its input form.
    #[error("cannot parse domain value '{0}'")]
    CannotParseDomain(String),

    /// A UUID could not be parsed from its input form.
    #[error("cannot parse uuid '{0}'")]
    CannotParseUuid(String),

    /// The server raised an exception while executing a query.
    #[error(transparent)]
    Server(#[from] ServerException),

    /// A query was issued while the previous result had not been fully
    /// drained.
    #[error("the previous query result was not fully consumed")]
    PartiallyConsumedQuery,

    /// A pool invariant was violated.
    #[error("pool error: {0}")]
    Pool(String),

    /// The connection is not in a usable state and could not be restored.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation is not supported by ClickHouse (e.g. transactions).
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// Malformed data on the wire that does not fit any other category.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A malformed DSN string.
    #[error("malformed DSN: {0}")]
    Dsn(String),
}

/// A type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_exception_chain_display() {
        let inner = ServerException {
            code: 60,
            name: "DB::Exception".into(),
            message: "Table test.t does not exist".into(),
            stack_trace: String::new(),
            nested: None,
        };
        let outer = ServerException {
            code: 1000,
            name: "DB::Exception".into(),
            message: "while processing query".into(),
            stack_trace: String::new(),
            nested: Some(Box::new(inner)),
        };
        let err = Error::from(outer);
        assert!(err.to_string().contains("code 1000"));
        match err {
            Error::Server(e) => assert_eq!(e.nested.unwrap().code, 60),
            other => panic!("unexpected error: {other}"),
        }
    }
}
