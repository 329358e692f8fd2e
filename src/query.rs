//! Query-scoped protocol records: server identity, client identity,
//! progress and profile counters, server exceptions and external tables.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{Result, ServerException};
use crate::io::read::ClickHouseRead;
use crate::io::write::ClickHouseWrite;
use crate::protocol::{
    self, QueryKind, CLIENT_VERSION_MAJOR, CLIENT_VERSION_MINOR, CLIENT_VERSION_PATCH,
    INTERFACE_TCP,
};
use crate::value::Value;

/// What the server told us about itself during the handshake.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    /// Server name, `ClickHouse` for the reference implementation.
    pub name: String,
    /// Major version.
    pub version_major: u64,
    /// Minor version.
    pub version_minor: u64,
    /// Patch version; only sent by revisions that carry it.
    pub version_patch: u64,
    /// Wire protocol revision; gates every optional field thereafter.
    pub revision: u64,
    /// Server timezone name, when sent.
    pub timezone: Option<String>,
    /// Display name shown in clients, when sent.
    pub display_name: String,
}

impl ServerInfo {
    /// `(major, minor, patch)`.
    pub fn version_tuple(&self) -> (u64, u64, u64) {
        (self.version_major, self.version_minor, self.version_patch)
    }
}

/// W3C trace context forwarded to the server inside ClientInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracingContext {
    /// 128-bit trace id.
    pub trace_id: u128,
    /// 64-bit span id.
    pub span_id: u64,
    /// The `tracestate` header value, verbatim.
    pub tracestate: String,
    /// Trace flags byte.
    pub trace_flags: u8,
}

impl TracingContext {
    /// Parse a `traceparent` header (`00-<trace>-<span>-<flags>`), keeping
    /// `tracestate` alongside. Returns `None` for absent or malformed
    /// input.
    pub fn from_headers(traceparent: Option<&str>, tracestate: &str) -> Option<TracingContext> {
        let header = traceparent?;
        let mut parts = header.split('-');
        let _version = parts.next()?;
        let trace_id = u128::from_str_radix(parts.next()?, 16).ok()?;
        let span_id = u64::from_str_radix(parts.next()?, 16).ok()?;
        let trace_flags = u8::from_str_radix(parts.next()?, 16).ok()?;
        if parts.next().is_some() || trace_id == 0 {
            return None;
        }
        Some(TracingContext {
            trace_id,
            span_id,
            tracestate: tracestate.to_owned(),
            trace_flags,
        })
    }
}

/// The client identity sub-record of a QUERY packet.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    /// Client name, matching the one sent in the handshake.
    pub client_name: String,
    /// Quota key from client settings.
    pub quota_key: String,
    /// Optional trace context from client settings.
    pub trace_context: Option<TracingContext>,
}

impl ClientInfo {
    /// Serialize for a server at `server_revision`. Field presence is
    /// gated by the revision thresholds the server announced.
    pub async fn write(
        &self,
        output: &mut (dyn ClickHouseWrite + '_),
        server_revision: u64,
    ) -> Result<()> {
        output.write_u8(QueryKind::Initial as u8).await?;

        output.write_string("").await?; // initial_user
        output.write_string("").await?; // initial_query_id
        output.write_string("0.0.0.0:0").await?; // initial_address
        if server_revision >= protocol::DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME {
            output.write_u64(0).await?;
        }
        output.write_u8(INTERFACE_TCP).await?;

        output.write_string(&os_user()).await?;
        output.write_string(&hostname()).await?;
        output.write_string(&self.client_name).await?;
        output.write_varint(CLIENT_VERSION_MAJOR).await?;
        output.write_varint(CLIENT_VERSION_MINOR).await?;
        output.write_varint(protocol::CLIENT_REVISION).await?;

        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            output.write_string(&self.quota_key).await?;
        }
        if server_revision >= protocol::DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH {
            output.write_varint(0).await?;
        }
        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            output.write_varint(CLIENT_VERSION_PATCH).await?;
        }
        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_OPENTELEMETRY {
            match &self.trace_context {
                Some(ctx) => {
                    output.write_u8(1).await?;
                    output.write_u128_pair(ctx.trace_id).await?;
                    output.write_u64(ctx.span_id).await?;
                    output.write_string(&ctx.tracestate).await?;
                    output.write_u8(ctx.trace_flags).await?;
                }
                None => output.write_u8(0).await?,
            }
        }
        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS {
            output.write_varint(0).await?; // collaborate_with_initiator
            output.write_varint(0).await?; // count_participating_replicas
            output.write_varint(0).await?; // number_of_current_replica
        }
        Ok(())
    }
}

fn os_user() -> String {
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_default()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname").ok().map(|s| s.trim().to_owned())
        })
        .unwrap_or_default()
}

/// Aggregate progress counters for a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Rows read so far.
    pub rows: u64,
    /// Bytes read so far.
    pub bytes: u64,
    /// Server's estimate of total rows to read.
    pub total_rows: u64,
    /// Rows written so far (INSERT/materialized paths).
    pub written_rows: u64,
    /// Bytes written so far.
    pub written_bytes: u64,
}

impl Progress {
    /// Decode one PROGRESS packet body.
    pub async fn read(
        input: &mut (dyn ClickHouseRead + '_),
        server_revision: u64,
    ) -> Result<Progress> {
        let mut progress = Progress {
            rows: input.read_varint().await?,
            bytes: input.read_varint().await?,
            ..Progress::default()
        };
        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_TOTAL_ROWS_IN_PROGRESS {
            progress.total_rows = input.read_varint().await?;
        }
        if server_revision >= protocol::DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO {
            progress.written_rows = input.read_varint().await?;
            progress.written_bytes = input.read_varint().await?;
        }
        Ok(progress)
    }

    /// Fold another packet's counters into this accumulator.
    pub fn increment(&mut self, other: &Progress) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.total_rows += other.total_rows;
        self.written_rows += other.written_rows;
        self.written_bytes += other.written_bytes;
    }
}

/// Stream profiling counters sent once per query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    /// Rows in the result.
    pub rows: u64,
    /// Blocks in the result.
    pub blocks: u64,
    /// Bytes in the result.
    pub bytes: u64,
    /// Whether a LIMIT was applied.
    pub applied_limit: bool,
    /// Row count before the LIMIT.
    pub rows_before_limit: u64,
    /// Whether `rows_before_limit` was actually computed.
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    /// Decode one PROFILE_INFO packet body.
    pub async fn read(input: &mut (dyn ClickHouseRead + '_)) -> Result<ProfileInfo> {
        Ok(ProfileInfo {
            rows: input.read_varint().await?,
            blocks: input.read_varint().await?,
            bytes: input.read_varint().await?,
            applied_limit: input.read_u8().await? != 0,
            rows_before_limit: input.read_varint().await?,
            calculated_rows_before_limit: input.read_u8().await? != 0,
        })
    }
}

/// Decode an EXCEPTION packet body into the exception chain.
pub fn read_exception<'a, 'b: 'a>(
    input: &'a mut (dyn ClickHouseRead + 'b),
    include_stack_trace: bool,
) -> Pin<Box<dyn Future<Output = Result<ServerException>> + Send + 'a>> {
    Box::pin(async move {
        let code = input.read_i32().await?;
        let name = input.read_string().await?;
        let message = input.read_string().await?;
        let stack_trace = input.read_string().await?;
        let has_nested = input.read_u8().await? != 0;
        let nested = if has_nested {
            Some(Box::new(read_exception(input, include_stack_trace).await?))
        } else {
            None
        };
        Ok(ServerException {
            code,
            name,
            message,
            stack_trace: if include_stack_trace { stack_trace } else { String::new() },
            nested,
        })
    })
}

/// An ad-hoc in-memory table shipped with one query.
#[derive(Debug, Clone)]
pub struct ExternalTable {
    /// Name the query refers to it by.
    pub name: String,
    /// Column descriptors: name and type specification.
    pub structure: Vec<(String, String)>,
    /// Row-oriented data.
    pub rows: Vec<Vec<Value>>,
}

/// Everything accumulated about the last query on a connection.
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    /// Profile snapshot, when the server sent one.
    pub profile_info: Option<ProfileInfo>,
    /// Accumulated progress counters.
    pub progress: Progress,
    /// Wall time between submission and the end of the result.
    pub elapsed: Duration,
}

impl QueryInfo {
    pub(crate) fn store_progress(&mut self, progress: &Progress) {
        self.progress.increment(progress);
    }

    pub(crate) fn store_profile(&mut self, profile: ProfileInfo) {
        self.profile_info = Some(profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read::SliceReader;
    use crate::io::write::VecWriter;

    #[tokio::test]
    async fn progress_gated_by_revision() {
        let mut out = VecWriter::new();
        out.write_varint(5).await.unwrap();
        out.write_varint(100).await.unwrap();
        let mut input = SliceReader::new(out.into_inner());
        // A pre-total_rows revision reads only rows and bytes.
        let progress = Progress::read(&mut input, 51000).await.unwrap();
        assert_eq!(progress, Progress { rows: 5, bytes: 100, ..Progress::default() });
        assert_eq!(input.remaining(), 0);
    }

    #[tokio::test]
    async fn progress_accumulates() {
        let mut total = Progress::default();
        total.increment(&Progress { rows: 1, bytes: 10, ..Progress::default() });
        total.increment(&Progress { rows: 2, bytes: 20, total_rows: 50, ..Progress::default() });
        assert_eq!(total.rows, 3);
        assert_eq!(total.bytes, 30);
        assert_eq!(total.total_rows, 50);
    }

    #[tokio::test]
    async fn exception_chain_decodes() {
        let mut out = VecWriter::new();
        // Outer exception.
        out.write_i32(1000).await.unwrap();
        out.write_string("DB::Exception").await.unwrap();
        out.write_string("outer").await.unwrap();
        out.write_string("trace...").await.unwrap();
        out.write_u8(1).await.unwrap();
        // Nested exception.
        out.write_i32(60).await.unwrap();
        out.write_string("DB::Exception").await.unwrap();
        out.write_string("inner").await.unwrap();
        out.write_string("").await.unwrap();
        out.write_u8(0).await.unwrap();

        let mut input = SliceReader::new(out.into_inner());
        let exception = read_exception(&mut input, false).await.unwrap();
        assert_eq!(exception.code, 1000);
        assert_eq!(exception.stack_trace, "");
        assert_eq!(exception.nested.unwrap().code, 60);
    }

    #[test]
    fn traceparent_parses() {
        let ctx = TracingContext::from_headers(
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"),
            "vendor=1",
        )
        .unwrap();
        assert_eq!(ctx.trace_id, 0x0af7651916cd43dd8448eb211c80319c);
        assert_eq!(ctx.span_id, 0xb7ad6b7169203331);
        assert_eq!(ctx.trace_flags, 1);
        assert_eq!(ctx.tracestate, "vendor=1");

        assert!(TracingContext::from_headers(None, "").is_none());
        assert!(TracingContext::from_headers(Some("junk"), "").is_none());
    }
}
