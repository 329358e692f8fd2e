//! Protocol constants: packet tags, processing stages and the revision
//! thresholds that gate optional wire fields.

/// Packets sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ClientPacket {
    /// Handshake with client name, version and credentials.
    Hello = 0,
    /// Query with id, client info, settings, stage, compression and text.
    Query = 1,
    /// Data block (INSERT data or external table), may be compressed.
    Data = 2,
    /// Cancel the query currently running on this connection.
    Cancel = 3,
    /// Liveness check; the server answers with Pong.
    Ping = 4,
}

/// Packets received from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum ServerPacket {
    /// Handshake response with server name, version and revision.
    Hello = 0,
    /// Block of data, may be compressed.
    Data = 1,
    /// Exception raised during query execution.
    Exception = 2,
    /// Query progress: rows and bytes read so far.
    Progress = 3,
    /// Response to a client Ping.
    Pong = 4,
    /// All packets for the current request have been sent.
    EndOfStream = 5,
    /// Profiling data for the query.
    ProfileInfo = 6,
    /// Block of totals, may be compressed.
    Totals = 7,
    /// Block of extremes (minimums and maximums), may be compressed.
    Extremes = 8,
    /// Query execution log rows (always uncompressed).
    Log = 10,
    /// Column descriptions for default value calculation.
    TableColumns = 11,
    /// List of unique part UUIDs.
    PartUuids = 14,
    /// Request for the next distributed read task.
    ReadTaskRequest = 15,
    /// Server profile event counters (always uncompressed).
    ProfileEvents = 16,
}

impl ServerPacket {
    /// Decode a varint tag into a known server packet, if any.
    pub fn from_tag(tag: u64) -> Option<ServerPacket> {
        match tag {
            0 => Some(ServerPacket::Hello),
            1 => Some(ServerPacket::Data),
            2 => Some(ServerPacket::Exception),
            3 => Some(ServerPacket::Progress),
            4 => Some(ServerPacket::Pong),
            5 => Some(ServerPacket::EndOfStream),
            6 => Some(ServerPacket::ProfileInfo),
            7 => Some(ServerPacket::Totals),
            8 => Some(ServerPacket::Extremes),
            10 => Some(ServerPacket::Log),
            11 => Some(ServerPacket::TableColumns),
            14 => Some(ServerPacket::PartUuids),
            15 => Some(ServerPacket::ReadTaskRequest),
            16 => Some(ServerPacket::ProfileEvents),
            _ => None,
        }
    }

    /// Human-readable tag name for error messages.
    pub fn name(tag: u64) -> String {
        match ServerPacket::from_tag(tag) {
            Some(packet) => format!("{packet:?}"),
            None => format!("Unknown({tag})"),
        }
    }

    /// Number of strings carried by a multi-string message packet.
    pub fn strings_in_message(self) -> usize {
        match self {
            ServerPacket::TableColumns => 2,
            _ => 0,
        }
    }
}

/// Whether the server should expect compressed data blocks on this
/// connection. Written as a varint in the QUERY packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum CompressionState {
    /// Blocks travel uncompressed.
    Disabled = 0,
    /// Blocks travel inside compressed frames.
    Enabled = 1,
}

/// Stage until which a SELECT query is processed. Only `Complete` is sent by
/// this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum QueryProcessingStage {
    /// Fully process the query and return the final result.
    Complete = 2,
}

/// Kind of query as reported in ClientInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueryKind {
    /// A query initiated directly by this client.
    Initial = 1,
}

/// Interface over which the query arrives, as reported in ClientInfo.
pub const INTERFACE_TCP: u8 = 1;

/// Name this driver reports in the handshake and in ClientInfo.
pub const CLIENT_NAME: &str = "ClickHouse clickhouse-async";

/// Client version triple reported to the server.
pub const CLIENT_VERSION_MAJOR: u64 = 1;
/// Minor component of the reported client version.
pub const CLIENT_VERSION_MINOR: u64 = 1;
/// Patch component of the reported client version.
pub const CLIENT_VERSION_PATCH: u64 = 0;

/// Newest wire protocol revision this driver speaks. The server caps the
/// connection at this revision, so optional fields introduced later are
/// never exchanged; gates below it may test the server revision directly.
pub const CLIENT_REVISION: u64 = 54453;

/// Default native protocol port.
pub const DEFAULT_PORT: u16 = 9000;
/// Default native protocol port over TLS.
pub const DEFAULT_SECURE_PORT: u16 = 9440;

// Revision thresholds. Each constant names the revision that introduced the
// corresponding optional field or layout change.
pub const DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES: u64 = 50264;
pub const DBMS_MIN_REVISION_WITH_TOTAL_ROWS_IN_PROGRESS: u64 = 51554;
pub const DBMS_MIN_REVISION_WITH_BLOCK_INFO: u64 = 51903;
pub const DBMS_MIN_REVISION_WITH_CLIENT_INFO: u64 = 54032;
pub const DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE: u64 = 54058;
pub const DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
pub const DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54372;
pub const DBMS_MIN_REVISION_WITH_VERSION_PATCH: u64 = 54401;
pub const DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54405;
pub const DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS: u64 = 54429;
pub const DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET: u64 = 54441;
pub const DBMS_MIN_REVISION_WITH_OPENTELEMETRY: u64 = 54442;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_DISTRIBUTED_DEPTH: u64 = 54448;
pub const DBMS_MIN_PROTOCOL_VERSION_WITH_INITIAL_QUERY_START_TIME: u64 = 54449;
pub const DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS: u64 = 54453;
