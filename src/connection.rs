//! The connection: session state, handshake, packet dispatcher and the
//! query lifecycle of the native protocol.
//!
//! A connection serializes all protocol I/O; it is not meant to be shared
//! between tasks. A new query while the previous result has not been fully
//! drained fails with [`Error::PartiallyConsumedQuery`].

use std::collections::HashMap;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::block::Block;
use crate::column::CodecOptions;
use crate::error::{Error, Result};
use crate::escape::substitute_params;
use crate::io::block::{BlockReader, BlockWriter};
use crate::io::read::{ClickHouseRead, StreamReader};
use crate::io::write::{ClickHouseWrite, StreamWriter};
use crate::options::ConnectionOptions;
use crate::protocol::{
    self, ClientPacket, CompressionState, QueryProcessingStage, ServerPacket,
};
use crate::query::{
    read_exception, ClientInfo, ExternalTable, Progress, ProfileInfo, QueryInfo, ServerInfo,
    TracingContext,
};
use crate::result::{QueryResult, RowStream};
use crate::settings::write_settings;
use crate::value::Value;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Constructed, never opened.
    Created,
    /// Handshake completed; usable.
    Opened,
    /// Closed; reopenable with [`Connection::connect`].
    Closed,
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Named substitution parameters for the query text.
    pub params: Option<HashMap<String, Value>>,
    /// Caller-chosen query id; the server generates one when empty.
    pub query_id: String,
    /// Extra server settings for this query only.
    pub settings: Option<HashMap<String, String>>,
    /// External tables shipped with the query.
    pub external_tables: Vec<ExternalTable>,
    /// Validate values against column preconditions before packing.
    pub types_check: bool,
}

/// One decoded server packet.
#[derive(Debug)]
pub(crate) enum Packet {
    Data(Block),
    Totals(Block),
    Extremes(Block),
    Progress(Progress),
    ProfileInfo(ProfileInfo),
    Log(Block),
    TableColumns(Vec<String>),
    PartUuids(Block),
    ReadTaskRequest(Block),
    ProfileEvents(Block),
    EndOfStream,
    Pong,
}

/// An async session over one native-protocol transport.
pub struct Connection {
    options: ConnectionOptions,
    hosts: Vec<(String, u16)>,
    /// Current database; tracks `USE <db>` so reconnects land in it.
    database: String,
    host: Option<(String, u16)>,
    reader: Option<StreamReader>,
    writer: Option<StreamWriter>,
    server_info: Option<ServerInfo>,
    block_reader: Option<BlockReader>,
    raw_block_reader: Option<BlockReader>,
    block_writer: Option<BlockWriter>,
    is_query_executing: bool,
    opened: Option<bool>,
    closed: Option<bool>,
    last_query: QueryInfo,
}

impl Connection {
    /// A new connection in the CREATED state; nothing is dialed yet.
    pub fn new(options: ConnectionOptions) -> Connection {
        let hosts = options.host_list();
        let database = options.database.clone();
        Connection {
            options,
            hosts,
            database,
            host: None,
            reader: None,
            writer: None,
            server_info: None,
            block_reader: None,
            raw_block_reader: None,
            block_writer: None,
            is_query_executing: false,
            opened: None,
            closed: None,
            last_query: QueryInfo::default(),
        }
    }

    /// The lifecycle state, derived from the `(opened, closed)` pair.
    pub fn status(&self) -> Result<ConnectionStatus> {
        match (self.opened, self.closed) {
            (None, None) => Ok(ConnectionStatus::Created),
            (Some(true), _) => Ok(ConnectionStatus::Opened),
            (_, Some(true)) => Ok(ConnectionStatus::Closed),
            (opened, closed) => Err(Error::Connection(format!(
                "unresolved connection state: opened={opened:?}, closed={closed:?}"
            ))),
        }
    }

    /// Server identity from the handshake, while connected.
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Progress, profile and timing of the last query.
    pub fn last_query_info(&self) -> &QueryInfo {
        &self.last_query
    }

    /// The database new queries run against.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// True while a query's result has not been drained to the end of the
    /// stream. Such a connection must not be handed to another caller.
    pub fn is_query_executing(&self) -> bool {
        self.is_query_executing
    }

    /// `host:port` of the current (or primary) server, for diagnostics.
    pub fn server(&self) -> String {
        let (host, port) = self
            .host
            .clone()
            .unwrap_or_else(|| self.hosts.first().cloned().unwrap_or_default());
        format!("{host}:{port}")
    }

    fn codec_options(&self, types_check: bool) -> CodecOptions {
        CodecOptions {
            strings_as_bytes: self.options.effective_strings_as_bytes(),
            types_check,
        }
    }

    fn server_revision(&self) -> Result<u64> {
        Ok(self.server_info.as_ref().ok_or_else(not_connected)?.revision)
    }

    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            client_name: self.client_name(),
            quota_key: self.options.quota_key.clone(),
            trace_context: TracingContext::from_headers(
                self.options.opentelemetry_traceparent.as_deref(),
                &self.options.opentelemetry_tracestate,
            ),
        }
    }

    fn client_name(&self) -> String {
        match &self.options.client_name {
            Some(suffix) => format!("ClickHouse {suffix}"),
            None => protocol::CLIENT_NAME.to_owned(),
        }
    }

    // ---- lifecycle -------------------------------------------------------

    /// Open the connection: dial, handshake, set up the block codecs.
    /// Idempotent while already open. Walks the host list until one
    /// answers.
    pub async fn connect(&mut self) -> Result<()> {
        if self.status()? == ConnectionStatus::Opened {
            return Ok(());
        }
        debug!(database = %self.database, user = %self.options.user, "connecting");

        let mut last_error = None;
        for (host, port) in self.hosts.clone() {
            match self.init_connection(&host, port).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(host = %host, port, error = %e, "connection attempt failed");
                    self.reset_state();
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Connection("no hosts configured".into())))
    }

    /// Close the transport and reset all session state. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            // The peer may already be gone; closing is best-effort.
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "error while shutting down transport");
            }
        }
        self.reset_state();
        self.opened = Some(false);
        self.closed = Some(true);
        Ok(())
    }

    fn reset_state(&mut self) {
        self.reader = None;
        self.writer = None;
        self.server_info = None;
        self.block_reader = None;
        self.raw_block_reader = None;
        self.block_writer = None;
        self.is_query_executing = false;
        self.host = None;
    }

    async fn init_connection(&mut self, host: &str, port: u16) -> Result<()> {
        let stream =
            tokio::time::timeout(self.options.connect_timeout, TcpStream::connect((host, port)))
                .await
                .map_err(|_| {
                    Error::Connection(format!("timed out connecting to {host}:{port}"))
                })?
                .map_err(|e| Error::Connection(format!("failed to connect to {host}:{port}: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(format!("failed to set TCP_NODELAY: {e}")))?;

        let (read_half, write_half) = self.wrap_transport(host, stream).await?;
        self.reader = Some(StreamReader::new(read_half));
        self.writer = Some(StreamWriter::new(write_half));
        self.host = Some((host.to_owned(), port));

        self.send_hello().await?;
        self.receive_hello().await?;

        let revision = self.server_revision()?;
        self.raw_block_reader = Some(BlockReader::new(revision));
        match self.options.compression {
            Some(method) => {
                self.block_reader = Some(BlockReader::new(revision).with_compression(method));
                self.block_writer = Some(
                    BlockWriter::new(revision)
                        .with_compression(method, self.options.compress_block_size),
                );
            }
            None => {
                self.block_reader = Some(BlockReader::new(revision));
                self.block_writer = Some(BlockWriter::new(revision));
            }
        }

        self.opened = Some(true);
        self.closed = Some(false);
        Ok(())
    }

    #[cfg(feature = "tls")]
    async fn wrap_transport(
        &self,
        host: &str,
        stream: TcpStream,
    ) -> Result<(
        Box<dyn AsyncRead + Unpin + Send + Sync>,
        Box<dyn AsyncWrite + Unpin + Send + Sync>,
    )> {
        if self.options.secure {
            let config = crate::ssl::client_config(&self.options)?;
            let connector = tokio_rustls::TlsConnector::from(config);
            let name = crate::ssl::server_name(host)?;
            let tls = connector
                .connect(name, stream)
                .await
                .map_err(|e| Error::Connection(format!("TLS handshake failed: {e}")))?;
            let (r, w) = tokio::io::split(tls);
            Ok((Box::new(r), Box::new(w)))
        } else {
            let (r, w) = tokio::io::split(stream);
            Ok((Box::new(r), Box::new(w)))
        }
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_transport(
        &self,
        _host: &str,
        stream: TcpStream,
    ) -> Result<(
        Box<dyn AsyncRead + Unpin + Send + Sync>,
        Box<dyn AsyncWrite + Unpin + Send + Sync>,
    )> {
        if self.options.secure {
            return Err(Error::Connection(
                "secure connection requested but the 'tls' feature is not enabled".into(),
            ));
        }
        let (r, w) = tokio::io::split(stream);
        Ok((Box::new(r), Box::new(w)))
    }

    // ---- handshake -------------------------------------------------------

    async fn send_hello(&mut self) -> Result<()> {
        let client_name = self.client_name();
        let database = self.database.clone();
        let writer = self.writer.as_mut().ok_or_else(not_connected)?;
        writer.write_varint(ClientPacket::Hello as u64).await?;
        writer.write_string(&client_name).await?;
        writer.write_varint(protocol::CLIENT_VERSION_MAJOR).await?;
        writer.write_varint(protocol::CLIENT_VERSION_MINOR).await?;
        writer.write_varint(protocol::CLIENT_REVISION).await?;
        writer.write_string(&database).await?;
        writer.write_string(&self.options.user).await?;
        writer.write_string(&self.options.password).await?;
        writer.flush().await
    }

    async fn receive_hello(&mut self) -> Result<()> {
        let stack_trace = self.options.stack_trace;
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        let tag = reader.read_varint().await?;
        match ServerPacket::from_tag(tag) {
            Some(ServerPacket::Hello) => {
                let name = reader.read_string().await?;
                let version_major = reader.read_varint().await?;
                let version_minor = reader.read_varint().await?;
                let revision = reader.read_varint().await?;
                let timezone =
                    if revision >= protocol::DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE {
                        Some(reader.read_string().await?)
                    } else {
                        None
                    };
                let display_name =
                    if revision >= protocol::DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME {
                        reader.read_string().await?
                    } else {
                        String::new()
                    };
                let version_patch =
                    if revision >= protocol::DBMS_MIN_REVISION_WITH_VERSION_PATCH {
                        reader.read_varint().await?
                    } else {
                        revision
                    };

                info!(
                    server = %name,
                    version = %format!("{version_major}.{version_minor}.{version_patch}"),
                    revision,
                    "connected"
                );
                self.server_info = Some(ServerInfo {
                    name,
                    version_major,
                    version_minor,
                    version_patch,
                    revision,
                    timezone,
                    display_name,
                });
                Ok(())
            }
            Some(ServerPacket::Exception) => {
                Err(Error::Server(read_exception(reader, stack_trace).await?))
            }
            _ => {
                let server = self.server();
                self.disconnect().await?;
                Err(Error::UnexpectedPacket {
                    server,
                    expected: "Hello or Exception",
                    got: ServerPacket::name(tag),
                })
            }
        }
    }

    // ---- liveness --------------------------------------------------------

    /// Write a PING and wait for PONG, draining interleaved PROGRESS
    /// packets. Returns `false` on transport failure or timeout without
    /// closing the connection.
    pub async fn ping(&mut self) -> Result<bool> {
        if self.status()? != ConnectionStatus::Opened {
            return Ok(false);
        }
        let timeout = self.options.sync_request_timeout;
        let revision = self.server_revision()?;

        let writer = self.writer.as_mut().ok_or_else(not_connected)?;
        if writer.write_varint(ClientPacket::Ping as u64).await.is_err() {
            return Ok(false);
        }
        if writer.flush().await.is_err() {
            return Ok(false);
        }

        loop {
            let reader = self.reader.as_mut().ok_or_else(not_connected)?;
            let tag = match tokio::time::timeout(timeout, reader.read_varint()).await {
                Ok(Ok(tag)) => tag,
                Ok(Err(Error::Io(_))) | Err(_) => return Ok(false),
                Ok(Err(other)) => return Err(other),
            };
            match ServerPacket::from_tag(tag) {
                Some(ServerPacket::Pong) => return Ok(true),
                Some(ServerPacket::Progress) => {
                    Progress::read(reader, revision).await?;
                }
                _ => {
                    let server = self.server();
                    self.disconnect().await?;
                    return Err(Error::UnexpectedPacket {
                        server,
                        expected: "Pong",
                        got: ServerPacket::name(tag),
                    });
                }
            }
        }
    }

    /// Ask the server to cancel the query currently in flight.
    pub async fn cancel(&mut self) -> Result<()> {
        let writer = self.writer.as_mut().ok_or_else(not_connected)?;
        writer.write_varint(ClientPacket::Cancel as u64).await?;
        writer.flush().await
    }

    /// The driver's database is not transactional.
    pub async fn commit(&mut self) -> Result<()> {
        Err(Error::NotSupported("commit"))
    }

    /// The driver's database is not transactional.
    pub async fn rollback(&mut self) -> Result<()> {
        Err(Error::NotSupported("rollback"))
    }

    // ---- query lifecycle -------------------------------------------------

    /// Execute a query, buffering the whole result.
    pub async fn execute(&mut self, query: &str) -> Result<QueryResult> {
        self.execute_with_options(query, &ExecuteOptions::default()).await
    }

    /// Execute a query with explicit options, buffering the whole result.
    pub async fn execute_with_options(
        &mut self,
        query: &str,
        opts: &ExecuteOptions,
    ) -> Result<QueryResult> {
        self.begin_query().await?;
        let started = Instant::now();
        let outcome = self.run_buffered(query, opts).await;
        self.last_query.elapsed = started.elapsed();
        match outcome {
            Ok(result) => {
                self.track_current_database(query);
                Ok(result)
            }
            Err(e) => Err(self.fail_query(e).await),
        }
    }

    /// Execute a query, streaming rows as blocks arrive.
    pub async fn execute_iter(
        &mut self,
        query: &str,
        opts: &ExecuteOptions,
    ) -> Result<RowStream<'_>> {
        self.begin_query().await?;
        if let Err(e) = self.start_query(query, opts).await {
            return Err(self.fail_query(e).await);
        }
        Ok(RowStream::new(self))
    }

    /// Execute an INSERT, chunking `rows` into blocks of
    /// `insert_block_size`. Returns the number of inserted rows.
    pub async fn insert(&mut self, query: &str, rows: Vec<Vec<Value>>) -> Result<u64> {
        self.insert_with_options(query, rows, &ExecuteOptions::default()).await
    }

    /// [`Connection::insert`] with explicit options.
    pub async fn insert_with_options(
        &mut self,
        query: &str,
        rows: Vec<Vec<Value>>,
        opts: &ExecuteOptions,
    ) -> Result<u64> {
        self.begin_query().await?;
        let started = Instant::now();
        let outcome = self.run_insert(query, rows, opts).await;
        self.last_query.elapsed = started.elapsed();
        match outcome {
            Ok(count) => Ok(count),
            Err(e) => Err(self.fail_query(e).await),
        }
    }

    async fn begin_query(&mut self) -> Result<()> {
        if self.is_query_executing {
            return Err(Error::PartiallyConsumedQuery);
        }
        self.is_query_executing = true;
        match self.force_connect().await {
            Ok(()) => {
                // Reconnecting resets session state, including the guard;
                // this query is now the one in flight.
                self.is_query_executing = true;
                Ok(())
            }
            Err(e) => {
                self.is_query_executing = false;
                Err(e)
            }
        }
    }

    async fn force_connect(&mut self) -> Result<()> {
        if self.status()? != ConnectionStatus::Opened {
            self.connect().await
        } else if !self.ping().await? {
            warn!(server = %self.server(), "connection was closed, reconnecting");
            self.disconnect().await?;
            self.connect().await
        } else {
            Ok(())
        }
    }

    /// Clear the in-flight guard and, for transport-level failures, tear
    /// the connection down; type errors leave it usable.
    async fn fail_query(&mut self, error: Error) -> Error {
        self.is_query_executing = false;
        if matches!(
            error,
            Error::Io(_)
                | Error::Protocol(_)
                | Error::ChecksumMismatch { .. }
                | Error::UnexpectedPacket { .. }
                | Error::UnknownPacket(..)
        ) {
            let _ = self.disconnect().await;
        }
        error
    }

    async fn run_buffered(&mut self, query: &str, opts: &ExecuteOptions) -> Result<QueryResult> {
        self.start_query(query, opts).await?;
        self.receive_result().await
    }

    /// Substitute parameters, send QUERY and the external tables.
    async fn start_query(&mut self, query: &str, opts: &ExecuteOptions) -> Result<()> {
        let text = match &opts.params {
            Some(params) => substitute_params(query, params)?,
            None => query.to_owned(),
        };
        self.last_query = QueryInfo::default();
        debug!(query = %text, query_id = %opts.query_id, "sending query");
        self.send_query(&text, opts).await?;
        self.send_external_tables(&opts.external_tables, opts.types_check).await
    }

    async fn send_query(&mut self, query: &str, opts: &ExecuteOptions) -> Result<()> {
        let revision = self.server_revision()?;
        let client_info = self.client_info();
        let compression = match self.options.compression {
            Some(_) => CompressionState::Enabled,
            None => CompressionState::Disabled,
        };

        let mut settings = self.options.settings.clone();
        if let Some(extra) = &opts.settings {
            settings.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let settings_as_strings =
            revision >= protocol::DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS;
        let settings_is_important = self.options.settings_is_important;

        let writer = self.writer.as_mut().ok_or_else(not_connected)?;
        writer.write_varint(ClientPacket::Query as u64).await?;
        writer.write_string(&opts.query_id).await?;
        if revision >= protocol::DBMS_MIN_REVISION_WITH_CLIENT_INFO {
            client_info.write(writer, revision).await?;
        }
        write_settings(writer, &settings, settings_as_strings, settings_is_important).await?;
        if revision >= protocol::DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET {
            writer.write_string("").await?;
        }
        writer.write_varint(QueryProcessingStage::Complete as u64).await?;
        writer.write_varint(compression as u64).await?;
        writer.write_string(query).await?;
        writer.flush().await
    }

    async fn send_external_tables(
        &mut self,
        tables: &[ExternalTable],
        types_check: bool,
    ) -> Result<()> {
        for table in tables {
            let block = Block::from_rows(table.structure.clone(), table.rows.clone())?;
            self.send_block(&block, &table.name, types_check).await?;
        }
        // Empty block: end of external tables.
        self.send_block(&Block::new(), "", false).await
    }

    /// Write one DATA packet: tag, table name, block.
    pub(crate) async fn send_block(
        &mut self,
        block: &Block,
        table_name: &str,
        types_check: bool,
    ) -> Result<()> {
        let revision = self.server_revision()?;
        let codec_options = self.codec_options(types_check);
        let block_writer = self.block_writer.as_ref().ok_or_else(not_connected)?;
        let writer = self.writer.as_mut().ok_or_else(not_connected)?;

        writer.write_varint(ClientPacket::Data as u64).await?;
        if revision >= protocol::DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES {
            writer.write_string(table_name).await?;
        }
        block_writer.write_block(writer, block, &codec_options).await
    }

    /// Read one DATA packet body. LOG and PROFILE_EVENTS blocks are always
    /// uncompressed and use the raw reader.
    async fn receive_data(&mut self, raw: bool) -> Result<Block> {
        let revision = self.server_revision()?;
        let codec_options = self.codec_options(false);
        let block_reader = if raw {
            self.raw_block_reader.as_ref()
        } else {
            self.block_reader.as_ref()
        }
        .ok_or_else(not_connected)?;
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;

        if revision >= protocol::DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES {
            let _table_name = reader.read_str().await?;
        }
        block_reader.read_block(reader, &codec_options).await
    }

    /// Read and dispatch one server packet.
    pub(crate) async fn receive_packet(&mut self) -> Result<Packet> {
        let revision = self.server_revision()?;
        let stack_trace = self.options.stack_trace;
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;
        let tag = reader.read_varint().await?;

        match ServerPacket::from_tag(tag) {
            Some(ServerPacket::Data) => Ok(Packet::Data(self.receive_data(false).await?)),
            Some(ServerPacket::Totals) => Ok(Packet::Totals(self.receive_data(false).await?)),
            Some(ServerPacket::Extremes) => {
                Ok(Packet::Extremes(self.receive_data(false).await?))
            }
            Some(ServerPacket::Progress) => {
                let progress = Progress::read(reader, revision).await?;
                self.last_query.store_progress(&progress);
                Ok(Packet::Progress(progress))
            }
            Some(ServerPacket::ProfileInfo) => {
                let profile = ProfileInfo::read(reader).await?;
                self.last_query.store_profile(profile);
                Ok(Packet::ProfileInfo(profile))
            }
            Some(ServerPacket::Log) => {
                let block = self.receive_data(true).await?;
                log_block(&block);
                Ok(Packet::Log(block))
            }
            Some(ServerPacket::TableColumns) => {
                let count = ServerPacket::TableColumns.strings_in_message();
                let mut strings = Vec::with_capacity(count);
                for _ in 0..count {
                    strings.push(reader.read_string().await?);
                }
                Ok(Packet::TableColumns(strings))
            }
            Some(ServerPacket::PartUuids) => {
                Ok(Packet::PartUuids(self.receive_data(false).await?))
            }
            Some(ServerPacket::ReadTaskRequest) => {
                Ok(Packet::ReadTaskRequest(self.receive_data(false).await?))
            }
            Some(ServerPacket::ProfileEvents) => {
                Ok(Packet::ProfileEvents(self.receive_data(true).await?))
            }
            Some(ServerPacket::EndOfStream) => {
                self.is_query_executing = false;
                Ok(Packet::EndOfStream)
            }
            Some(ServerPacket::Exception) => {
                let exception = read_exception(reader, stack_trace).await?;
                // The exception terminates the response; the connection
                // stays usable.
                self.is_query_executing = false;
                Err(Error::Server(exception))
            }
            Some(ServerPacket::Pong) | Some(ServerPacket::Hello) => {
                let server = self.server();
                self.disconnect().await?;
                Err(Error::UnexpectedPacket {
                    server,
                    expected: "a response packet",
                    got: ServerPacket::name(tag),
                })
            }
            None => {
                let server = self.server();
                self.disconnect().await?;
                Err(Error::UnknownPacket(tag, server))
            }
        }
    }

    async fn receive_result(&mut self) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        loop {
            match self.receive_packet().await? {
                Packet::Data(block) => result.add_block(block),
                Packet::Totals(block) => result.set_totals(block),
                Packet::Extremes(block) => result.set_extremes(block),
                Packet::TableColumns(strings) => result.set_multistring_message(strings),
                Packet::EndOfStream => return Ok(result),
                // Progress and profile are folded into last_query by the
                // dispatcher; everything else is informational.
                _ => continue,
            }
        }
    }

    async fn run_insert(
        &mut self,
        query: &str,
        rows: Vec<Vec<Value>>,
        opts: &ExecuteOptions,
    ) -> Result<u64> {
        self.start_query(query, opts).await?;

        let sample = self.receive_sample_block().await?;
        let columns = sample.columns_with_types().to_vec();
        let block_size = self.options.insert_block_size.max(1);

        let mut inserted = 0u64;
        for chunk in rows.chunks(block_size) {
            let block = Block::from_rows(columns.clone(), chunk.to_vec())?;
            self.send_block(&block, "", opts.types_check).await?;
            inserted += chunk.len() as u64;
        }
        // Empty block: end of data.
        self.send_block(&Block::new(), "", false).await?;

        loop {
            if matches!(self.receive_packet().await?, Packet::EndOfStream) {
                return Ok(inserted);
            }
        }
    }

    /// Drain packets until the schema-bearing sample block arrives.
    async fn receive_sample_block(&mut self) -> Result<Block> {
        loop {
            match self.receive_packet().await? {
                Packet::Data(block) => return Ok(block),
                Packet::EndOfStream => {
                    let server = self.server();
                    self.disconnect().await?;
                    return Err(Error::UnexpectedPacket {
                        server,
                        expected: "a sample Data block",
                        got: "EndOfStream".into(),
                    });
                }
                _ => continue,
            }
        }
    }

    fn track_current_database(&mut self, query: &str) {
        let trimmed = query.trim().trim_end_matches(';').trim();
        // get(..4) also rejects prefixes that end inside a multi-byte char.
        if trimmed.get(..4).is_some_and(|prefix| prefix.eq_ignore_ascii_case("use ")) {
            let database = trimmed[4..].trim();
            if !database.is_empty() {
                self.database = database.to_owned();
                debug!(database = %self.database, "tracking current database");
            }
        }
    }
}

fn not_connected() -> Error {
    Error::Connection("connection is not opened".into())
}

/// Emit a LOG packet's rows through the process logger.
fn log_block(block: &Block) {
    let index_of = |name: &str| {
        block
            .columns_with_types()
            .iter()
            .position(|(column, _)| column == name)
    };
    let text_of = |row: &[Value], index: Option<usize>| {
        index.map(|i| row[i].to_string()).unwrap_or_default()
    };

    let host = index_of("host_name");
    let thread = index_of("thread_id").or_else(|| index_of("thread_number"));
    let query_id = index_of("query_id");
    let priority = index_of("priority");
    let source = index_of("source");
    let text = index_of("text");

    for row in block.rows() {
        info!(
            host = %text_of(&row, host),
            thread = %text_of(&row, thread),
            query_id = %text_of(&row, query_id),
            priority = %text_of(&row, priority),
            source = %text_of(&row, source),
            "{}",
            text_of(&row, text),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_the_state_pair() {
        let mut conn = Connection::new(ConnectionOptions::default());
        assert_eq!(conn.status().unwrap(), ConnectionStatus::Created);

        conn.opened = Some(true);
        conn.closed = Some(false);
        assert_eq!(conn.status().unwrap(), ConnectionStatus::Opened);

        conn.opened = Some(false);
        conn.closed = Some(true);
        assert_eq!(conn.status().unwrap(), ConnectionStatus::Closed);

        conn.opened = Some(false);
        conn.closed = Some(false);
        assert!(conn.status().is_err());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let mut conn = Connection::new(ConnectionOptions::default());
        conn.disconnect().await.unwrap();
        assert_eq!(conn.status().unwrap(), ConnectionStatus::Closed);
        conn.disconnect().await.unwrap();
        assert_eq!(conn.status().unwrap(), ConnectionStatus::Closed);
    }

    #[test]
    fn use_statements_update_the_database() {
        let mut conn = Connection::new(ConnectionOptions::default());
        conn.track_current_database("USE analytics;");
        assert_eq!(conn.database(), "analytics");
        conn.track_current_database("select 1");
        assert_eq!(conn.database(), "analytics");
        conn.track_current_database("  use  other_db  ");
        assert_eq!(conn.database(), "other_db");
        // A bare USE keeps the previous database.
        conn.track_current_database("use ;");
        assert_eq!(conn.database(), "other_db");
    }

    #[test]
    fn multibyte_queries_do_not_confuse_use_tracking() {
        let mut conn = Connection::new(ConnectionOptions::default());
        // Byte index 4 lands inside the emoji; this must not panic.
        conn.track_current_database("/*😀*/ SELECT 1");
        assert_eq!(conn.database(), "default");
        conn.track_current_database("усе");
        assert_eq!(conn.database(), "default");
    }

    #[tokio::test]
    async fn queries_on_closed_hosts_fail_with_connection_error() {
        // Reserved port with nothing listening; connection must fail fast.
        let options = ConnectionOptions {
            host: "127.0.0.1".into(),
            port: Some(1),
            connect_timeout: std::time::Duration::from_millis(200),
            ..Default::default()
        };
        let mut conn = Connection::new(options);
        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {err}");
        // The guard is released on failure.
        let err = conn.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)), "got {err}");
    }
}
