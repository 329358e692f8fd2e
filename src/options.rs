//! Connection configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::compression::CompressionMethod;
use crate::protocol::{DEFAULT_PORT, DEFAULT_SECURE_PORT};

/// Minimum TLS protocol version for secure connections. There is no
/// pre-1.2 option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// Accept TLS 1.2 and 1.3 (the default).
    #[default]
    Tls12,
    /// Require TLS 1.3.
    Tls13,
}

/// Default number of rows per INSERT block.
pub const DEFAULT_INSERT_BLOCK_SIZE: usize = 1_048_576;
/// Default chunk size for the compressed outer stream.
pub const DEFAULT_COMPRESS_BLOCK_SIZE: usize = 1_048_576;

/// Immutable connection configuration.
///
/// Build with the struct-update or builder-method style, or parse from a
/// DSN with [`crate::dsn::parse_dsn`].
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Primary host.
    pub host: String,
    /// Primary port; `None` picks the default for the transport.
    pub port: Option<u16>,
    /// Alternate `(host, port)` pairs tried in order after the primary.
    pub alt_hosts: Vec<(String, Option<u16>)>,
    /// Database to use after the handshake.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
    /// Client name suffix reported to the server.
    pub client_name: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Timeout applied to each send/receive during a query.
    pub send_receive_timeout: Duration,
    /// Timeout for short sync requests (ping).
    pub sync_request_timeout: Duration,
    /// Block compression; `None` disables it.
    pub compression: Option<CompressionMethod>,
    /// Chunk size for writing the compressed outer stream.
    pub compress_block_size: usize,
    /// Wrap the transport in TLS.
    pub secure: bool,
    /// Verify the server certificate (TLS only).
    pub verify: bool,
    /// Minimum TLS protocol version.
    pub tls_version: TlsVersion,
    /// CA certificate bundle path; system roots when absent.
    pub ca_certs: Option<PathBuf>,
    /// OpenSSL-style cipher list preference. rustls chooses its own
    /// ciphers; the field is accepted for DSN compatibility and ignored.
    pub ciphers: Option<String>,
    /// Server settings forwarded with every query.
    pub settings: HashMap<String, String>,
    /// Send server exception stack traces through to the caller.
    pub stack_trace: bool,
    /// Mark forwarded settings as important (strict on unknown names).
    pub settings_is_important: bool,

    // Client-side behaviour settings.
    /// Rows per INSERT block.
    pub insert_block_size: usize,
    /// Yield string cells as raw bytes.
    pub strings_as_bytes: bool,
    /// Encoding of string cells. Only UTF-8 is implemented; other values
    /// imply `strings_as_bytes`.
    pub strings_encoding: String,
    /// W3C `traceparent` header propagated in ClientInfo.
    pub opentelemetry_traceparent: Option<String>,
    /// W3C `tracestate` header propagated alongside.
    pub opentelemetry_tracestate: String,
    /// Quota key reported in ClientInfo.
    pub quota_key: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            host: "127.0.0.1".into(),
            port: None,
            alt_hosts: Vec::new(),
            database: "default".into(),
            user: "default".into(),
            password: String::new(),
            client_name: None,
            connect_timeout: Duration::from_secs(10),
            send_receive_timeout: Duration::from_secs(300),
            sync_request_timeout: Duration::from_secs(5),
            compression: None,
            compress_block_size: DEFAULT_COMPRESS_BLOCK_SIZE,
            secure: false,
            verify: true,
            tls_version: TlsVersion::default(),
            ca_certs: None,
            ciphers: None,
            settings: HashMap::new(),
            stack_trace: false,
            settings_is_important: false,
            insert_block_size: DEFAULT_INSERT_BLOCK_SIZE,
            strings_as_bytes: false,
            strings_encoding: "utf-8".into(),
            opentelemetry_traceparent: None,
            opentelemetry_tracestate: String::new(),
            quota_key: String::new(),
        }
    }
}

impl ConnectionOptions {
    /// Options for `host:port` with everything else at defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectionOptions { host: host.into(), port: Some(port), ..Default::default() }
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Enable block compression.
    pub fn compression(mut self, method: CompressionMethod) -> Self {
        self.compression = Some(method);
        self
    }

    /// Forward a server setting with every query.
    pub fn setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// The port to dial, falling back to the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT })
    }

    /// The full host list: primary first, then alternates, with ports
    /// resolved against the transport default.
    pub fn host_list(&self) -> Vec<(String, u16)> {
        let default_port =
            if self.secure { DEFAULT_SECURE_PORT } else { DEFAULT_PORT };
        let mut hosts = vec![(self.host.clone(), self.effective_port())];
        for (host, port) in &self.alt_hosts {
            hosts.push((host.clone(), port.unwrap_or(default_port)));
        }
        hosts
    }

    /// Whether string columns should surface raw bytes.
    pub fn effective_strings_as_bytes(&self) -> bool {
        self.strings_as_bytes || !self.strings_encoding.eq_ignore_ascii_case("utf-8")
    }
}
