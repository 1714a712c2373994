//! Configuration data model

use std::path::PathBuf;

/// Reply deadline the display-management service contract allows per call
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 1000;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub client: ClientSection,
    pub logging: LoggingConfig,
}

/// Transport and connection settings for the client runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSection {
    /// Which backend carries calls and notifications
    pub transport: TransportKind,
    /// Shared or private bus connection (D-Bus backend only)
    pub connection: ConnectionMode,
    /// Service socket for the socket backend; `None` means the default location
    pub socket_path: Option<PathBuf>,
    /// How long a call waits for its reply
    pub reply_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            connection: ConnectionMode::default(),
            socket_path: None,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Verbose wire-level logging of calls, replies and notifications
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

/// Transport backend selected at construction time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportKind {
    /// System message bus (`org.eom.server`)
    #[default]
    Dbus,
    /// Newline-delimited JSON over a Unix domain socket
    Socket,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dbus" | "d-bus" => Ok(Self::Dbus),
            "socket" | "unix" => Ok(Self::Socket),
            _ => Err(format!("Unknown transport: {}", s)),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dbus => f.write_str("dbus"),
            Self::Socket => f.write_str("socket"),
        }
    }
}

/// Whether the bus connection is shared with the rest of the process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    #[default]
    Shared,
    Private,
}

impl std::str::FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "private" => Ok(Self::Private),
            _ => Err(format!("Unknown connection mode: {}", s)),
        }
    }
}
