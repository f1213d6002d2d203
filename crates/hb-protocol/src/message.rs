//! Message types exchanged through the event bus
//!
//! Three families of messages exist:
//!
//! - [`Event`]: broadcast to every subscriber (UI layers, loggers). These are
//!   serializable so they can be forwarded over IPC as JSON.
//! - [`TunnelRequest`]: directed at one tunnel worker.
//! - [`Inbound`]: directed at the orchestrator by its workers (tunnel
//!   responses, transport state changes, log records).
//!
//! # Tunnel Flow
//!
//! 1. Orchestrator sends `EstablishTunnelRequest` to a dedicated worker
//! 2. Worker replies `EstablishTunnelResponse` (local port or error)
//! 3. Orchestrator opens the server through the local port and sends
//!    `ListenTunnelRequest` to the same worker
//! 4. Worker replies `ListenTunnelResponse` when the tunnel stops forwarding

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::handle::{ServerHandleId, ShellId};
use crate::settings::ConnectionSettings;

/// Reply address of the orchestrator
pub type Requester = mpsc::UnboundedSender<Inbound>;

/// Kind of connection being opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// User-initiated connection, visible in the UI
    Primary,
    /// Internal connection backing a shell
    Secondary,
    /// Validation-only connection
    Test,
}

impl ConnectionType {
    /// Whether opening this connection may prompt the user for credentials
    pub fn may_prompt(&self) -> bool {
        matches!(self, Self::Primary | Self::Test)
    }

    /// Whether this connection is routed through its own tunnel
    pub fn may_tunnel(&self) -> bool {
        !matches!(self, Self::Secondary)
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Primary => write!(f, "primary"),
            ConnectionType::Secondary => write!(f, "secondary"),
            ConnectionType::Test => write!(f, "test"),
        }
    }
}

/// Connection state of a server handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Handle created, transport not asked to connect yet
    #[default]
    NotConnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected to the server
    Connected,
    /// Connection attempt failed or the connection was lost
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::NotConnected => write!(f, "not connected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a connection failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The SSH tunnel could not be set up
    SshConnection,
    /// The SSH tunnel failed while forwarding
    SshChannel,
    /// Anything else (transport, database handshake)
    Other,
}

/// Log severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Info => write!(f, "Info"),
            Severity::Debug => write!(f, "Debug"),
        }
    }
}

/// A log record emitted by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Message text
    pub message: String,
    /// Severity
    pub severity: Severity,
    /// Whether the user must be interrupted with this message
    pub inform_user: bool,
}

impl LogEvent {
    /// Create a log record that is only written to the log
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            inform_user: false,
        }
    }

    /// Create a log record that is also shown to the user
    pub fn informing(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            inform_user: true,
        }
    }
}

/// Cursor position inside a shell's script editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub line: i32,
    pub column: i32,
}

impl CursorPosition {
    pub fn new(line: i32, column: i32) -> Self {
        Self { line, column }
    }
}

/// Script payload of a shell session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    /// Script text
    pub script: String,
    /// Execute immediately when the shell opens
    pub execute: bool,
    /// Database the script runs against (empty = connection default)
    pub database: String,
    /// Initial cursor position
    pub cursor: CursorPosition,
    /// Display title of the shell
    pub title: String,
    /// Where the script is saved, if anywhere
    pub save_path: Option<PathBuf>,
}

impl ScriptInfo {
    /// Create a script payload that is not executed on open
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Execute the script when the shell opens.
    pub fn executed(mut self) -> Self {
        self.execute = true;
        self
    }

    /// Set the target database.
    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the display title.
    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the initial cursor position.
    pub fn at(mut self, cursor: CursorPosition) -> Self {
        self.cursor = cursor;
        self
    }

    /// Set the save path.
    pub fn saved_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_path = Some(path.into());
        self
    }
}

/// Request to run a shell's script on its server transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRequest {
    /// Shell the script belongs to
    pub shell: ShellId,
    /// Script text
    pub script: String,
    /// Target database
    pub database: String,
}

/// Address of a running tunnel worker
#[derive(Debug, Clone)]
pub struct TunnelWorkerRef {
    /// Directed delivery of requests to the worker
    pub requests: mpsc::UnboundedSender<TunnelRequest>,
    /// Cancels the worker and whatever tunnel it holds
    pub cancel: CancellationToken,
}

impl TunnelWorkerRef {
    /// Whether the worker task is still accepting requests
    pub fn is_alive(&self) -> bool {
        !self.requests.is_closed() && !self.cancel.is_cancelled()
    }
}

/// Ask a worker to set up a tunnel
#[derive(Debug, Clone)]
pub struct EstablishTunnelRequest {
    /// Where the response goes
    pub requester: Requester,
    /// Handle id the tunnel is for
    pub handle: ServerHandleId,
    /// The worker this request is addressed to
    pub worker: TunnelWorkerRef,
    /// Settings clone owned by the worker
    pub settings: ConnectionSettings,
    /// Connection type of the pending handle
    pub connection_type: ConnectionType,
}

/// Outcome of an establish request
#[derive(Debug, Clone)]
pub struct EstablishTunnelResponse {
    pub handle: ServerHandleId,
    /// The worker's settings clone, used to continue opening the server
    pub settings: ConnectionSettings,
    pub connection_type: ConnectionType,
    /// Local listening port of the tunnel
    pub local_port: u16,
    pub error: Option<String>,
}

impl EstablishTunnelResponse {
    /// Check if the tunnel could not be established
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Ask a worker to start forwarding through its established tunnel
#[derive(Debug, Clone)]
pub struct ListenTunnelRequest {
    pub requester: Requester,
    pub handle: ServerHandleId,
    pub connection_type: ConnectionType,
}

/// Sent when the tunnel stops forwarding
#[derive(Debug, Clone)]
pub struct ListenTunnelResponse {
    pub handle: ServerHandleId,
    pub connection_type: ConnectionType,
    pub error: Option<String>,
}

impl ListenTunnelResponse {
    /// Check if forwarding stopped because of an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Requests understood by a tunnel worker
#[derive(Debug, Clone)]
pub enum TunnelRequest {
    Establish(EstablishTunnelRequest),
    Listen(ListenTunnelRequest),
}

impl TunnelRequest {
    /// Handle id the request concerns
    pub fn handle(&self) -> ServerHandleId {
        match self {
            TunnelRequest::Establish(req) => req.handle,
            TunnelRequest::Listen(req) => req.handle,
        }
    }
}

/// State reports from a server's transport worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection state changed
    StateChanged {
        handle: ServerHandleId,
        state: ConnectionState,
        error: Option<String>,
    },
    /// Replica set topology was rediscovered on this connection
    ReplicaSetRefreshed { handle: ServerHandleId },
    /// A shell's script finished running
    ScriptFinished {
        shell: ShellId,
        error: Option<String>,
    },
}

/// Messages directed at the orchestrator
#[derive(Debug, Clone)]
pub enum Inbound {
    EstablishTunnel(EstablishTunnelResponse),
    ListenTunnel(ListenTunnelResponse),
    Transport(TransportEvent),
    Log(LogEvent),
}

/// Events broadcast to external subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A primary connection is being opened
    Connecting {
        handle: ServerHandleId,
        connection_name: String,
    },

    /// A connection failed
    ConnectionFailed {
        handle: ServerHandleId,
        connection_type: ConnectionType,
        message: String,
        reason: FailureReason,
    },

    /// A shell session was created
    OpeningShell {
        shell: ShellId,
        server: ServerHandleId,
        title: String,
    },

    /// Topology refresh on `source`, forwarded to a dependent shell
    ReplicaSetRefreshed {
        source: ServerHandleId,
        shell: ShellId,
    },

    /// A server handle changed connection state
    ServerStateChanged {
        handle: ServerHandleId,
        connection_type: ConnectionType,
        state: ConnectionState,
    },

    /// A shell's script finished
    ScriptFinished {
        shell: ShellId,
        error: Option<String>,
    },

    /// A server handle was closed
    ServerClosed { handle: ServerHandleId },

    /// A shell session was closed
    ShellClosed { shell: ShellId },
}
