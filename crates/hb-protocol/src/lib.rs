//! hb-protocol: Event contracts for the Harbor connection orchestrator
//!
//! This crate defines the messages exchanged between the orchestrator and
//! its background workers (tunnel workers and per-server transports), the
//! events published for external consumers such as a UI layer, and the
//! connection settings those messages carry.

pub mod error;
pub mod handle;
pub mod message;
pub mod settings;

pub use error::ProtocolError;
pub use handle::{ServerHandleId, ShellId};
pub use message::{
    ConnectionState, ConnectionType, CursorPosition, EstablishTunnelRequest,
    EstablishTunnelResponse, Event, FailureReason, Inbound, ListenTunnelRequest,
    ListenTunnelResponse, LogEvent, Requester, ScriptInfo, ScriptRequest, Severity,
    TransportEvent, TunnelRequest, TunnelWorkerRef,
};
pub use settings::{
    ConnectionSettings, ReplicaSetSettings, SshAuthMethod, SshSettings, SslSettings,
};
