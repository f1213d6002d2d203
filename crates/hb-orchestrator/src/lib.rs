//! hb-orchestrator: Connection orchestration for Harbor
//!
//! The orchestrator owns every server connection and shell session. Opening
//! a connection either completes synchronously or, when an SSH tunnel is
//! needed, dispatches a request to a tunnel worker and resumes when the
//! worker answers through the event bus.

pub mod bus;
pub mod credentials;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod service;
pub mod shell;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bus::EventBus;
pub use orchestrator::{Orchestrator, PendingTunnel, TunnelPhase};
pub use server::ServerHandle;
pub use service::{OrchestratorHandle, OrchestratorService};
pub use shell::{ShellSession, ShellState};
