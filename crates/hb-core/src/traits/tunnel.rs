//! Tunnel traits

use hb_protocol::{ConnectionSettings, TunnelWorkerRef};

/// Spawns dedicated tunnel workers.
///
/// Each worker serves exactly one pending connection: one establish request
/// followed by at most one listen request.
pub trait TunnelFactory: Send + Sync {
    /// Spawn a worker owning `settings` and return its address
    fn spawn(&self, settings: ConnectionSettings) -> TunnelWorkerRef;
}
