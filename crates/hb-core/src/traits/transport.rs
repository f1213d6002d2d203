//! Transport traits

use hb_protocol::{ConnectionSettings, Requester, ScriptRequest, ServerHandleId};

/// Background worker carrying one server connection.
///
/// All outcomes (state changes, script results) are reported asynchronously
/// as `Inbound::Transport` messages through the requester the worker was
/// started with. None of these methods block.
pub trait Transport: Send {
    /// Start the connection attempt
    fn connect(&mut self);

    /// Run a shell script on this connection
    fn execute(&mut self, request: ScriptRequest);

    /// Stop the worker and release the connection
    fn shutdown(&mut self);
}

/// Starts transport workers for new server handles
pub trait TransportFactory: Send + Sync {
    /// Start a worker for `handle`, connected to the address in `settings`.
    ///
    /// The worker must not attempt a connection before `Transport::connect`.
    fn start(
        &self,
        handle: ServerHandleId,
        settings: &ConnectionSettings,
        requester: Requester,
    ) -> Box<dyn Transport>;
}
