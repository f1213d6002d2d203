//! Server handles

use std::fmt;

use hb_core::traits::{Transport, TransportFactory};
use hb_protocol::{
    ConnectionSettings, ConnectionState, ConnectionType, Requester, ScriptRequest,
    ServerHandleId,
};

/// One live or pending connection to a database server.
///
/// Owns its settings clone and its transport worker. Dropping the handle
/// shuts the worker down, so removing it from the orchestrator's map is
/// enough to release everything it holds.
pub struct ServerHandle {
    id: ServerHandleId,
    settings: ConnectionSettings,
    connection_type: ConnectionType,
    transport: Box<dyn Transport>,
    state: ConnectionState,
}

impl ServerHandle {
    /// Create a handle and start its transport worker
    pub fn start(
        id: ServerHandleId,
        settings: ConnectionSettings,
        connection_type: ConnectionType,
        transports: &dyn TransportFactory,
        requester: Requester,
    ) -> Self {
        let transport = transports.start(id, &settings, requester);
        Self {
            id,
            settings,
            connection_type,
            transport,
            state: ConnectionState::NotConnected,
        }
    }

    /// Ask the transport to connect
    pub fn try_connect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.transport.connect();
    }

    /// Run a script through the transport
    pub fn execute(&mut self, request: ScriptRequest) {
        self.transport.execute(request);
    }

    /// Handle id
    pub fn id(&self) -> ServerHandleId {
        self.id
    }

    /// Connection type
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    /// Effective settings the transport connects with
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Mutable access to the settings, e.g. to change the default database
    pub fn settings_mut(&mut self) -> &mut ConnectionSettings {
        &mut self.settings
    }

    /// Effective `host:port` the transport connects to
    pub fn address(&self) -> String {
        self.settings.full_address()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Record a state reported by the transport
    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        tracing::debug!("Releasing {}", self.id);
        self.transport.shutdown();
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.id)
            .field("connection_type", &self.connection_type)
            .field("address", &self.address())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Counters {
        started: AtomicUsize,
        connects: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct CountingTransport(Arc<Counters>);

    impl Transport for CountingTransport {
        fn connect(&mut self) {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn execute(&mut self, _request: ScriptRequest) {}

        fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingFactory(Arc<Counters>);

    impl TransportFactory for CountingFactory {
        fn start(
            &self,
            _handle: ServerHandleId,
            _settings: &ConnectionSettings,
            _requester: Requester,
        ) -> Box<dyn Transport> {
            self.0.started.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingTransport(Arc::clone(&self.0)))
        }
    }

    #[test]
    fn test_lifecycle_drives_transport() {
        let counters = Arc::new(Counters::default());
        let factory = CountingFactory(Arc::clone(&counters));
        let (requester, _rx) = mpsc::unbounded_channel();

        let mut server = ServerHandle::start(
            ServerHandleId::new(1),
            ConnectionSettings::new("local", "localhost", 27017),
            ConnectionType::Primary,
            &factory,
            requester,
        );
        assert_eq!(server.state(), ConnectionState::NotConnected);
        assert_eq!(counters.started.load(Ordering::SeqCst), 1);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 0);

        server.try_connect();
        assert_eq!(server.state(), ConnectionState::Connecting);
        assert_eq!(counters.connects.load(Ordering::SeqCst), 1);

        drop(server);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_settings_mut_changes_default_database() {
        let counters = Arc::new(Counters::default());
        let factory = CountingFactory(counters);
        let (requester, _rx) = mpsc::unbounded_channel();

        let mut server = ServerHandle::start(
            ServerHandleId::new(3),
            ConnectionSettings::new("local", "localhost", 27017),
            ConnectionType::Secondary,
            &factory,
            requester,
        );
        server.settings_mut().default_database = "inventory".to_string();

        assert_eq!(server.settings().default_database, "inventory");
        assert_eq!(server.address(), "localhost:27017");
    }
}
