//! Fake collaborators shared by unit tests

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use hb_core::traits::{Transport, TransportFactory, TunnelFactory, UserNotifier};
use hb_protocol::{
    ConnectionSettings, Event, Requester, ScriptRequest, ServerHandleId, Severity,
    TunnelRequest, TunnelWorkerRef,
};

/// Everything published so far
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[derive(Default)]
struct TransportLog {
    started: Vec<(ServerHandleId, String)>,
    connects: Vec<ServerHandleId>,
    scripts: Vec<ScriptRequest>,
    shutdowns: Vec<ServerHandleId>,
}

/// Transport factory recording every call instead of connecting
#[derive(Clone, Default)]
pub struct FakeTransports(Arc<Mutex<TransportLog>>);

impl FakeTransports {
    pub fn started(&self) -> Vec<(ServerHandleId, String)> {
        self.0.lock().unwrap().started.clone()
    }

    pub fn connects(&self) -> Vec<ServerHandleId> {
        self.0.lock().unwrap().connects.clone()
    }

    pub fn scripts(&self) -> Vec<ScriptRequest> {
        self.0.lock().unwrap().scripts.clone()
    }

    pub fn shutdowns(&self) -> Vec<ServerHandleId> {
        self.0.lock().unwrap().shutdowns.clone()
    }
}

impl TransportFactory for FakeTransports {
    fn start(
        &self,
        handle: ServerHandleId,
        settings: &ConnectionSettings,
        _requester: Requester,
    ) -> Box<dyn Transport> {
        self.0
            .lock()
            .unwrap()
            .started
            .push((handle, settings.full_address()));
        Box::new(FakeTransport {
            handle,
            log: Arc::clone(&self.0),
        })
    }
}

struct FakeTransport {
    handle: ServerHandleId,
    log: Arc<Mutex<TransportLog>>,
}

impl Transport for FakeTransport {
    fn connect(&mut self) {
        self.log.lock().unwrap().connects.push(self.handle);
    }

    fn execute(&mut self, request: ScriptRequest) {
        self.log.lock().unwrap().scripts.push(request);
    }

    fn shutdown(&mut self) {
        self.log.lock().unwrap().shutdowns.push(self.handle);
    }
}

struct SpawnedTunnel {
    requests: mpsc::UnboundedReceiver<TunnelRequest>,
    cancel: CancellationToken,
}

/// Tunnel factory keeping the request queue of every worker it "spawns"
#[derive(Clone, Default)]
pub struct FakeTunnels(Arc<Mutex<Vec<SpawnedTunnel>>>);

impl FakeTunnels {
    /// Number of workers spawned
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    /// Take the requests queued for worker `index`
    pub fn requests(&self, index: usize) -> Vec<TunnelRequest> {
        let mut tunnels = self.0.lock().unwrap();
        let mut taken = Vec::new();
        while let Ok(request) = tunnels[index].requests.try_recv() {
            taken.push(request);
        }
        taken
    }

    /// Take the queued establish request of worker `index` and return its settings
    pub fn establish_settings(&self, index: usize) -> ConnectionSettings {
        self.requests(index)
            .into_iter()
            .find_map(|request| match request {
                TunnelRequest::Establish(request) => Some(request.settings),
                TunnelRequest::Listen(_) => None,
            })
            .expect("no establish request queued")
    }

    pub fn cancelled(&self, index: usize) -> bool {
        self.0.lock().unwrap()[index].cancel.is_cancelled()
    }
}

impl TunnelFactory for FakeTunnels {
    fn spawn(&self, _settings: ConnectionSettings) -> TunnelWorkerRef {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        self.0.lock().unwrap().push(SpawnedTunnel {
            requests: request_rx,
            cancel: cancel.clone(),
        });
        TunnelWorkerRef { requests, cancel }
    }
}

/// Notifier remembering every text it was asked to show
#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<(Severity, String)>>);

impl RecordingNotifier {
    pub fn texts(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, severity: Severity, _title: &str, text: &str) {
        self.0.lock().unwrap().push((severity, text.to_string()));
    }
}
