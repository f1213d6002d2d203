//! End-to-end orchestrator tests
//!
//! Runs the orchestrator service with the real TCP transport against
//! loopback listeners. Tunnels go through the real tunnel worker with a
//! connector that "tunnels" to the listener directly.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use hb_core::config::{self, HarborConfig};
use hb_core::error::ShellError;
use hb_core::traits::{CredentialPrompt, TunnelFactory, UserNotifier};
use hb_core::{CredentialRequest, HbError};
use hb_orchestrator::transport::TcpTransportFactory;
use hb_orchestrator::{OrchestratorHandle, OrchestratorService};
use hb_protocol::{
    ConnectionSettings, ConnectionState, ConnectionType, Event, FailureReason, Severity,
    SshSettings, TunnelWorkerRef,
};
use hb_tunnel::{Tunnel, TunnelConnector, TunnelError, TunnelWorker};

const WAIT: Duration = Duration::from_secs(5);

/// Connector whose tunnel ends at a local listener
struct LoopbackConnector {
    port: u16,
    fail: bool,
}

struct LoopbackTunnel {
    port: u16,
}

#[async_trait]
impl TunnelConnector for LoopbackConnector {
    type Tunnel = LoopbackTunnel;

    async fn establish(
        &mut self,
        _settings: &ConnectionSettings,
    ) -> Result<LoopbackTunnel, TunnelError> {
        if self.fail {
            return Err(TunnelError::AuthRejected);
        }
        Ok(LoopbackTunnel { port: self.port })
    }
}

#[async_trait]
impl Tunnel for LoopbackTunnel {
    fn local_port(&self) -> u16 {
        self.port
    }

    async fn listen(&mut self, cancel: CancellationToken) -> Result<(), TunnelError> {
        cancel.cancelled().await;
        Ok(())
    }
}

struct LoopbackTunnels {
    port: u16,
    fail: bool,
}

impl TunnelFactory for LoopbackTunnels {
    fn spawn(&self, settings: ConnectionSettings) -> TunnelWorkerRef {
        TunnelWorker::spawn(
            LoopbackConnector {
                port: self.port,
                fail: self.fail,
            },
            &settings,
        )
    }
}

struct NoPrompt;

#[async_trait]
impl CredentialPrompt for NoPrompt {
    async fn prompt_secret(&self, _request: &CredentialRequest) -> Option<String> {
        None
    }
}

struct Silent;

impl UserNotifier for Silent {
    fn notify(&self, _severity: Severity, _title: &str, _text: &str) {}
}

fn start(tunnels: LoopbackTunnels) -> (OrchestratorHandle, CancellationToken) {
    let config = HarborConfig::default();
    let shutdown = CancellationToken::new();
    let (service, handle) = OrchestratorService::new(
        &config,
        Arc::new(TcpTransportFactory::new(&config.transport)),
        Arc::new(tunnels),
        Arc::new(NoPrompt),
        Arc::new(Silent),
        shutdown.clone(),
    );
    tokio::spawn(service.run());
    (handle, shutdown)
}

/// Wait for the first event matching `pred`
async fn wait_for<F>(events: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn is_connected(event: &Event) -> bool {
    matches!(
        event,
        Event::ServerStateChanged {
            state: ConnectionState::Connected,
            ..
        }
    )
}

fn tunnelled(port: u16) -> ConnectionSettings {
    ConnectionSettings::new("prod", "db.internal", port)
        .with_ssh(SshSettings::new("bastion", "deploy"))
}

#[tokio::test]
async fn test_direct_connection_reaches_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (handle, shutdown) = start(LoopbackTunnels { port, fail: false });
    let mut events = handle.subscribe();

    let settings = ConnectionSettings::new("local", "127.0.0.1", port);
    assert!(handle
        .open_connection(&settings, ConnectionType::Primary)
        .await
        .unwrap());

    let (_socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    match wait_for(&mut events, |_| true).await {
        Event::Connecting {
            connection_name, ..
        } => assert_eq!(connection_name, "local"),
        other => panic!("unexpected event: {:?}", other),
    }
    wait_for(&mut events, is_connected).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.server_count, 1);
    assert_eq!(status.pending_tunnels, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_tunnelled_connection_goes_through_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (handle, shutdown) = start(LoopbackTunnels { port, fail: false });
    let mut events = handle.subscribe();

    // The server address itself is unreachable; only the tunnel leads to the listener
    assert!(handle
        .open_connection(&tunnelled(1), ConnectionType::Primary)
        .await
        .unwrap());

    let (_socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let server = match wait_for(&mut events, is_connected).await {
        Event::ServerStateChanged {
            handle,
            connection_type,
            ..
        } => {
            assert_eq!(connection_type, ConnectionType::Primary);
            handle
        }
        other => panic!("unexpected event: {:?}", other),
    };

    assert_eq!(handle.status().await.unwrap().pending_tunnels, 1);

    handle.close_server(server).await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.server_count, 0);
    assert_eq!(status.pending_tunnels, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_failed_tunnel_publishes_connection_failed() {
    let (handle, shutdown) = start(LoopbackTunnels { port: 0, fail: true });
    let mut events = handle.subscribe();

    assert!(handle
        .open_connection(&tunnelled(27017), ConnectionType::Test)
        .await
        .unwrap());

    match wait_for(&mut events, |e| matches!(e, Event::ConnectionFailed { .. })).await {
        Event::ConnectionFailed {
            connection_type,
            reason,
            message,
            ..
        } => {
            assert_eq!(connection_type, ConnectionType::Test);
            assert_eq!(reason, FailureReason::SshConnection);
            assert!(message.contains("Authentication rejected"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let status = handle.status().await.unwrap();
    assert_eq!(status.server_count, 0);
    assert_eq!(status.pending_tunnels, 0);

    shutdown.cancel();
}

#[tokio::test]
async fn test_refused_connection_fails_with_other_reason() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (handle, shutdown) = start(LoopbackTunnels { port, fail: false });
    let mut events = handle.subscribe();

    let settings = ConnectionSettings::new("gone", "127.0.0.1", port);
    handle
        .open_connection(&settings, ConnectionType::Primary)
        .await
        .unwrap();

    match wait_for(&mut events, |e| matches!(e, Event::ConnectionFailed { .. })).await {
        Event::ConnectionFailed { reason, .. } => assert_eq!(reason, FailureReason::Other),
        other => panic!("unexpected event: {:?}", other),
    }

    shutdown.cancel();
}

#[tokio::test]
async fn test_collection_shell_runs_on_secondary() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (handle, shutdown) = start(LoopbackTunnels { port, fail: false });
    let mut events = handle.subscribe();

    handle
        .open_connection(&tunnelled(1), ConnectionType::Primary)
        .await
        .unwrap();
    let server = match wait_for(&mut events, is_connected).await {
        Event::ServerStateChanged { handle, .. } => handle,
        other => panic!("unexpected event: {:?}", other),
    };

    let shell = handle
        .open_collection_shell(server, "shop", "orders", None)
        .await
        .unwrap();

    match wait_for(&mut events, |e| matches!(e, Event::OpeningShell { .. })).await {
        Event::OpeningShell { shell: id, title, .. } => {
            assert_eq!(id, shell);
            assert_eq!(title, "shop");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // The tcp transport cannot run scripts and says so
    match wait_for(&mut events, |e| matches!(e, Event::ScriptFinished { .. })).await {
        Event::ScriptFinished { shell: id, error } => {
            assert_eq!(id, shell);
            assert!(error.is_some());
        }
        other => panic!("unexpected event: {:?}", other),
    }

    handle.close_shell(shell).await.unwrap();
    assert_eq!(handle.status().await.unwrap().shell_count, 0);
    assert!(matches!(
        handle.close_shell(shell).await,
        Err(HbError::Shell(ShellError::NotFound(id))) if id == shell
    ));

    drop(listener);
    shutdown.cancel();
}

#[tokio::test]
async fn test_profile_from_config_file() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[connections.local]\n\
             connection_name = \"local\"\n\
             server_host = \"127.0.0.1\"\n\
             server_port = {}\n",
            port
        ),
    )
    .unwrap();

    let loaded: HarborConfig = config::load_config(&path).unwrap();
    let settings = loaded.connection("local").unwrap().clone();

    let (handle, shutdown) = start(LoopbackTunnels { port, fail: false });
    let mut events = handle.subscribe();
    handle
        .open_connection(&settings, ConnectionType::Test)
        .await
        .unwrap();

    let (_socket, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    match wait_for(&mut events, is_connected).await {
        Event::ServerStateChanged {
            connection_type, ..
        } => assert_eq!(connection_type, ConnectionType::Test),
        other => panic!("unexpected event: {:?}", other),
    }

    shutdown.cancel();
}
