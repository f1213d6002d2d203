//! TCP transport worker
//!
//! Opens a plain TCP connection to the server address and keeps it until
//! the handle is released or the server goes away. The database handshake
//! is left to a real driver; scripts are rejected.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hb_core::config::TransportConfig;
use hb_core::error::ShellError;
use hb_core::traits::{Transport, TransportFactory};
use hb_protocol::{
    ConnectionSettings, ConnectionState, Inbound, Requester, ScriptRequest, ServerHandleId,
    TransportEvent,
};

/// Starts [`TcpTransport`] workers
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    connect_timeout: Duration,
}

impl TcpTransportFactory {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
        }
    }
}

impl Default for TcpTransportFactory {
    fn default() -> Self {
        Self::new(&TransportConfig::default())
    }
}

impl TransportFactory for TcpTransportFactory {
    fn start(
        &self,
        handle: ServerHandleId,
        settings: &ConnectionSettings,
        requester: Requester,
    ) -> Box<dyn Transport> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = TcpWorker {
            handle,
            address: target_address(settings),
            connect_timeout: self.connect_timeout,
            requester,
            stream: None,
        };
        tokio::spawn(worker.run(command_rx, cancel.clone()));

        Box::new(TcpTransport { commands, cancel })
    }
}

/// Address the transport dials: the first member for replica sets
fn target_address(settings: &ConnectionSettings) -> String {
    settings
        .replica_members()
        .first()
        .cloned()
        .unwrap_or_else(|| settings.full_address())
}

enum Command {
    Connect,
    Execute(ScriptRequest),
}

/// Handle to a running TCP worker task
pub struct TcpTransport {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
}

impl Transport for TcpTransport {
    fn connect(&mut self) {
        let _ = self.commands.send(Command::Connect);
    }

    fn execute(&mut self, request: ScriptRequest) {
        let _ = self.commands.send(Command::Execute(request));
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct TcpWorker {
    handle: ServerHandleId,
    address: String,
    connect_timeout: Duration,
    requester: Requester,
    stream: Option<TcpStream>,
}

impl TcpWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let mut buf = [0u8; 1024];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect().await,
                    Some(Command::Execute(request)) => {
                        let error = ShellError::Unsupported("tcp transport".into());
                        self.report(TransportEvent::ScriptFinished {
                            shell: request.shell,
                            error: Some(error.to_string()),
                        });
                    }
                    None => break,
                },
                read = read_some(&mut self.stream, &mut buf) => match read {
                    Ok(0) => self.lost("connection closed by server".to_string()),
                    Ok(n) => tracing::trace!("Discarding {} bytes from {}", n, self.address),
                    Err(e) => self.lost(e.to_string()),
                },
            }
        }

        tracing::debug!("Transport for {} stopped", self.handle);
    }

    async fn connect(&mut self) {
        if self.stream.is_some() {
            tracing::debug!("{} is already connected", self.handle);
            return;
        }

        self.report_state(ConnectionState::Connecting, None);

        let result = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await;
        match result {
            Ok(Ok(stream)) => {
                tracing::info!("{} connected to {}", self.handle, self.address);
                self.stream = Some(stream);
                self.report_state(ConnectionState::Connected, None);
            }
            Ok(Err(e)) => {
                let message = format!("Cannot connect to {}: {}", self.address, e);
                self.report_state(ConnectionState::Failed, Some(message));
            }
            Err(_) => {
                let message = format!("Connection to {} timed out", self.address);
                self.report_state(ConnectionState::Failed, Some(message));
            }
        }
    }

    fn lost(&mut self, reason: String) {
        self.stream = None;
        let message = format!("Connection to {} lost: {}", self.address, reason);
        self.report_state(ConnectionState::Failed, Some(message));
    }

    fn report_state(&self, state: ConnectionState, error: Option<String>) {
        self.report(TransportEvent::StateChanged {
            handle: self.handle,
            state,
            error,
        });
    }

    fn report(&self, event: TransportEvent) {
        if self.requester.send(Inbound::Transport(event)).is_err() {
            tracing::debug!("Requester for {} is gone", self.handle);
        }
    }
}

/// Read from the stream if there is one, otherwise never complete
async fn read_some(stream: &mut Option<TcpStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}
