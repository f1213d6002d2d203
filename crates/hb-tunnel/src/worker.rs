//! Tunnel worker task
//!
//! The worker handles one request at a time, so a listen response can never
//! overtake the establish response for the same handle.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use hb_protocol::{
    ConnectionSettings, EstablishTunnelRequest, EstablishTunnelResponse, Inbound,
    ListenTunnelRequest, ListenTunnelResponse, TunnelRequest, TunnelWorkerRef,
};

use crate::error::TunnelError;

/// Opens tunnels for a worker
#[async_trait]
pub trait TunnelConnector: Send + 'static {
    /// The tunnel this connector produces
    type Tunnel: Tunnel;

    /// Set up a tunnel to the server described by `settings`
    async fn establish(&mut self, settings: &ConnectionSettings)
        -> Result<Self::Tunnel, TunnelError>;
}

/// An established tunnel
#[async_trait]
pub trait Tunnel: Send + 'static {
    /// Local port database traffic should be sent to
    fn local_port(&self) -> u16;

    /// Forward traffic until the tunnel closes (`Ok`) or breaks (`Err`)
    async fn listen(&mut self, cancel: CancellationToken) -> Result<(), TunnelError>;
}

/// Background task serving one pending connection
pub struct TunnelWorker<C: TunnelConnector> {
    connector: C,
    /// `host:port` of the SSH server, for logging
    target: String,
    tunnel: Option<C::Tunnel>,
    cancel: CancellationToken,
}

impl<C: TunnelConnector> TunnelWorker<C> {
    /// Create a worker for the tunnel described by `settings`
    pub fn new(connector: C, settings: &ConnectionSettings, cancel: CancellationToken) -> Self {
        Self {
            connector,
            target: format!("{}:{}", settings.ssh.host, settings.ssh.port),
            tunnel: None,
            cancel,
        }
    }

    /// Spawn a worker on the current runtime and return its address
    pub fn spawn(connector: C, settings: &ConnectionSettings) -> TunnelWorkerRef {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = Self::new(connector, settings, cancel.clone());

        tokio::spawn(worker.run(request_rx));

        TunnelWorkerRef { requests, cancel }
    }

    /// Serve requests until the tunnel stops, the worker is cancelled, or
    /// every sender is dropped
    pub async fn run(mut self, mut requests: mpsc::UnboundedReceiver<TunnelRequest>) {
        loop {
            tokio::select! {
                biased;

                request = requests.recv() => match request {
                    Some(TunnelRequest::Establish(request)) => self.establish(request).await,
                    Some(TunnelRequest::Listen(request)) => {
                        self.listen(request).await;
                        break;
                    }
                    None => break,
                },
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Tunnel worker for {} cancelled", self.target);
                    break;
                }
            }
        }

        tracing::debug!("Tunnel worker for {} stopped", self.target);
    }

    async fn establish(&mut self, request: EstablishTunnelRequest) {
        tracing::debug!("Establishing tunnel to {} for {}", self.target, request.handle);

        let result = tokio::select! {
            result = self.connector.establish(&request.settings) => result,
            _ = self.cancel.cancelled() => Err(TunnelError::Cancelled),
        };

        let response = match result {
            Ok(tunnel) => {
                let local_port = tunnel.local_port();
                self.tunnel = Some(tunnel);
                EstablishTunnelResponse {
                    handle: request.handle,
                    settings: request.settings,
                    connection_type: request.connection_type,
                    local_port,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to establish tunnel to {}: {}", self.target, e);
                EstablishTunnelResponse {
                    handle: request.handle,
                    settings: request.settings,
                    connection_type: request.connection_type,
                    local_port: 0,
                    error: Some(e.to_string()),
                }
            }
        };

        if request.requester.send(Inbound::EstablishTunnel(response)).is_err() {
            tracing::debug!("Requester for {} is gone", request.handle);
        }
    }

    async fn listen(&mut self, request: ListenTunnelRequest) {
        let result = match self.tunnel.as_mut() {
            Some(tunnel) => tunnel.listen(self.cancel.clone()).await,
            None => Err(TunnelError::NotEstablished),
        };

        let response = ListenTunnelResponse {
            handle: request.handle,
            connection_type: request.connection_type,
            error: result.err().map(|e| e.to_string()),
        };

        if request.requester.send(Inbound::ListenTunnel(response)).is_err() {
            tracing::debug!("Requester for {} is gone", request.handle);
        }
    }
}
