//! hb-tunnel: SSH tunnel workers for Harbor
//!
//! A tunnel worker is a background task dedicated to one pending
//! connection. It answers an `EstablishTunnelRequest` by opening a local
//! listening port forwarded over SSH to the database server, then an
//! optional `ListenTunnelRequest` by forwarding traffic until the SSH
//! session ends or the worker is cancelled.

pub mod error;
pub mod ssh;
pub mod worker;

pub use error::TunnelError;
pub use ssh::{SshConnector, SshTunnel, SshTunnelFactory};
pub use worker::{Tunnel, TunnelConnector, TunnelWorker};
