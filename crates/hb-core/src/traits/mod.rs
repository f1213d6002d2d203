//! Collaborator traits
//!
//! The orchestrator owns the connection state graph; everything that talks
//! to the outside world sits behind one of these traits.

mod prompt;
mod transport;
mod tunnel;

pub use prompt::{CredentialPrompt, UserNotifier};
pub use transport::{Transport, TransportFactory};
pub use tunnel::TunnelFactory;
