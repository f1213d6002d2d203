//! User interaction traits

use async_trait::async_trait;
use hb_protocol::Severity;

use crate::types::CredentialRequest;

/// Asks the user for a secret
#[async_trait]
pub trait CredentialPrompt: Send + Sync {
    /// Returns the entered secret, or `None` if the user cancelled
    async fn prompt_secret(&self, request: &CredentialRequest) -> Option<String>;
}

/// Interrupts the user with a message.
///
/// Called synchronously from the log handler; implementations must show
/// messages in the order they are received.
pub trait UserNotifier: Send + Sync {
    fn notify(&self, severity: Severity, title: &str, text: &str);
}
