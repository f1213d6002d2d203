//! Credential prompts
//!
//! Works out which secrets a connection needs from the user before it can
//! be opened, and stores the answers on the settings clone that is handed
//! downstream.

use hb_core::{CredentialKind, CredentialRequest};
use hb_protocol::{ConnectionSettings, ConnectionType};

const SSH_TITLE: &str = "SSH Authentication";
const TLS_TITLE: &str = "TLS Authentication";

/// Secrets that must be prompted for, in prompt order
pub fn credential_requests(
    settings: &ConnectionSettings,
    connection_type: ConnectionType,
) -> Vec<CredentialRequest> {
    let mut requests = Vec::new();
    if !connection_type.may_prompt() {
        return requests;
    }

    let ssh = &settings.ssh;
    if !settings.is_replica_set() && ssh.enabled && ssh.ask_password {
        requests.push(ssh_request(settings));
    }

    if settings.ssl.needs_passphrase() {
        requests.push(pem_request(settings));
    }

    requests
}

fn ssh_request(settings: &ConnectionSettings) -> CredentialRequest {
    let ssh = &settings.ssh;
    let by_key = ssh.uses_key();
    let pass_text = if by_key { "passphrase" } else { "password" };

    let mut text = format!("In order to continue, please provide the {}", pass_text);
    if by_key {
        text.push_str(" for the key file");
    }
    text.push_str(".\n\n");

    if by_key {
        let key = ssh
            .private_key_file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        text.push_str(&format!("Private Key:  {}\n", key));
    }

    text.push_str(&format!("Server: {}\n", ssh.host));
    text.push_str(&format!("User: {}\n", ssh.user_name));
    text.push_str(&format!("\nEnter your {} that will never be stored:", pass_text));

    CredentialRequest {
        kind: if by_key {
            CredentialKind::SshKeyPassphrase
        } else {
            CredentialKind::SshPassword
        },
        title: SSH_TITLE.to_string(),
        text,
    }
}

fn pem_request(settings: &ConnectionSettings) -> CredentialRequest {
    let pem = settings
        .ssl
        .pem_key_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_default();

    let text = format!(
        "In order to continue, please provide the passphrase.\n\n\
         Server: {}\n\
         PEM file: {}\n\n\
         Enter your PEM key passphrase (will never be stored):",
        settings.full_address(),
        pem
    );

    CredentialRequest {
        kind: CredentialKind::PemPassphrase,
        title: TLS_TITLE.to_string(),
        text,
    }
}

/// Store an entered secret on the settings
pub fn apply_credential(settings: &mut ConnectionSettings, kind: CredentialKind, secret: String) {
    match kind {
        CredentialKind::SshPassword | CredentialKind::SshKeyPassphrase => {
            settings.ssh.asked_password = Some(secret);
        }
        CredentialKind::PemPassphrase => {
            settings.ssl.pem_pass_phrase = Some(secret);
        }
    }
}
