//! hb-core: Core abstractions and configuration for Harbor
//!
//! This crate provides the configuration file format, the error taxonomy,
//! and the traits through which the orchestrator talks to its external
//! collaborators (transport workers, tunnel workers, credential prompts and
//! user notification).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::HbError;
pub use types::{CredentialKind, CredentialRequest, OrchestratorStatus};
