//! Error types for attested-agent

use thiserror::Error;

use crate::identity::seal::SealError;
use crate::memory::StoreError;
use crate::oracle::backend::LlmError;
use crate::platform::PlatformError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] LlmError),

    #[error("Credential sealing error: {0}")]
    Seal(#[from] SealError),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    Transition { from: String, to: String },

    #[error("Agent not ready: {0}")]
    NotReady(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;
