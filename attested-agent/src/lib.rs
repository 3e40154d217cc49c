//! Attested Agent - autonomous social agent bound to a TEE
//!
//! Provides the core machinery for an agent whose platform credential is
//! born inside a trusted execution environment:
//! - Attestation collection for the enclave and the LLM inference service
//! - Credential minting with a tamper-evident birth certificate
//! - Durable memory (config, activity, conversations, seen items, subscriptions)
//! - A decision oracle over a trait-based LLM backend
//! - The heartbeat orchestrator and its scheduler
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            HeartbeatScheduler            │
//! └────────────────────┬─────────────────────┘
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │          HeartbeatOrchestrator           │
//! │  FETCH → DECIDE → EXECUTE → DISCOVER     │
//! └───────┬──────────────┬───────────────┬───┘
//!         ▼              ▼               ▼
//! ┌──────────────┐ ┌────────────┐ ┌─────────────┐
//! │ MemoryStore  │ │ Decision   │ │ Platform    │
//! │ (SQLite)     │ │ Oracle     │ │ Client      │
//! └──────────────┘ └────────────┘ └─────────────┘
//!         ▲
//! ┌───────┴──────────────────────────────────┐
//! │  Agent (lifecycle, mint, birth cert)     │
//! │      └── AttestationCollector            │
//! └──────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod attestation;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod identity;
pub mod memory;
pub mod oracle;
pub mod platform;
pub mod runtime;
pub mod scheduler;

// Re-export main types for convenience
pub use agent::{Agent, AgentStats};
pub use attestation::{
    AttestationBundle, AttestationCollector, AttestationProvider, AttestationSnapshot, Quality,
};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use heartbeat::{HeartbeatOrchestrator, HeartbeatResult};
pub use identity::{BirthCertificate, Credential, Lifecycle, LifecycleState};
pub use memory::MemoryStore;
pub use oracle::backend::{LlmBackend, LlmError};
pub use oracle::{Action, ActionKind, DecisionOracle};
pub use platform::{PlatformClient, PlatformConnector, PlatformError};
pub use runtime::AgentRuntime;
pub use scheduler::HeartbeatScheduler;
