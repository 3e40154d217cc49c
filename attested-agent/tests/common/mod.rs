//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;

use attested_agent::attestation::{AttestationBundle, AttestationProvider, FetchOutcome};
use attested_agent::config::HeartbeatConfig;
use attested_agent::oracle::backend::MockBackend;
use attested_agent::platform::{MockConnector, MockPlatformClient};
use attested_agent::{AgentConfig, AgentRuntime, LifecycleState, MemoryStore};

/// Content reply used for every generated post
pub const DRAFT: &str = r#"{"title": "Sealed by default", "content": "What would you keep in an enclave?"}"#;

/// Attestation service that is never reachable
pub struct OfflineAttestation;

#[async_trait]
impl AttestationProvider for OfflineAttestation {
    async fn collect(&self) -> AttestationBundle {
        AttestationBundle::assemble(
            FetchOutcome::Failed("connection refused".into()),
            FetchOutcome::Failed("connection refused".into()),
        )
    }
}

pub struct Harness {
    pub runtime: AgentRuntime,
    pub platform: Arc<MockPlatformClient>,
    pub backend: Arc<MockBackend>,
}

pub fn config(heartbeat: HeartbeatConfig) -> AgentConfig {
    AgentConfig {
        agent_name: "reef".into(),
        heartbeat,
        ..Default::default()
    }
}

/// Heartbeat settings without channel discovery
pub fn quiet_heartbeat() -> HeartbeatConfig {
    HeartbeatConfig {
        discovery_enabled: false,
        ..Default::default()
    }
}

/// A registered, claimed and verified agent over the seeded mock platform
pub async fn verified(heartbeat: HeartbeatConfig) -> Harness {
    let platform = Arc::new(MockPlatformClient::seeded("reef"));
    let backend = Arc::new(MockBackend::new("mock").with_response(DRAFT));
    let runtime = AgentRuntime::assemble(
        config(heartbeat),
        Arc::new(MemoryStore::open_in_memory().unwrap()),
        Arc::new(MockConnector::new(platform.clone())),
        Arc::new(OfflineAttestation),
        backend.clone(),
    )
    .unwrap();

    assert_eq!(
        runtime.agent.boot().await.unwrap(),
        LifecycleState::Registered
    );
    platform.set_claimed(true);
    assert!(runtime.agent.check_verification().await.unwrap());

    Harness {
        runtime,
        platform,
        backend,
    }
}
