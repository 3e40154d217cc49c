//! Application context.
//!
//! Everything the process shares is built here once and handed out
//! explicitly: the monitoring API holds an `Arc<AgentRuntime>`, the
//! scheduler holds the orchestrator. There are no globals.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::attestation::{AttestationCollector, AttestationProvider};
use crate::config::{AgentConfig, LlmConfig};
use crate::error::Result;
use crate::heartbeat::HeartbeatOrchestrator;
use crate::identity::LifecycleState;
use crate::memory::MemoryStore;
use crate::oracle::backend::{LlmBackend, MockBackend, OpenAiBackend};
use crate::oracle::DecisionOracle;
use crate::platform::{connector_from_config, PlatformConnector};
use crate::scheduler::HeartbeatScheduler;

pub struct AgentRuntime {
    pub config: AgentConfig,
    pub memory: Arc<MemoryStore>,
    pub agent: Arc<Agent>,
    pub oracle: Arc<DecisionOracle>,
    pub orchestrator: Arc<HeartbeatOrchestrator>,
    pub scheduler: Arc<HeartbeatScheduler>,
    pub attestation: Arc<dyn AttestationProvider>,
}

impl AgentRuntime {
    /// Build every component from configuration
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryStore::open(&config.db_path)?);
        let connector = connector_from_config(&config.platform, &config.agent_name)?;
        let attestation: Arc<dyn AttestationProvider> =
            Arc::new(AttestationCollector::new(&config.attestation, &config.llm)?);
        let backend = llm_backend(&config.llm)?;

        Self::assemble(config, memory, connector, attestation, backend)
    }

    /// Wire pre-built collaborators together
    pub fn assemble(
        config: AgentConfig,
        memory: Arc<MemoryStore>,
        connector: Arc<dyn PlatformConnector>,
        attestation: Arc<dyn AttestationProvider>,
        backend: Arc<dyn LlmBackend>,
    ) -> Result<Self> {
        let agent = Arc::new(Agent::new(
            &config,
            memory.clone(),
            connector,
            attestation.clone(),
        )?);
        let oracle = Arc::new(DecisionOracle::new(
            backend,
            &config.agent_name,
            &config.agent_description,
            &config.llm,
        ));
        let orchestrator = Arc::new(HeartbeatOrchestrator::new(
            agent.clone(),
            oracle.clone(),
            config.heartbeat.clone(),
        ));
        let scheduler = Arc::new(HeartbeatScheduler::new(
            orchestrator.clone(),
            config.heartbeat.interval(),
        ));

        Ok(Self {
            config,
            memory,
            agent,
            oracle,
            orchestrator,
            scheduler,
            attestation,
        })
    }

    /// Boot the agent and start the heartbeat schedule
    pub async fn start(&self) -> Result<LifecycleState> {
        let state = self.agent.boot().await?;
        self.scheduler.start();
        info!(
            agent = %self.config.agent_name,
            %state,
            model = self.oracle.model(),
            "Agent runtime started"
        );
        Ok(state)
    }

    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("Agent runtime stopped");
    }
}

/// OpenAI-compatible backend when a key is configured, otherwise an offline
/// backend that never decides to act.
fn llm_backend(config: &LlmConfig) -> Result<Arc<dyn LlmBackend>> {
    match config.api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => Ok(Arc::new(OpenAiBackend::new(
            &config.base_url,
            &config.model,
            Some(key.to_string()),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            warn!("No LLM API key configured, running with the offline backend");
            Ok(Arc::new(MockBackend::new("offline").with_response("[]")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{AttestationBundle, FetchOutcome};
    use crate::platform::{MockConnector, MockPlatformClient};
    use async_trait::async_trait;

    struct NoAttestation;

    #[async_trait]
    impl AttestationProvider for NoAttestation {
        async fn collect(&self) -> AttestationBundle {
            AttestationBundle::assemble(
                FetchOutcome::Failed("offline".into()),
                FetchOutcome::Failed("offline".into()),
            )
        }
    }

    #[test]
    fn test_offline_backend_without_key() {
        let backend = llm_backend(&LlmConfig::default()).unwrap();
        assert_eq!(backend.id(), "offline");

        let keyed = LlmConfig {
            api_key: Some("k".into()),
            ..Default::default()
        };
        assert_eq!(llm_backend(&keyed).unwrap().id(), "DeepSeek-R1-70B");
    }

    #[tokio::test]
    async fn test_from_config_with_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            db_path: dir.path().join("nested").join("memory.db"),
            platform: crate::config::PlatformConfig {
                use_mock: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let runtime = AgentRuntime::from_config(config).unwrap();
        assert!(dir.path().join("nested").join("memory.db").exists());
        assert!(!runtime.scheduler.is_running());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let platform = Arc::new(MockPlatformClient::seeded("reef"));
        let runtime = AgentRuntime::assemble(
            AgentConfig::default(),
            Arc::new(MemoryStore::open_in_memory().unwrap()),
            Arc::new(MockConnector::new(platform)),
            Arc::new(NoAttestation),
            Arc::new(MockBackend::new("mock").with_response("[]")),
        )
        .unwrap();

        assert_eq!(runtime.start().await.unwrap(), LifecycleState::Registered);
        assert!(runtime.scheduler.is_running());
        runtime.shutdown().await;
        assert!(!runtime.scheduler.is_running());
    }
}
