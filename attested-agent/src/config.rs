//! Agent configuration
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a runnable configuration. The node binary layers CLI flags and
//! environment variables on top of this.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AgentError, Result};
use crate::identity::seal::SealingKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name registered on the platform
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Profile description sent at registration
    #[serde(default = "default_agent_description")]
    pub agent_description: String,

    /// SQLite database holding all durable agent state
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Hex-encoded 32-byte key used to seal the credential at rest
    #[serde(default, skip_serializing)]
    pub credential_seal_key: Option<String>,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub attestation: AttestationConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            agent_description: default_agent_description(),
            db_path: default_db_path(),
            credential_seal_key: None,
            platform: PlatformConfig::default(),
            llm: LlmConfig::default(),
            attestation: AttestationConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

fn default_agent_name() -> String {
    "TEEAgent".to_string()
}
fn default_agent_description() -> String {
    "An autonomous agent whose credential was born inside a TEE. No human has ever seen it."
        .to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("/data/memory.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the platform REST API
    #[serde(default = "default_platform_url")]
    pub base_url: String,

    /// Use the in-process mock platform instead of the network
    #[serde(default)]
    pub use_mock: bool,

    /// Request timeout in seconds
    #[serde(default = "default_platform_timeout")]
    pub timeout_secs: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_platform_url(),
            use_mock: false,
            timeout_secs: default_platform_timeout(),
        }
    }
}

fn default_platform_url() -> String {
    "https://www.moltbook.com/api/v1".to_string()
}
fn default_platform_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint of the confidential inference service
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_url() -> String {
    "https://secretai-rytn.scrtlabs.com:21434/v1".to_string()
}
fn default_model() -> String {
    "DeepSeek-R1-70B".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_llm_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationConfig {
    /// Loopback attestation service of the local enclave
    #[serde(default = "default_enclave_url")]
    pub enclave_url: String,

    /// Port of the attestation endpoint on the inference host
    #[serde(default = "default_inference_port")]
    pub inference_port: u16,

    /// Paths tried on the inference host when `/cpu.html` fails
    #[serde(default = "default_alternate_paths")]
    pub alternate_paths: Vec<String>,

    /// Per-fetch timeout in seconds
    #[serde(default = "default_attestation_timeout")]
    pub timeout_secs: u64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            enclave_url: default_enclave_url(),
            inference_port: default_inference_port(),
            alternate_paths: default_alternate_paths(),
            timeout_secs: default_attestation_timeout(),
        }
    }
}

fn default_enclave_url() -> String {
    "http://localhost:29343".to_string()
}
fn default_inference_port() -> u16 {
    29343
}
fn default_alternate_paths() -> Vec<String> {
    vec!["/attestation".to_string(), "/api/attestation".to_string()]
}
fn default_attestation_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Hours between heartbeat cycles
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,

    #[serde(default = "default_max_posts")]
    pub max_posts: u32,

    #[serde(default = "default_max_comments")]
    pub max_comments: u32,

    #[serde(default = "default_max_votes")]
    pub max_votes: u32,

    /// Items requested per channel feed
    #[serde(default = "default_feed_limit")]
    pub feed_limit: usize,

    /// Channels subscribed on first boot
    #[serde(default = "default_seed_channels")]
    pub seed_channels: Vec<String>,

    #[serde(default = "default_true")]
    pub discovery_enabled: bool,

    #[serde(default = "default_discovery_interval_hours")]
    pub discovery_interval_hours: u64,

    /// Upper bound on total subscriptions
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Days a seen-item id is kept before pruning
    #[serde(default = "default_seen_retention_days")]
    pub seen_retention_days: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
            max_posts: default_max_posts(),
            max_comments: default_max_comments(),
            max_votes: default_max_votes(),
            feed_limit: default_feed_limit(),
            seed_channels: default_seed_channels(),
            discovery_enabled: true,
            discovery_interval_hours: default_discovery_interval_hours(),
            max_subscriptions: default_max_subscriptions(),
            seen_retention_days: default_seen_retention_days(),
        }
    }
}

fn default_interval_hours() -> f64 {
    4.0
}
fn default_max_posts() -> u32 {
    1
}
fn default_max_comments() -> u32 {
    3
}
fn default_max_votes() -> u32 {
    5
}
fn default_feed_limit() -> usize {
    20
}
fn default_seed_channels() -> Vec<String> {
    vec![
        "AIAgents".to_string(),
        "privacy".to_string(),
        "crypto".to_string(),
    ]
}
fn default_true() -> bool {
    true
}
fn default_discovery_interval_hours() -> u64 {
    24
}
fn default_max_subscriptions() -> usize {
    10
}
fn default_seen_retention_days() -> u32 {
    30
}

impl HeartbeatConfig {
    /// `None` when `interval_hours` is negative, not finite or too large
    pub fn checked_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(self.interval_hours * 3600.0).ok()
    }

    pub fn checked_discovery_interval(&self) -> Option<Duration> {
        self.discovery_interval_hours
            .checked_mul(3600)
            .map(Duration::from_secs)
    }

    /// Saturates at `Duration::MAX`; `validate` rejects such configs
    pub fn interval(&self) -> Duration {
        self.checked_interval().unwrap_or(Duration::MAX)
    }

    pub fn discovery_interval(&self) -> Duration {
        self.checked_discovery_interval().unwrap_or(Duration::MAX)
    }
}

impl AgentConfig {
    /// Check invariants that serde defaults cannot express.
    ///
    /// Every network timeout must be shorter than the heartbeat interval so a
    /// stalled peer can never push a cycle into the next one.
    pub fn validate(&self) -> Result<()> {
        if self.agent_name.trim().is_empty() {
            return Err(AgentError::Config("agent_name must not be empty".into()));
        }
        if !(self.heartbeat.interval_hours.is_finite() && self.heartbeat.interval_hours > 0.0) {
            return Err(AgentError::Config(
                "heartbeat.interval_hours must be a positive number".into(),
            ));
        }

        let interval = self.heartbeat.checked_interval().ok_or_else(|| {
            AgentError::Config(format!(
                "heartbeat.interval_hours ({}) is out of range",
                self.heartbeat.interval_hours
            ))
        })?;
        if self.heartbeat.checked_discovery_interval().is_none() {
            return Err(AgentError::Config(format!(
                "heartbeat.discovery_interval_hours ({}) is out of range",
                self.heartbeat.discovery_interval_hours
            )));
        }

        let timeouts = [
            ("platform.timeout_secs", self.platform.timeout_secs),
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("attestation.timeout_secs", self.attestation.timeout_secs),
        ];
        for (name, secs) in timeouts {
            if secs == 0 {
                return Err(AgentError::Config(format!("{} must be non-zero", name)));
            }
            if Duration::from_secs(secs) >= interval {
                return Err(AgentError::Config(format!(
                    "{} ({}s) must be shorter than the heartbeat interval",
                    name, secs
                )));
            }
        }

        if self.heartbeat.max_subscriptions == 0 {
            return Err(AgentError::Config(
                "heartbeat.max_subscriptions must be at least 1".into(),
            ));
        }

        if let Some(key) = &self.credential_seal_key {
            SealingKey::from_hex(key)?;
        }

        Ok(())
    }

    /// Resolve the configured sealing key, if any
    pub fn sealing_key(&self) -> Result<Option<SealingKey>> {
        match &self.credential_seal_key {
            Some(key) => Ok(Some(SealingKey::from_hex(key)?)),
            None => Ok(None),
        }
    }
}
