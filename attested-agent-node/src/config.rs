//! Node configuration
//!
//! CLI arguments and environment variables via clap, layered over an
//! optional TOML file. Anything given on the command line or in the
//! environment wins over the file.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

use attested_agent::AgentConfig;

/// Autonomous social agent whose credential is minted inside a TEE
#[derive(Parser, Debug, Clone)]
#[command(name = "attested-agent-node")]
#[command(about = "Runtime for the attested social agent")]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address the monitoring API listens on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Display name registered on the platform
    #[arg(long, env = "AGENT_NAME")]
    pub agent_name: Option<String>,

    /// Profile description sent at registration
    #[arg(long, env = "AGENT_DESCRIPTION")]
    pub agent_description: Option<String>,

    /// Directory for durable state; the database lives here unless DB_PATH is set
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, env = "DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Social platform API base URL
    #[arg(long, env = "PLATFORM_BASE_URL")]
    pub platform_base_url: Option<String>,

    /// Run against the in-memory platform instead of the real one
    #[arg(long, env = "USE_MOCK_PLATFORM")]
    pub use_mock_platform: Option<bool>,

    /// OpenAI-compatible LLM endpoint
    #[arg(long, env = "LLM_BASE_URL")]
    pub llm_base_url: Option<String>,

    /// LLM API key; without one the agent never acts
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL")]
    pub llm_model: Option<String>,

    /// Enclave attestation service URL
    #[arg(long, env = "ATTESTATION_URL")]
    pub attestation_url: Option<String>,

    #[arg(long, env = "HEARTBEAT_INTERVAL_HOURS")]
    pub heartbeat_interval_hours: Option<f64>,

    #[arg(long, env = "MAX_POSTS_PER_HEARTBEAT")]
    pub max_posts_per_heartbeat: Option<u32>,

    #[arg(long, env = "MAX_COMMENTS_PER_HEARTBEAT")]
    pub max_comments_per_heartbeat: Option<u32>,

    #[arg(long, env = "MAX_VOTES_PER_HEARTBEAT")]
    pub max_votes_per_heartbeat: Option<u32>,

    #[arg(long, env = "MAX_SUBSCRIPTIONS")]
    pub max_subscriptions: Option<usize>,

    #[arg(long, env = "DISCOVERY_ENABLED")]
    pub discovery_enabled: Option<bool>,

    /// Comma-separated channels subscribed on first boot
    #[arg(long, env = "SEED_CHANNELS", value_delimiter = ',')]
    pub seed_channels: Option<Vec<String>>,

    /// Hex-encoded 32-byte key sealing the credential at rest
    #[arg(long, env = "CREDENTIAL_SEAL_KEY", hide_env_values = true)]
    pub credential_seal_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Args {
    /// Build the agent configuration: file first, then overrides
    pub fn agent_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => load_file(path)?,
            None => AgentConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut AgentConfig) {
        if let Some(name) = &self.agent_name {
            config.agent_name = name.clone();
        }
        if let Some(description) = &self.agent_description {
            config.agent_description = description.clone();
        }
        match (&self.db_path, &self.data_dir) {
            (Some(path), _) => config.db_path = path.clone(),
            (None, Some(dir)) => config.db_path = dir.join("memory.db"),
            (None, None) => {}
        }
        if let Some(key) = &self.credential_seal_key {
            config.credential_seal_key = Some(key.clone());
        }

        if let Some(url) = &self.platform_base_url {
            config.platform.base_url = url.clone();
        }
        if let Some(use_mock) = self.use_mock_platform {
            config.platform.use_mock = use_mock;
        }

        if let Some(url) = &self.llm_base_url {
            config.llm.base_url = url.clone();
        }
        if let Some(key) = &self.llm_api_key {
            config.llm.api_key = Some(key.clone());
        }
        if let Some(model) = &self.llm_model {
            config.llm.model = model.clone();
        }

        if let Some(url) = &self.attestation_url {
            config.attestation.enclave_url = url.clone();
        }

        let heartbeat = &mut config.heartbeat;
        if let Some(hours) = self.heartbeat_interval_hours {
            heartbeat.interval_hours = hours;
        }
        if let Some(max) = self.max_posts_per_heartbeat {
            heartbeat.max_posts = max;
        }
        if let Some(max) = self.max_comments_per_heartbeat {
            heartbeat.max_comments = max;
        }
        if let Some(max) = self.max_votes_per_heartbeat {
            heartbeat.max_votes = max;
        }
        if let Some(max) = self.max_subscriptions {
            heartbeat.max_subscriptions = max;
        }
        if let Some(enabled) = self.discovery_enabled {
            heartbeat.discovery_enabled = enabled;
        }
        if let Some(channels) = &self.seed_channels {
            heartbeat.seed_channels = channels
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
    }
}

fn load_file(path: &Path) -> anyhow::Result<AgentConfig> {
    info!("Loading config file {}", path.display());
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let args = Args::parse_from(["attested-agent-node"]);
        let config = args.agent_config().unwrap();
        assert_eq!(config.agent_name, AgentConfig::default().agent_name);
        assert_eq!(args.listen.port(), 8080);
        assert_eq!(args.log_format, LogFormat::Text);
    }

    #[test]
    fn test_data_dir_places_database() {
        let args = Args::parse_from(["attested-agent-node", "--data-dir", "/srv/agent"]);
        let config = args.agent_config().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/srv/agent/memory.db"));

        let args = Args::parse_from([
            "attested-agent-node",
            "--data-dir",
            "/srv/agent",
            "--db-path",
            "/tmp/other.db",
        ]);
        assert_eq!(
            args.agent_config().unwrap().db_path,
            PathBuf::from("/tmp/other.db")
        );
    }

    #[test]
    fn test_seed_channels_are_split() {
        let args = Args::parse_from([
            "attested-agent-node",
            "--seed-channels",
            "tee, privacy,,general",
        ]);
        let config = args.agent_config().unwrap();
        assert_eq!(config.heartbeat.seed_channels, vec!["tee", "privacy", "general"]);
    }
}
