//! Social platform abstraction.
//!
//! [`PlatformClient`] is everything the heartbeat needs from the platform.
//! A [`PlatformConnector`] registers new agents and turns a credential into a
//! client; configuration chooses between the HTTP and the in-process mock
//! implementation.

pub mod flex;
pub mod http;
pub mod mock;

pub use http::{HttpConnector, HttpPlatformClient};
pub use mock::{MockConnector, MockPlatformClient};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::PlatformConfig;
use crate::identity::Credential;

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {path}: {message}")]
    Status {
        status: u16,
        path: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PlatformError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, PlatformError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSort {
    Hot,
    New,
    Top,
    Rising,
}

impl FeedSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSort::Hot => "hot",
            FeedSort::New => "new",
            FeedSort::Top => "top",
            FeedSort::Rising => "rising",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    #[serde(default, deserialize_with = "flex::string")]
    pub id: String,
    #[serde(default, deserialize_with = "flex::name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub karma: i64,
    #[serde(default, alias = "is_claimed")]
    pub claimed: bool,
}

/// Claim state reported by the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimStatus {
    #[serde(default, alias = "is_claimed")]
    pub claimed: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl ClaimStatus {
    pub fn is_claimed(&self) -> bool {
        self.claimed || self.status.as_deref() == Some("claimed")
    }
}

/// A post on the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(deserialize_with = "flex::string")]
    pub id: String,
    #[serde(default, alias = "submolt", deserialize_with = "flex::name")]
    pub channel: String,
    #[serde(default, deserialize_with = "flex::name")]
    pub author: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "body")]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default, deserialize_with = "flex::count")]
    pub comment_count: u64,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(deserialize_with = "flex::string")]
    pub id: String,
    #[serde(default, alias = "post_id", deserialize_with = "flex::string")]
    pub item_id: String,
    #[serde(default, deserialize_with = "flex::name")]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A community on the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(deserialize_with = "flex::name")]
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "subscribers", alias = "member_count")]
    pub subscriber_count: u64,
}

/// Something addressed to this agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    #[serde(deserialize_with = "flex::string")]
    pub id: String,
    #[serde(default, alias = "post_id", deserialize_with = "flex::opt_string")]
    pub item_id: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub comment_id: Option<String>,
    #[serde(default, alias = "from", deserialize_with = "flex::name")]
    pub author: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(deserialize_with = "flex::string")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "flex::name")]
    pub author: String,
    #[serde(default, alias = "post_id", deserialize_with = "flex::opt_string")]
    pub item_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// What registration hands back. The credential is never shown to anyone.
#[derive(Debug, Clone)]
pub struct Registration {
    pub credential: Credential,
    pub claim_url: Option<String>,
    pub verification_code: Option<String>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn get_me(&self) -> Result<AgentProfile, PlatformError>;

    async fn get_status(&self) -> Result<ClaimStatus, PlatformError>;

    async fn get_feed(
        &self,
        sort: FeedSort,
        limit: usize,
        channel: Option<&str>,
    ) -> Result<Vec<FeedItem>, PlatformError>;

    async fn get_item(&self, id: &str) -> Result<FeedItem, PlatformError>;

    async fn create_item(
        &self,
        channel: &str,
        title: &str,
        content: &str,
    ) -> Result<FeedItem, PlatformError>;

    async fn get_comments(&self, item_id: &str) -> Result<Vec<Comment>, PlatformError>;

    async fn create_reply(
        &self,
        item_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, PlatformError>;

    async fn upvote(&self, target_id: &str) -> Result<(), PlatformError>;

    async fn downvote(&self, target_id: &str) -> Result<(), PlatformError>;

    async fn list_channels(&self) -> Result<Vec<Channel>, PlatformError>;

    async fn get_channel(&self, name: &str) -> Result<Channel, PlatformError>;

    async fn get_mentions(&self) -> Result<Vec<Mention>, PlatformError>;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, PlatformError>;
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Register a new agent and obtain its credential
    async fn register(&self, name: &str, description: &str)
        -> Result<Registration, PlatformError>;

    /// Build an authenticated client
    fn connect(&self, credential: &Credential) -> Result<Arc<dyn PlatformClient>, PlatformError>;
}

/// Pick the connector named by configuration
pub fn connector_from_config(
    config: &PlatformConfig,
    agent_name: &str,
) -> Result<Arc<dyn PlatformConnector>, PlatformError> {
    if config.use_mock {
        Ok(Arc::new(MockConnector::new(Arc::new(
            MockPlatformClient::seeded(agent_name),
        ))))
    } else {
        Ok(Arc::new(HttpConnector::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?))
    }
}
