//! Record types persisted by the memory store

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Post,
    Comment,
    Upvote,
    Downvote,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Post => "post",
            ActivityKind::Comment => "comment",
            ActivityKind::Upvote => "upvote",
            ActivityKind::Downvote => "downvote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "post" => Some(ActivityKind::Post),
            "comment" => Some(ActivityKind::Comment),
            "upvote" => Some(ActivityKind::Upvote),
            "downvote" => Some(ActivityKind::Downvote),
            _ => None,
        }
    }
}

/// One externally visible action the agent took
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub kind: ActivityKind,
    pub timestamp: String,
    pub details: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub posts: u64,
    pub comments: u64,
    pub upvotes: u64,
    pub downvotes: u64,
}

impl ActivityStats {
    pub fn total_votes(&self) -> u64 {
        self.upvotes + self.downvotes
    }
}

/// Author of a conversation turn relative to this agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(rename = "self")]
    Agent,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "self",
            Role::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "self" {
            Role::Agent
        } else {
            Role::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub thread_id: String,
    pub role: Role,
    pub author: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionSource {
    /// Configured at first boot
    Seed,
    /// Picked by the oracle during discovery
    Discovered,
}

impl SubscriptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionSource::Seed => "seed",
            SubscriptionSource::Discovered => "discovered",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "discovered" {
            SubscriptionSource::Discovered
        } else {
            SubscriptionSource::Seed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub source: SubscriptionSource,
    pub subscribed_at: String,
}

/// Portable dump of agent memory. Never includes the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryExport {
    pub exported_at: String,
    pub config: BTreeMap<String, Value>,
    pub activity: Vec<ActivityEntry>,
    pub conversations: Vec<ConversationMessage>,
    pub subscriptions: Vec<Subscription>,
    pub seen_items: u64,
}
