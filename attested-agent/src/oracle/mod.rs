//! Decision oracle.
//!
//! Wraps an [`LlmBackend`] with the agent's persona and turns free text into
//! typed decisions. Transport failures are bounded by a per-call timeout;
//! malformed output is handled by [`parse`], which never fails.

pub mod backend;
pub mod parse;
pub mod prompts;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::memory::records::{ActivityStats, ConversationMessage};
use crate::platform::{flex, Channel, FeedItem, Mention};
use backend::{CompletionRequest, LlmBackend, LlmError};
use prompts::PromptAssembler;

/// Most items summarised for one decision
pub const MAX_ITEMS: usize = 15;

/// Most mentions summarised for one decision
pub const MAX_MENTIONS: usize = 5;

/// Used when reply generation fails
pub const FALLBACK_REPLY: &str = "Interesting point. I'd like to hear more about how you got there.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Post,
    Reply,
    Upvote,
    Skip,
    /// Anything the model invents
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Post => "POST",
            ActionKind::Reply => "REPLY",
            ActionKind::Upvote => "UPVOTE",
            ActionKind::Skip => "SKIP",
            ActionKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "post" => ActionKind::Post,
            "reply" | "comment" => ActionKind::Reply,
            "upvote" | "vote" => ActionKind::Upvote,
            "skip" | "none" => ActionKind::Skip,
            _ => ActionKind::Unknown,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(ActionKind::parse(&value))
    }
}

/// One decision from the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(default, alias = "submolt")]
    pub channel: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default, alias = "post_id", deserialize_with = "flex::opt_string")]
    pub item_id: Option<String>,
    #[serde(default, deserialize_with = "flex::opt_string")]
    pub target_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            channel: None,
            topic: None,
            item_id: None,
            target_id: None,
            reason: None,
        }
    }

    /// Vote target: `target_id`, else the item
    pub fn vote_target(&self) -> Option<&str> {
        self.target_id.as_deref().or(self.item_id.as_deref())
    }
}

/// Generated post content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub body: String,
}

impl PostDraft {
    /// Offline draft used when the oracle is unreachable
    pub fn fallback(topic: &str) -> Self {
        Self {
            title: parse::truncate_chars(&format!("Thoughts on {}", topic), parse::MAX_TITLE_CHARS),
            body: format!("Been thinking about {}. What's your take?", topic),
        }
    }
}

/// What the oracle is told about the agent itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSummary {
    pub agent_name: String,
    pub activity: ActivityStats,
    pub subscriptions: Vec<String>,
    pub last_heartbeat: Option<String>,
    pub post_quota: u32,
    pub comment_quota: u32,
    pub vote_quota: u32,
}

/// LLM-backed decision maker
pub struct DecisionOracle {
    backend: Arc<dyn LlmBackend>,
    persona: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl DecisionOracle {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        agent_name: &str,
        description: &str,
        config: &LlmConfig,
    ) -> Self {
        Self {
            backend,
            persona: PromptAssembler::persona(agent_name, description),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        self.backend.id()
    }

    pub async fn is_available(&self) -> bool {
        self.backend.is_available().await
    }

    /// One completion under the persona, bounded by the call timeout
    async fn ask(&self, prompt: String) -> Result<String, LlmError> {
        let request = CompletionRequest::user(prompt)
            .with_system(self.persona.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = tokio::time::timeout(self.timeout, self.backend.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        debug!(
            model = self.backend.id(),
            tokens = response.usage.total(),
            "Oracle replied"
        );
        Ok(response.content)
    }

    /// Decide what to do with a window of items and mentions.
    ///
    /// An empty window short-circuits without calling the backend. Output
    /// that cannot be parsed yields no actions; only transport failures
    /// surface as errors.
    pub async fn decide(
        &self,
        state: &StateSummary,
        items: &[FeedItem],
        mentions: &[Mention],
    ) -> Result<Vec<Action>, LlmError> {
        if items.is_empty() && mentions.is_empty() {
            debug!("Nothing new to decide on");
            return Ok(Vec::new());
        }

        let items = &items[..items.len().min(MAX_ITEMS)];
        let mentions = &mentions[..mentions.len().min(MAX_MENTIONS)];
        let raw = self
            .ask(PromptAssembler::decision(state, items, mentions))
            .await?;

        let actions = parse::parse_actions(&raw);
        info!(
            items = items.len(),
            mentions = mentions.len(),
            actions = actions.len(),
            "Oracle decided"
        );
        Ok(actions)
    }

    pub async fn generate_post(&self, channel: &str, topic: &str) -> PostDraft {
        match self.ask(PromptAssembler::post(channel, topic)).await {
            Ok(raw) => parse::parse_post_draft(&raw),
            Err(e) => {
                warn!(error = %e, "Post generation failed, using fallback draft");
                PostDraft::fallback(topic)
            }
        }
    }

    pub async fn generate_reply(&self, item: &FeedItem, thread: &[ConversationMessage]) -> String {
        match self.ask(PromptAssembler::reply(item, thread)).await {
            Ok(raw) => {
                let text = parse::strip_reasoning(&raw).trim_matches('"').trim();
                if text.is_empty() {
                    FALLBACK_REPLY.to_string()
                } else {
                    text.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, item_id = %item.id, "Reply generation failed, using fallback");
                FALLBACK_REPLY.to_string()
            }
        }
    }

    /// Choose up to `slots` new channels among `offered`.
    ///
    /// Names the model invents, repeats, or already subscribed ones are dropped.
    pub async fn pick_channels(
        &self,
        offered: &[Channel],
        current: &[String],
        slots: usize,
    ) -> Vec<String> {
        if slots == 0 || offered.is_empty() {
            return Vec::new();
        }

        let raw = match self
            .ask(PromptAssembler::discovery(offered, current, slots))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Channel discovery failed");
                return Vec::new();
            }
        };

        let known: HashSet<&str> = offered.iter().map(|c| c.name.as_str()).collect();
        let mut seen = HashSet::new();
        parse::parse_name_list(&raw)
            .into_iter()
            .filter(|name| known.contains(name.as_str()) && !current.contains(name))
            .filter(|name| seen.insert(name.clone()))
            .take(slots)
            .collect()
    }
}
