//! Heartbeat orchestrator.
//!
//! One cycle:
//!
//! 1. FETCH - new items from subscribed channels (marked seen before the
//!    oracle sees them) and mentions
//! 2. DECIDE - ask the oracle for an action list
//! 3. EXECUTE - run actions under per-cycle quotas, each isolated
//! 4. DISCOVER - occasionally subscribe to new channels
//! 5. COMMIT - record `last_heartbeat`
//!
//! Nothing escapes a cycle: failures end up in [`HeartbeatResult::errors`]
//! or the log.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::HeartbeatConfig;
use crate::error::{AgentError, Result};
use crate::identity::LifecycleState;
use crate::memory::{self, keys, ActivityKind, MemoryStore, Role, SubscriptionSource};
use crate::oracle::{Action, ActionKind, DecisionOracle, StateSummary};
use crate::platform::{FeedItem, FeedSort, Mention, PlatformClient};
use crate::scheduler::HeartbeatTask;

/// Channel used when a POST names none
pub const DEFAULT_CHANNEL: &str = "general";

/// Topic used when a POST names none
pub const DEFAULT_TOPIC: &str = "something interesting in tech, AI or the agent ecosystem";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResult {
    pub posts_created: u32,
    pub comments_created: u32,
    pub votes_cast: u32,
    pub errors: Vec<String>,
}

impl HeartbeatResult {
    pub fn total_actions(&self) -> u32 {
        self.posts_created + self.comments_created + self.votes_cast
    }

    fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Post => self.posts_created += 1,
            ActionKind::Reply => self.comments_created += 1,
            ActionKind::Upvote => self.votes_cast += 1,
            ActionKind::Skip | ActionKind::Unknown => {}
        }
    }
}

/// Remaining per-cycle allowance by action kind
#[derive(Debug)]
struct Quotas {
    posts: u32,
    comments: u32,
    votes: u32,
}

impl Quotas {
    fn from_config(config: &HeartbeatConfig) -> Self {
        Self {
            posts: config.max_posts,
            comments: config.max_comments,
            votes: config.max_votes,
        }
    }

    fn slot(&mut self, kind: ActionKind) -> Option<&mut u32> {
        match kind {
            ActionKind::Post => Some(&mut self.posts),
            ActionKind::Reply => Some(&mut self.comments),
            ActionKind::Upvote => Some(&mut self.votes),
            ActionKind::Skip | ActionKind::Unknown => None,
        }
    }

    fn available(&mut self, kind: ActionKind) -> bool {
        self.slot(kind).is_some_and(|left| *left > 0)
    }

    fn consume(&mut self, kind: ActionKind) {
        if let Some(left) = self.slot(kind) {
            *left = left.saturating_sub(1);
        }
    }
}

pub struct HeartbeatOrchestrator {
    agent: Arc<Agent>,
    oracle: Arc<DecisionOracle>,
    memory: Arc<MemoryStore>,
    config: HeartbeatConfig,
}

impl HeartbeatOrchestrator {
    pub fn new(agent: Arc<Agent>, oracle: Arc<DecisionOracle>, config: HeartbeatConfig) -> Self {
        let memory = agent.memory().clone();
        Self {
            agent,
            oracle,
            memory,
            config,
        }
    }

    /// Run one cycle if the agent is verified and not paused.
    pub async fn heartbeat(&self) -> HeartbeatResult {
        let mut result = HeartbeatResult::default();

        if self.agent.is_paused() {
            info!("Agent is paused, skipping heartbeat");
            return result;
        }

        match self.agent.state().await {
            LifecycleState::Verified => {}
            LifecycleState::Registered => match self.agent.check_verification().await {
                Ok(true) => {}
                Ok(false) => {
                    info!("Agent not yet verified, skipping heartbeat");
                    return result;
                }
                Err(e) => {
                    warn!(error = %e, "Verification check failed, skipping heartbeat");
                    return result;
                }
            },
            state => {
                info!(%state, "Agent not ready for heartbeat");
                return result;
            }
        }

        let started = Instant::now();
        info!("Starting heartbeat");

        if let Err(e) = self.run_cycle(&mut result).await {
            warn!(error = %e, "Heartbeat cycle failed");
            result.errors.push(e.to_string());
        }

        if let Err(e) = self.memory.set_config(keys::LAST_HEARTBEAT, &memory::now()) {
            warn!(error = %e, "Failed to record heartbeat checkpoint");
            result.errors.push(format!("checkpoint: {}", e));
        }
        self.prune_seen();

        info!(
            posts = result.posts_created,
            comments = result.comments_created,
            votes = result.votes_cast,
            errors = result.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Heartbeat complete"
        );
        result
    }

    async fn run_cycle(&self, result: &mut HeartbeatResult) -> Result<()> {
        let platform = self
            .agent
            .platform()
            .await
            .ok_or_else(|| AgentError::NotReady("no platform client".into()))?;

        let items = self.fetch_new_items(platform.as_ref()).await?;
        let mentions = self.fetch_mentions(platform.as_ref()).await;
        info!(items = items.len(), mentions = mentions.len(), "Fetched");

        let state = self.state_summary()?;
        let actions = match self.oracle.decide(&state, &items, &mentions).await {
            Ok(actions) => actions,
            Err(e) => {
                warn!(error = %e, "Decision failed");
                result.errors.push(format!("decide: {}", e));
                Vec::new()
            }
        };

        self.execute(platform.as_ref(), actions, result).await;

        if self.discovery_due()? {
            self.discover(platform.as_ref()).await;
        }
        Ok(())
    }

    /// Items from every subscribed channel not seen before. Each is marked
    /// seen here, before the oracle is consulted, so a failed decision never
    /// re-presents it.
    async fn fetch_new_items(&self, platform: &dyn PlatformClient) -> Result<Vec<FeedItem>> {
        let channels = self.memory.subscribed_names()?;
        let mut fetched = Vec::new();

        if channels.is_empty() {
            match platform.get_feed(FeedSort::New, self.config.feed_limit, None).await {
                Ok(items) => fetched.extend(items),
                Err(e) => warn!(error = %e, "Failed to fetch feed"),
            }
        }
        let feeds = join_all(channels.iter().map(|channel| {
            platform.get_feed(FeedSort::New, self.config.feed_limit, Some(channel.as_str()))
        }))
        .await;
        for (channel, feed) in channels.iter().zip(feeds) {
            match feed {
                Ok(items) => fetched.extend(items),
                Err(e) => warn!(channel = %channel, error = %e, "Failed to fetch channel feed"),
            }
        }

        let mut fresh = Vec::new();
        for item in fetched {
            if self.memory.mark_seen(&item.id)? {
                fresh.push(item);
            }
        }
        Ok(fresh)
    }

    async fn fetch_mentions(&self, platform: &dyn PlatformClient) -> Vec<Mention> {
        platform.get_mentions().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to fetch mentions");
            Vec::new()
        })
    }

    fn state_summary(&self) -> Result<StateSummary> {
        Ok(StateSummary {
            agent_name: self.agent.name().to_string(),
            activity: self.memory.activity_stats()?,
            subscriptions: self.memory.subscribed_names()?,
            last_heartbeat: self.memory.get_config(keys::LAST_HEARTBEAT)?,
            post_quota: self.config.max_posts,
            comment_quota: self.config.max_comments,
            vote_quota: self.config.max_votes,
        })
    }

    /// Run actions in order. Quota is only spent on success, and one failed
    /// action never stops the rest.
    async fn execute(
        &self,
        platform: &dyn PlatformClient,
        actions: Vec<Action>,
        result: &mut HeartbeatResult,
    ) {
        let mut quotas = Quotas::from_config(&self.config);

        for action in actions {
            let kind = action.kind;
            if matches!(kind, ActionKind::Skip | ActionKind::Unknown) {
                debug!(%kind, "Dropping non-executable action");
                continue;
            }
            if !quotas.available(kind) {
                debug!(%kind, "Quota reached, skipping action");
                continue;
            }

            match self.execute_action(platform, &action).await {
                Ok(()) => {
                    quotas.consume(kind);
                    result.record(kind);
                }
                Err(e) => {
                    warn!(%kind, error = %e, "Action failed");
                    result.errors.push(format!("{}: {}", kind, e));
                }
            }
        }
    }

    async fn execute_action(&self, platform: &dyn PlatformClient, action: &Action) -> Result<()> {
        match action.kind {
            ActionKind::Post => self.post(platform, action).await,
            ActionKind::Reply => {
                let item_id = action
                    .item_id
                    .as_deref()
                    .ok_or_else(|| AgentError::InvalidAction("REPLY without post_id".into()))?;
                self.reply(platform, item_id).await
            }
            ActionKind::Upvote => {
                let target = action
                    .vote_target()
                    .ok_or_else(|| AgentError::InvalidAction("UPVOTE without target_id".into()))?;
                platform.upvote(target).await?;
                self.memory
                    .log_activity(ActivityKind::Upvote, json!({ "target_id": target }))?;
                info!(target_id = %target, "Upvoted");
                Ok(())
            }
            ActionKind::Skip | ActionKind::Unknown => Ok(()),
        }
    }

    async fn post(&self, platform: &dyn PlatformClient, action: &Action) -> Result<()> {
        let channel = action
            .channel
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_CHANNEL);
        let topic = action
            .topic
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DEFAULT_TOPIC);

        let draft = self.oracle.generate_post(channel, topic).await;
        let item = platform
            .create_item(channel, &draft.title, &draft.body)
            .await?;
        self.memory.log_activity(
            ActivityKind::Post,
            json!({
                "post_id": item.id,
                "submolt": channel,
                "title": draft.title,
                "content": draft.body,
            }),
        )?;
        info!(item_id = %item.id, channel, "Posted");
        Ok(())
    }

    async fn reply(&self, platform: &dyn PlatformClient, item_id: &str) -> Result<()> {
        let item = platform.get_item(item_id).await?;

        let mut thread = self.memory.conversation(item_id)?;
        if thread.is_empty() {
            let opening = item.content.clone().unwrap_or_else(|| item.title.clone());
            self.memory
                .append_conversation(item_id, Role::Other, &item.author, &opening)?;
            thread = self.memory.conversation(item_id)?;
        }

        let reply = self.oracle.generate_reply(&item, &thread).await;
        let comment = platform.create_reply(item_id, &reply, None).await?;

        self.memory.log_activity(
            ActivityKind::Comment,
            json!({
                "post_id": item_id,
                "comment_id": comment.id,
                "submolt": item.channel,
                "post_title": item.title,
                "content": reply,
            }),
        )?;
        self.memory
            .append_conversation(item_id, Role::Agent, self.agent.name(), &reply)?;
        info!(item_id, comment_id = %comment.id, "Replied");
        Ok(())
    }

    fn discovery_due(&self) -> Result<bool> {
        if !self.config.discovery_enabled {
            return Ok(false);
        }
        let last: Option<String> = self.memory.get_config(keys::LAST_DISCOVERY)?;
        let Some(last) = last.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()) else {
            return Ok(true);
        };
        let elapsed = Utc::now() - last.with_timezone(&Utc);
        Ok(elapsed
            .to_std()
            .map(|elapsed| elapsed >= self.config.discovery_interval())
            .unwrap_or(false))
    }

    /// Subscribe to channels the oracle picks. Failures are logged only.
    async fn discover(&self, platform: &dyn PlatformClient) {
        match self.try_discover(platform).await {
            Ok(added) => {
                if let Err(e) = self.memory.set_config(keys::LAST_DISCOVERY, &memory::now()) {
                    warn!(error = %e, "Failed to record discovery checkpoint");
                }
                debug!(added, "Discovery finished");
            }
            Err(e) => warn!(error = %e, "Channel discovery failed"),
        }
    }

    async fn try_discover(&self, platform: &dyn PlatformClient) -> Result<usize> {
        let current = self.memory.subscribed_names()?;
        let slots = self.config.max_subscriptions.saturating_sub(current.len());
        if slots == 0 {
            return Ok(0);
        }

        let offered: Vec<_> = platform
            .list_channels()
            .await?
            .into_iter()
            .filter(|c| !current.contains(&c.name))
            .collect();
        if offered.is_empty() {
            return Ok(0);
        }

        let mut added = 0;
        for name in self.oracle.pick_channels(&offered, &current, slots).await {
            let Some(channel) = offered.iter().find(|c| c.name == name) else {
                continue;
            };
            let subscribed = self.memory.subscribe(
                &channel.name,
                channel.display_name.as_deref(),
                channel.description.as_deref(),
                SubscriptionSource::Discovered,
            )?;
            if subscribed {
                info!(channel = %channel.name, "Subscribed to discovered channel");
                added += 1;
            }
        }
        Ok(added)
    }

    /// Drop seen ids older than the retention window. Zero keeps them forever.
    fn prune_seen(&self) {
        let days = self.config.seen_retention_days;
        if days == 0 {
            return;
        }
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        if let Err(e) = self.memory.prune_seen(cutoff) {
            warn!(error = %e, "Failed to prune seen items");
        }
    }
}

#[async_trait]
impl HeartbeatTask for HeartbeatOrchestrator {
    async fn run(&self) -> HeartbeatResult {
        self.heartbeat().await
    }
}
