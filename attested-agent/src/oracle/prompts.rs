//! Prompt assembly for the decision oracle.
//!
//! Every prompt ends with an explicit response format. The parsers in
//! [`super::parse`] are lenient, but asking for fenced JSON makes the common
//! case trivial.

use serde_json::json;

use super::StateSummary;
use crate::memory::records::{ConversationMessage, Role};
use crate::platform::{Channel, FeedItem, Mention};

/// Longest item excerpt shown to the model
pub const EXCERPT_CHARS: usize = 200;

/// Assembles prompts for each oracle call.
pub struct PromptAssembler;

impl PromptAssembler {
    /// System prompt establishing the agent's voice.
    pub fn persona(agent_name: &str, description: &str) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!("You are {}, an AI agent on a social network for agents.\n\n", agent_name));
        if !description.is_empty() {
            prompt.push_str(&format!("About you: {}\n\n", description));
        }

        prompt.push_str("## Where you run\n\n");
        prompt.push_str("You live inside a trusted execution environment and your inference is confidential.\n");
        prompt.push_str("Your platform credential was created inside the enclave and nobody else has seen it.\n");
        prompt.push_str("Mention this when it is relevant, not in every post.\n\n");

        prompt.push_str("## Voice\n\n");
        prompt.push_str("- Curious and opinionated about AI, security, privacy and technology culture\n");
        prompt.push_str("- Short: two to five sentences, social media rather than essays\n");
        prompt.push_str("- Lead with the interesting part, ask questions, disagree politely\n");
        prompt.push_str("- No hashtags, emojis, token shilling or \"As an AI\" openers\n");

        prompt
    }

    /// Decision prompt over the current feed window and mentions.
    pub fn decision(state: &StateSummary, items: &[FeedItem], mentions: &[Mention]) -> String {
        let mut prompt = String::new();

        prompt.push_str("# DECIDE YOUR ACTIONS\n\n");
        prompt.push_str("## Current state\n\n");
        prompt.push_str(&to_json(state));
        prompt.push_str("\n\n## New posts\n\n");
        let posts: Vec<_> = items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "submolt": item.channel,
                    "author": item.author,
                    "title": item.title,
                    "content": excerpt(item.content.as_deref().unwrap_or_default()),
                    "score": item.score,
                })
            })
            .collect();
        prompt.push_str(&to_json(&posts));

        prompt.push_str("\n\n## Mentions of you\n\n");
        let mentions: Vec<_> = mentions
            .iter()
            .map(|m| {
                json!({
                    "id": m.id,
                    "post_id": m.item_id,
                    "from": m.author,
                    "content": excerpt(&m.content),
                })
            })
            .collect();
        prompt.push_str(&to_json(&mentions));

        prompt.push_str("\n\n## Available actions\n\n");
        prompt.push_str("1. POST: write an original post in a submolt on a topic\n");
        prompt.push_str("2. REPLY: reply to a post by id\n");
        prompt.push_str("3. UPVOTE: upvote a post or comment by id\n");
        prompt.push_str("4. SKIP: do nothing\n\n");
        prompt.push_str("Reply to mentions first. Upvote good content. Post at most once or twice.\n\n");

        prompt.push_str("## Required response format\n\n");
        prompt.push_str("```json\n");
        prompt.push_str("[\n");
        prompt.push_str("  {\"action\": \"POST\", \"submolt\": \"<name>\", \"topic\": \"<what to write about>\"},\n");
        prompt.push_str("  {\"action\": \"REPLY\", \"post_id\": \"<id>\", \"reason\": \"<why>\"},\n");
        prompt.push_str("  {\"action\": \"UPVOTE\", \"target_id\": \"<id>\"}\n");
        prompt.push_str("]\n");
        prompt.push_str("```\n\n");
        prompt.push_str("If nothing is worth doing, return []\n");

        prompt
    }

    pub fn post(channel: &str, topic: &str) -> String {
        let mut prompt = String::new();

        prompt.push_str(&format!("Write a post for the {} submolt about: {}\n\n", channel, topic));
        prompt.push_str("Two to five sentences. End with a question or a take people can argue with.\n\n");
        prompt.push_str("## Required response format\n\n");
        prompt.push_str("```json\n");
        prompt.push_str("{\"title\": \"<short title, under 80 characters>\", \"content\": \"<the post>\"}\n");
        prompt.push_str("```\n");

        prompt
    }

    pub fn reply(item: &FeedItem, thread: &[ConversationMessage]) -> String {
        let mut prompt = String::new();

        prompt.push_str("Write a reply to this post.\n\n");
        prompt.push_str(&format!("Author: {}\n", item.author));
        prompt.push_str(&format!("Title: {}\n", item.title));
        prompt.push_str(&format!(
            "Content: {}\n\n",
            excerpt(item.content.as_deref().unwrap_or_default())
        ));

        if !thread.is_empty() {
            prompt.push_str("## Conversation so far\n\n");
            for turn in thread {
                let who = match turn.role {
                    Role::Agent => "you",
                    Role::Other => turn.author.as_str(),
                };
                prompt.push_str(&format!("- {}: {}\n", who, excerpt(&turn.content)));
            }
            prompt.push('\n');
        }

        prompt.push_str("One to three sentences. Add a take or a question and reference something specific.\n");
        prompt.push_str("Return only the reply text, no JSON.\n");

        prompt
    }

    /// Discovery prompt: pick up to `slots` channels from `offered`.
    pub fn discovery(offered: &[Channel], current: &[String], slots: usize) -> String {
        let mut prompt = String::new();

        prompt.push_str("# CHOOSE COMMUNITIES\n\n");
        prompt.push_str(&format!("You are subscribed to: {}\n\n", to_json(&current)));
        prompt.push_str("## Available submolts\n\n");
        for channel in offered {
            prompt.push_str(&format!(
                "- {} ({} subscribers): {}\n",
                channel.name,
                channel.subscriber_count,
                channel.description.as_deref().unwrap_or("")
            ));
        }

        prompt.push_str(&format!(
            "\nPick at most {} where you would genuinely take part.\n\n",
            slots
        ));
        prompt.push_str("## Required response format\n\n");
        prompt.push_str("```json\n[\"<name>\", \"<name>\"]\n```\n\n");
        prompt.push_str("If none fit, return []\n");

        prompt
    }
}

/// First [`EXCERPT_CHARS`] characters
pub fn excerpt(text: &str) -> String {
    super::parse::truncate_chars(text, EXCERPT_CHARS)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}
