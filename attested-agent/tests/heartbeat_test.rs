//! Heartbeat cycle behaviour against the seeded mock platform

mod common;

use attested_agent::config::HeartbeatConfig;
use attested_agent::memory::keys;
use attested_agent::oracle::backend::LlmError;
use attested_agent::platform::{FeedItem, FeedSort, PlatformClient, PlatformError};
use attested_agent::HeartbeatResult;
use common::{quiet_heartbeat, verified};

fn prompts(harness: &common::Harness) -> Vec<String> {
    harness
        .backend
        .requests()
        .iter()
        .filter_map(|r| r.last_user_message().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_seen_items_are_never_presented_twice() {
    let h = verified(quiet_heartbeat()).await;
    h.platform.set_mentions(Vec::new());
    h.backend.push_response("[]");
    h.backend.push_response("[]");

    h.runtime.orchestrator.heartbeat().await;
    let first = prompts(&h);
    assert_eq!(first.len(), 1);
    assert!(first[0].contains("\"post_005\""));

    h.platform.insert_item(FeedItem {
        id: "post_100".into(),
        channel: "privacy".into(),
        author: "EncryptEve".into(),
        title: "Fresh".into(),
        ..Default::default()
    });
    h.runtime.orchestrator.heartbeat().await;

    let second = prompts(&h);
    assert_eq!(second.len(), 2);
    assert!(second[1].contains("\"post_100\""));
    assert!(!second[1].contains("\"post_005\""));
}

#[tokio::test]
async fn test_failed_decision_does_not_replay_items() {
    let h = verified(quiet_heartbeat()).await;
    h.platform.set_mentions(Vec::new());
    h.backend.push_error(LlmError::Timeout(120));

    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result.errors.len(), 1);

    // everything was marked seen before the failed call
    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result, HeartbeatResult::default());
    assert_eq!(h.backend.call_count(), 1);
}

#[tokio::test]
async fn test_post_quota_is_enforced() {
    let h = verified(HeartbeatConfig {
        max_posts: 2,
        discovery_enabled: false,
        ..Default::default()
    })
    .await;
    h.backend.push_response(
        r#"[
            {"action": "POST", "submolt": "general", "topic": "a"},
            {"action": "UPVOTE", "target_id": "post_001"},
            {"action": "POST", "submolt": "privacy", "topic": "b"},
            {"action": "POST", "submolt": "crypto", "topic": "c"},
            {"action": "UPVOTE", "target_id": "post_002"},
            {"action": "POST", "topic": "d"},
            {"action": "POST", "topic": "e"}
        ]"#,
    );

    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result.posts_created, 2);
    assert_eq!(result.votes_cast, 2);
    assert!(result.errors.is_empty());

    let authored = h.platform.authored_items();
    assert_eq!(authored.len(), 2);
    assert_eq!(authored[0].channel, "general");
    assert_eq!(authored[0].title, "Sealed by default");
    assert_eq!(authored[1].channel, "privacy");
    assert_eq!(h.runtime.memory.activity_stats().unwrap().posts, 2);
}

#[tokio::test]
async fn test_failed_actions_do_not_stop_the_rest() {
    let h = verified(quiet_heartbeat()).await;
    h.backend.push_response(
        r#"[
            {"action": "UPVOTE", "target_id": "post_001"},
            {"action": "POST", "submolt": "general", "topic": "rate limits"},
            {"action": "UPVOTE", "target_id": "post_999"},
            {"action": "UPVOTE", "target_id": "post_002"},
            {"action": "UPVOTE", "post_id": "post_003"}
        ]"#,
    );
    h.platform.fail_next(
        "create_item",
        PlatformError::RateLimited {
            retry_after_secs: 1800,
        },
    );

    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result.posts_created, 0);
    assert_eq!(result.votes_cast, 3);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("Rate limited"));
    assert!(result.errors[1].contains("post_999"));
    assert_eq!(h.platform.vote_on("post_003"), Some(1));
}

#[tokio::test]
async fn test_empty_cycle_still_checkpoints() {
    let h = verified(quiet_heartbeat()).await;
    h.platform.set_mentions(Vec::new());
    h.backend.push_response("[]");
    h.runtime.orchestrator.heartbeat().await;
    let first: String = h
        .runtime
        .memory
        .get_config(keys::LAST_HEARTBEAT)
        .unwrap()
        .unwrap();
    let calls = h.backend.call_count();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let result = h.runtime.orchestrator.heartbeat().await;

    assert_eq!(result, HeartbeatResult::default());
    assert_eq!(h.backend.call_count(), calls);
    let second: String = h
        .runtime
        .memory
        .get_config(keys::LAST_HEARTBEAT)
        .unwrap()
        .unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_fenced_decision_creates_one_post() {
    let h = verified(quiet_heartbeat()).await;
    h.backend.push_response(
        "```json\n[{\"action\":\"POST\",\"submolt\":\"general\",\"topic\":\"x\"}]\n```",
    );

    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result.posts_created, 1);
    assert_eq!(result.total_actions(), 1);
    assert!(result.errors.is_empty());

    let general = h
        .platform
        .get_feed(FeedSort::New, 50, Some("general"))
        .await
        .unwrap();
    assert!(general.iter().any(|item| item.author == "reef"));

    // the content prompt carried the topic
    let prompts = prompts(&h);
    assert!(prompts[1].contains("general submolt about: x"));
}

#[tokio::test]
async fn test_empty_array_decision_is_a_clean_no_op() {
    let h = verified(quiet_heartbeat()).await;
    h.backend.push_response("[]");

    let result = h.runtime.orchestrator.heartbeat().await;
    assert_eq!(result, HeartbeatResult::default());
    assert_eq!(h.backend.call_count(), 1);
    assert!(h.platform.authored_items().is_empty());
    assert!(h
        .runtime
        .memory
        .get_config::<String>(keys::LAST_HEARTBEAT)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_mentions_are_presented_every_cycle() {
    let h = verified(quiet_heartbeat()).await;
    h.backend.push_response("[]");
    h.backend.push_response("[]");
    h.runtime.orchestrator.heartbeat().await;
    h.runtime.orchestrator.heartbeat().await;

    let prompts = prompts(&h);
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("mention_001"));
}
