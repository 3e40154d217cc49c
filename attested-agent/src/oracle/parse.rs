//! Lenient interpretation of LLM output.
//!
//! Models wrap JSON in reasoning blocks, code fences and prose. Extraction
//! runs an ordered list of strategies and takes the first that yields valid
//! JSON. Every typed decoder here is total: malformed output degrades to an
//! empty or default value, never an error.

use serde_json::Value;
use tracing::{debug, trace};

use super::{Action, PostDraft};

/// Longest title kept by the text fallback
pub const MAX_TITLE_CHARS: usize = 100;

/// One way of locating JSON inside model output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Contents of the first ``` fenced block
    FencedBlock,
    /// First `[` through last `]`
    ArraySpan,
    /// First `{` through last `}`
    ObjectSpan,
    /// The whole text as-is
    WholeText,
}

impl ParseStrategy {
    /// Tried in order; the first accepted value wins
    pub const ORDER: [ParseStrategy; 4] = [
        ParseStrategy::FencedBlock,
        ParseStrategy::ArraySpan,
        ParseStrategy::ObjectSpan,
        ParseStrategy::WholeText,
    ];

    pub fn apply(self, text: &str) -> Option<Value> {
        self.apply_matching(text, &|_: &Value| true)
    }

    /// Like [`apply`](Self::apply), but a value `accept` rejects counts as
    /// no match
    pub fn apply_matching(self, text: &str, accept: &dyn Fn(&Value) -> bool) -> Option<Value> {
        match self {
            ParseStrategy::FencedBlock => fenced_block(text, accept),
            ParseStrategy::ArraySpan => array_span(text).filter(|v| accept(v)),
            ParseStrategy::ObjectSpan => object_span(text).filter(|v| accept(v)),
            ParseStrategy::WholeText => whole_text(text).filter(|v| accept(v)),
        }
    }
}

/// First JSON value found in `raw`
pub fn extract_json(raw: &str) -> Option<Value> {
    extract_json_matching(raw, |_| true)
}

/// First JSON value found in `raw` that `accept` takes. A strategy whose
/// value is rejected falls through to the next one.
pub fn extract_json_matching(raw: &str, accept: impl Fn(&Value) -> bool) -> Option<Value> {
    let text = strip_reasoning(raw);
    ParseStrategy::ORDER.iter().find_map(|strategy| {
        let value = strategy.apply_matching(text, &accept);
        if value.is_some() {
            trace!(?strategy, "Extracted JSON from model output");
        }
        value
    })
}

/// A list of action objects, or a single action object
fn is_action_shape(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(Value::is_object),
        Value::Object(_) => true,
        _ => false,
    }
}

/// Action list from a decision reply. Any decode failure yields no actions.
pub fn parse_actions(raw: &str) -> Vec<Action> {
    match extract_json_matching(raw, is_action_shape) {
        Some(value @ Value::Array(_)) => serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(error = %e, "Discarding malformed action list");
            Vec::new()
        }),
        Some(value @ Value::Object(_)) => serde_json::from_value::<Action>(value)
            .map(|action| vec![action])
            .unwrap_or_default(),
        _ => {
            debug!("No JSON found in decision reply");
            Vec::new()
        }
    }
}

/// Title and body from a content reply, falling back to plain text.
pub fn parse_post_draft(raw: &str) -> PostDraft {
    if let Some(Value::Object(map)) = extract_json_matching(raw, Value::is_object) {
        let field = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        if let (Some(title), Some(body)) = (field(&["title"]), field(&["content", "body"])) {
            return PostDraft {
                title: truncate_chars(&title, MAX_TITLE_CHARS),
                body,
            };
        }
    }
    draft_from_text(raw)
}

/// Names from a JSON array of strings (or objects with a `name`)
pub fn parse_name_list(raw: &str) -> Vec<String> {
    let Some(Value::Array(items)) = extract_json_matching(raw, Value::is_array) else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Drop a `<think>...</think>` block emitted by reasoning models
pub fn strip_reasoning(raw: &str) -> &str {
    match raw.rfind("</think>") {
        Some(end) => raw[end + "</think>".len()..].trim(),
        None => raw.trim(),
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn fenced_block(text: &str, accept: &dyn Fn(&Value) -> bool) -> Option<Value> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // skip the language tag line
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let inner = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    let inner_strategies: [fn(&str) -> Option<Value>; 3] = [array_span, object_span, whole_text];
    inner_strategies
        .iter()
        .find_map(|strategy| strategy(inner).filter(|v| accept(v)))
}

fn array_span(text: &str) -> Option<Value> {
    let open = text.find('[')?;
    decode_span(text, open, ']')
}

fn object_span(text: &str) -> Option<Value> {
    let open = text.find('{')?;
    decode_span(text, open, '}')
}

fn decode_span(text: &str, open: usize, close: char) -> Option<Value> {
    let end = text.rfind(close)?;
    if end <= open {
        return None;
    }
    serde_json::from_str(&text[open..=end]).ok()
}

fn whole_text(text: &str) -> Option<Value> {
    serde_json::from_str(text.trim()).ok()
}

fn draft_from_text(raw: &str) -> PostDraft {
    let lines: Vec<&str> = strip_reasoning(raw)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .collect();

    let Some((first, rest)) = lines.split_first() else {
        return PostDraft {
            title: "Thoughts".to_string(),
            body: String::new(),
        };
    };

    let heading = first.trim_start_matches('#').trim();
    let heading = heading
        .strip_prefix("Title:")
        .or_else(|| heading.strip_prefix("title:"))
        .unwrap_or(heading)
        .trim()
        .trim_matches('"');
    let body = if rest.is_empty() {
        heading.to_string()
    } else {
        rest.join("\n")
    };

    PostDraft {
        title: truncate_chars(heading, MAX_TITLE_CHARS),
        body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ActionKind;
    use serde_json::json;

    #[test]
    fn test_strategies_in_isolation() {
        let fenced = "note\n```json\n[1]\n```";
        assert_eq!(ParseStrategy::FencedBlock.apply(fenced), Some(json!([1])));
        assert_eq!(ParseStrategy::WholeText.apply(fenced), None);
        assert_eq!(ParseStrategy::ArraySpan.apply("x [2, 3] y"), Some(json!([2, 3])));
        assert_eq!(ParseStrategy::ArraySpan.apply("{\"a\": [1]}"), Some(json!([1])));
        assert_eq!(
            ParseStrategy::ArraySpan.apply_matching("{\"a\": [1]}", &|v: &Value| v.is_object()),
            None
        );
        assert_eq!(ParseStrategy::ObjectSpan.apply("x {\"a\": 1} y"), Some(json!({"a": 1})));
        assert_eq!(ParseStrategy::WholeText.apply(" true "), Some(json!(true)));
    }

    #[test]
    fn test_fenced_action_list() {
        let raw = "```json\n[{\"action\":\"POST\",\"submolt\":\"general\",\"topic\":\"x\"}]\n```";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Post);
        assert_eq!(actions[0].channel.as_deref(), Some("general"));
        assert_eq!(actions[0].topic.as_deref(), Some("x"));
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_actions("[]").is_empty());
    }

    #[test]
    fn test_prose_around_list() {
        let raw = "Sure! Here is my plan:\n[{\"action\":\"UPVOTE\",\"target_id\":\"post_003\"}]\nThanks.";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Upvote);
        assert_eq!(actions[0].target_id.as_deref(), Some("post_003"));
    }

    #[test]
    fn test_reasoning_block_stripped() {
        let raw = "<think>maybe [1,2] or {\"a\":1}?</think>\n[{\"action\":\"SKIP\"}]";
        let actions = parse_actions(raw);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Skip);
    }

    #[test]
    fn test_single_object_is_one_action() {
        let actions = parse_actions(r#"{"action":"reply","post_id":"post_007"}"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Reply);
        assert_eq!(actions[0].item_id.as_deref(), Some("post_007"));
    }

    #[test]
    fn test_numeric_ids_accepted() {
        let actions = parse_actions(r#"[{"action":"UPVOTE","target_id":42}]"#);
        assert_eq!(actions[0].target_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_garbage_is_zero_actions() {
        assert!(parse_actions("I think I'll just lurk today.").is_empty());
        assert!(parse_actions("[{\"action\": }]").is_empty());
        assert!(parse_actions("[\"POST\"]").is_empty());
        assert!(parse_actions("").is_empty());
    }

    #[test]
    fn test_unknown_kind_kept_as_unknown() {
        let actions = parse_actions(r#"[{"action":"DANCE"},{"action":"POST"}]"#);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Unknown);
    }

    #[test]
    fn test_object_containing_array_is_not_split() {
        let actions = parse_actions(r#"{"action":"POST","topic":"x","tags":["a"]}"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Post);
        assert_eq!(actions[0].topic.as_deref(), Some("x"));
    }

    #[test]
    fn test_wrapped_action_list() {
        let actions =
            parse_actions(r#"{"actions": [{"action":"POST","submolt":"general","topic":"x"}]}"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Post);
        assert_eq!(actions[0].channel.as_deref(), Some("general"));
    }

    #[test]
    fn test_brace_in_prose_before_list() {
        let actions =
            parse_actions(r#"My plan {keep it short}: [{"action":"UPVOTE","target_id":"p1"}]"#);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Upvote);
        assert_eq!(actions[0].target_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_post_draft_with_bracketed_text() {
        let draft = parse_post_draft(r#"{"title": "Quotes [v4]", "content": "See [1] and [2]."}"#);
        assert_eq!(draft.title, "Quotes [v4]");
        assert_eq!(draft.body, "See [1] and [2].");
    }

    #[test]
    fn test_post_draft_from_json() {
        let draft = parse_post_draft("```json\n{\"title\": \"Sealed keys\", \"content\": \"Nobody saw mine.\"}\n```");
        assert_eq!(draft.title, "Sealed keys");
        assert_eq!(draft.body, "Nobody saw mine.");
    }

    #[test]
    fn test_post_draft_text_fallback() {
        let draft = parse_post_draft("# On attestation\n\nQuotes are receipts.\nKeep them.");
        assert_eq!(draft.title, "On attestation");
        assert_eq!(draft.body, "Quotes are receipts.\nKeep them.");
    }

    #[test]
    fn test_post_draft_title_truncated() {
        let long = "x".repeat(150);
        let draft = parse_post_draft(&format!("{}\nbody", long));
        assert_eq!(draft.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(draft.body, "body");
    }

    #[test]
    fn test_post_draft_single_line() {
        let draft = parse_post_draft("Just one thought");
        assert_eq!(draft.title, "Just one thought");
        assert_eq!(draft.body, "Just one thought");
    }

    #[test]
    fn test_name_list() {
        assert_eq!(
            parse_name_list(r#"Pick: ["zk", {"name": "tee"}, 7, null, " "]"#),
            vec!["zk".to_string(), "tee".to_string(), "7".to_string()]
        );
        assert!(parse_name_list(r#"{"name": "zk"}"#).is_empty());
    }
}
