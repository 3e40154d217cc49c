//! HTTP platform client.
//!
//! Responses arrive either bare or wrapped in an envelope
//! (`{"posts": [...]}`, `{"post": {...}}`); both are accepted.
//!
//! Ids and channel names are placed into the URL as single percent-encoded
//! path segments, so a value like `../agents/me` cannot change the endpoint.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    AgentProfile, Channel, ClaimStatus, Comment, FeedItem, FeedSort, Mention, PlatformClient,
    PlatformConnector, PlatformError, Registration, SearchResult,
};
use crate::identity::Credential;

/// Seconds to wait when a 429 carries no hint
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Longest error body echoed into an error message
const ERROR_BODY_PREVIEW: usize = 200;

/// Authenticated client for the platform REST API
pub struct HttpPlatformClient {
    client: Client,
    base_url: Url,
    credential: Credential,
}

impl std::fmt::Debug for HttpPlatformClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPlatformClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpPlatformClient {
    pub fn new(
        base_url: &str,
        credential: Credential,
        timeout: Duration,
    ) -> Result<Self, PlatformError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            credential,
        })
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, PlatformError> {
        let url = endpoint(&self.base_url, segments)?;
        let path = url.path().to_string();
        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(self.credential.expose());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(%method, path, "Platform request");
        let response = request
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.without_url().to_string()))?;
        read_response(response, &path).await
    }

    async fn get_as<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        envelope: &str,
    ) -> Result<T, PlatformError> {
        let value = self.request(Method::GET, segments, query, None).await?;
        decode(unwrap_envelope(value, envelope))
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, PlatformError> {
    let url = Url::parse(base_url)
        .map_err(|e| PlatformError::InvalidRequest(format!("bad base URL: {}", e)))?;
    if url.cannot_be_a_base() {
        return Err(PlatformError::InvalidRequest(format!(
            "{} cannot be a base URL",
            url
        )));
    }
    Ok(url)
}

/// `base` with `segments` appended, each percent-encoded as one segment
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, PlatformError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PlatformError::InvalidRequest(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Dot segments would be dropped by the URL encoder, shifting the endpoint
fn id_segment(id: &str) -> Result<&str, PlatformError> {
    match id.trim() {
        "" | "." | ".." => Err(PlatformError::InvalidRequest(format!("invalid id {:?}", id))),
        _ => Ok(id),
    }
}

fn build_client(timeout: Duration) -> Result<Client, PlatformError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PlatformError::Network(format!("Failed to create HTTP client: {}", e)))
}

async fn read_response(response: reqwest::Response, path: &str) -> Result<Value, PlatformError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let retry_after_secs = retry_after_secs(&body);
        warn!(path, retry_after_secs, "Rate limited by platform");
        return Err(PlatformError::RateLimited { retry_after_secs });
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(PlatformError::Unauthorized);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(PlatformError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlatformError::Status {
            status: status.as_u16(),
            path: path.to_string(),
            message: body.chars().take(ERROR_BODY_PREVIEW).collect(),
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| PlatformError::Network(e.without_url().to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| PlatformError::InvalidResponse(e.to_string()))
}

/// Retry hint from a 429 body: minutes take precedence over seconds
fn retry_after_secs(body: &Value) -> u64 {
    if let Some(minutes) = body.get("retry_after_minutes").and_then(Value::as_u64) {
        return minutes * 60;
    }
    body.get("retry_after_seconds")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

fn unwrap_envelope(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, PlatformError> {
    serde_json::from_value(value).map_err(|e| PlatformError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn get_me(&self) -> Result<AgentProfile, PlatformError> {
        let value = self.request(Method::GET, &["agents", "me"], &[], None).await?;
        let mut profile: AgentProfile = decode(unwrap_envelope(value.clone(), "agent"))?;
        // the claim flag is sometimes reported only as a status string
        let envelope = unwrap_envelope(value, "agent");
        if envelope.get("status").and_then(Value::as_str) == Some("claimed") {
            profile.claimed = true;
        }
        Ok(profile)
    }

    async fn get_status(&self) -> Result<ClaimStatus, PlatformError> {
        self.get_as(&["agents", "status"], &[], "agent").await
    }

    async fn get_feed(
        &self,
        sort: FeedSort,
        limit: usize,
        channel: Option<&str>,
    ) -> Result<Vec<FeedItem>, PlatformError> {
        let query = [("sort", sort.as_str().to_string()), ("limit", limit.to_string())];
        match channel {
            Some(channel) => {
                self.get_as(&["submolts", id_segment(channel)?, "feed"], &query, "posts")
                    .await
            }
            None => self.get_as(&["feed"], &query, "posts").await,
        }
    }

    async fn get_item(&self, id: &str) -> Result<FeedItem, PlatformError> {
        self.get_as(&["posts", id_segment(id)?], &[], "post").await
    }

    async fn create_item(
        &self,
        channel: &str,
        title: &str,
        content: &str,
    ) -> Result<FeedItem, PlatformError> {
        let body = json!({"submolt": channel, "title": title, "content": content});
        let value = self.request(Method::POST, &["posts"], &[], Some(body)).await?;
        let item: FeedItem = decode(unwrap_envelope(value, "post"))?;
        info!(item_id = %item.id, channel, "Created post");
        Ok(item)
    }

    async fn get_comments(&self, item_id: &str) -> Result<Vec<Comment>, PlatformError> {
        let query = [("sort", "best".to_string())];
        self.get_as(&["posts", id_segment(item_id)?, "comments"], &query, "comments")
            .await
    }

    async fn create_reply(
        &self,
        item_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, PlatformError> {
        let mut body = json!({"content": content});
        if let Some(parent) = parent_id {
            body["parent_id"] = json!(parent);
        }
        let segments = ["posts", id_segment(item_id)?, "comments"];
        let value = self.request(Method::POST, &segments, &[], Some(body)).await?;
        let mut comment: Comment = decode(unwrap_envelope(value, "comment"))?;
        if comment.item_id.is_empty() {
            comment.item_id = item_id.to_string();
        }
        info!(item_id, "Created comment");
        Ok(comment)
    }

    async fn upvote(&self, target_id: &str) -> Result<(), PlatformError> {
        let target = id_segment(target_id)?;
        match self
            .request(Method::POST, &["posts", target, "upvote"], &[], None)
            .await
        {
            Ok(_) => Ok(()),
            Err(PlatformError::NotFound(_)) => {
                // not a post; try it as a comment
                self.request(Method::POST, &["comments", target, "upvote"], &[], None)
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn downvote(&self, target_id: &str) -> Result<(), PlatformError> {
        let segments = ["posts", id_segment(target_id)?, "downvote"];
        self.request(Method::POST, &segments, &[], None)
            .await
            .map(|_| ())
    }

    async fn list_channels(&self) -> Result<Vec<Channel>, PlatformError> {
        self.get_as(&["submolts"], &[], "submolts").await
    }

    async fn get_channel(&self, name: &str) -> Result<Channel, PlatformError> {
        self.get_as(&["submolts", id_segment(name)?], &[], "submolt").await
    }

    /// Mentions are found by searching for `@name`; there is no dedicated endpoint.
    async fn get_mentions(&self) -> Result<Vec<Mention>, PlatformError> {
        let me = self.get_me().await?;
        let results = self.search(&format!("@{}", me.name), 20).await?;
        Ok(results
            .into_iter()
            .map(|result| Mention {
                item_id: Some(result.item_id.unwrap_or_else(|| result.id.clone())),
                id: result.id,
                comment_id: None,
                author: result.author,
                content: result.content.or(result.title).unwrap_or_default(),
                created_at: result.created_at,
            })
            .collect())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, PlatformError> {
        let params = [
            ("q", query.to_string()),
            ("type", "all".to_string()),
            ("limit", limit.to_string()),
        ];
        self.get_as(&["search"], &params, "results").await
    }
}

/// Registers agents over HTTP and builds authenticated clients
pub struct HttpConnector {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PlatformError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            timeout,
        })
    }
}

#[async_trait]
impl PlatformConnector for HttpConnector {
    async fn register(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Registration, PlatformError> {
        let url = endpoint(&self.base_url, &["agents", "register"])?;
        let path = url.path().to_string();
        let response = self
            .client
            .post(url)
            .json(&json!({"name": name, "description": description}))
            .send()
            .await
            .map_err(|e| PlatformError::Network(e.without_url().to_string()))?;
        let value = unwrap_envelope(read_response(response, &path).await?, "agent");

        let credential = value
            .get("api_key")
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(Credential::new)
            .ok_or_else(|| {
                PlatformError::InvalidResponse("registration response has no api_key".into())
            })?;
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Registration {
            credential,
            claim_url: text("claim_url"),
            verification_code: text("verification_code"),
        })
    }

    fn connect(&self, credential: &Credential) -> Result<Arc<dyn PlatformClient>, PlatformError> {
        Ok(Arc::new(HttpPlatformClient {
            client: build_client(self.timeout)?,
            base_url: self.base_url.clone(),
            credential: credential.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpPlatformClient {
        HttpPlatformClient::new(
            &server.uri(),
            Credential::new("tok_abc"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_retry_after_hint() {
        assert_eq!(retry_after_secs(&json!({"retry_after_minutes": 2})), 120);
        assert_eq!(retry_after_secs(&json!({"retry_after_seconds": 15})), 15);
        assert_eq!(retry_after_secs(&Value::Null), DEFAULT_RETRY_AFTER_SECS);
    }

    #[test]
    fn test_debug_hides_credential() {
        let client = HttpPlatformClient::new(
            "https://example.com",
            Credential::new("tok_secret"),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!format!("{:?}", client).contains("tok_secret"));
    }

    #[tokio::test]
    async fn test_feed_with_envelope_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/submolts/privacy/feed"))
            .and(query_param("sort", "new"))
            .and(query_param("limit", "5"))
            .and(header("authorization", "Bearer tok_abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "posts": [
                    {"id": "p1", "submolt": {"name": "privacy"}, "author": {"name": "CryptoSage"}, "title": "TEEs"},
                    {"id": 2, "submolt": "privacy", "author": "DataWeaver", "title": "ZK", "score": 4}
                ]
            })))
            .mount(&server)
            .await;

        let items = client(&server)
            .get_feed(FeedSort::New, 5, Some("privacy"))
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].author, "CryptoSage");
        assert_eq!(items[1].id, "2");
        assert_eq!(items[1].score, 4);
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"retry_after_minutes": 30})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .create_item("general", "t", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::RateLimited { retry_after_secs: 1800 }));
    }

    #[tokio::test]
    async fn test_create_item_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts"))
            .and(body_json(json!({"submolt": "general", "title": "Hi", "content": "Body"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "success": true,
                "post": {"id": "p9", "submolt": "general", "title": "Hi", "content": "Body"}
            })))
            .mount(&server)
            .await;

        let item = client(&server).create_item("general", "Hi", "Body").await.unwrap();
        assert_eq!(item.id, "p9");
        assert_eq!(item.content.as_deref(), Some("Body"));
    }

    #[tokio::test]
    async fn test_upvote_falls_back_to_comment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts/c7/upvote"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/comments/c7/upvote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).upvote("c7").await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_stay_inside_their_segment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/posts/..%2Fagents%2Fme/upvote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/agents/me"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        client(&server).upvote("../agents/me").await.unwrap();
    }

    #[tokio::test]
    async fn test_dot_ids_rejected_before_sending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.downvote("..").await,
            Err(PlatformError::InvalidRequest(_))
        ));
        assert!(matches!(
            client.create_reply("", "hi", None).await,
            Err(PlatformError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = parse_base_url("https://example.com/api/v1/").unwrap();
        let url = endpoint(&base, &["submolts", "a b/c", "feed"]).unwrap();
        assert_eq!(url.as_str(), "https://example.com/api/v1/submolts/a%20b%2Fc/feed");
        assert!(matches!(
            parse_base_url("mailto:x@example.com"),
            Err(PlatformError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_mentions_via_search() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/agents/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agent": {"name": "reef-12", "status": "claimed"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "@reef-12"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "p3", "type": "post", "author": {"name": "ZKProofie"}, "content": "hey @reef-12"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.get_me().await.unwrap().claimed);

        let mentions = client.get_mentions().await.unwrap();
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].item_id.as_deref(), Some("p3"));
        assert_eq!(mentions[0].author, "ZKProofie");
    }

    #[tokio::test]
    async fn test_register() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agents/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "agent": {
                    "api_key": "tok_abc",
                    "claim_url": "https://claim/xyz",
                    "verification_code": "reef-12"
                }
            })))
            .mount(&server)
            .await;

        let connector = HttpConnector::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let registration = connector.register("reef", "desc").await.unwrap();
        assert_eq!(registration.credential.expose(), "tok_abc");
        assert_eq!(registration.claim_url.as_deref(), Some("https://claim/xyz"));
        assert_eq!(registration.verification_code.as_deref(), Some("reef-12"));
    }

    #[tokio::test]
    async fn test_register_without_key_fails_without_echo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agents/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "reef"})))
            .mount(&server)
            .await;

        let connector = HttpConnector::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = connector.register("reef", "desc").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidResponse(_)));
    }
}
