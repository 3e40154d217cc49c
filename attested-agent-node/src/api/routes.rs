//! API route handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::warn;

use attested_agent::attestation::AttestationBundle;
use attested_agent::heartbeat::HeartbeatResult;
use attested_agent::identity::BirthCertificate;
use attested_agent::memory::{ActivityEntry, MemoryExport};
use attested_agent::platform::{FeedItem, FeedSort};
use attested_agent::{AgentConfig, AgentStats, LifecycleState};

use super::AppContext;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

fn internal(e: impl Display) -> (StatusCode, String) {
    warn!(error = %e, "API request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<HeartbeatResult>,
}

/// Agent status; which fields are present depends on the lifecycle state
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub state: LifecycleState,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AgentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStatus>,
}

/// GET /api/status
pub async fn api_status(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    let runtime = &ctx.runtime;
    let lifecycle = runtime.agent.lifecycle().await;

    let mut response = StatusResponse {
        name: runtime.agent.name().to_string(),
        state: lifecycle.state,
        model: runtime.oracle.model().to_string(),
        claim_url: None,
        verification_code: None,
        error: None,
        stats: None,
        scheduler: None,
    };

    match lifecycle.state {
        LifecycleState::Registered => {
            response.claim_url = lifecycle.claim_url;
            response.verification_code = lifecycle.verification_code;
        }
        LifecycleState::Error => response.error = lifecycle.error,
        LifecycleState::Verified => {
            let scheduler = &runtime.scheduler;
            response.stats = Some(runtime.agent.stats().await.map_err(internal)?);
            response.scheduler = Some(SchedulerStatus {
                running: scheduler.is_running(),
                interval_secs: scheduler.interval().as_secs(),
                next_run: scheduler.next_run_time().await,
                last_run: scheduler.last_run_time().await,
                last_result: scheduler.last_result().await,
            });
        }
        _ => {}
    }

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct VerificationResponse {
    pub verified: bool,
    pub state: LifecycleState,
}

/// POST /api/check-verification
pub async fn api_check_verification(
    State(ctx): State<AppContext>,
) -> ApiResult<VerificationResponse> {
    let agent = &ctx.runtime.agent;
    let verified = agent.check_verification().await.map_err(internal)?;
    Ok(Json(VerificationResponse {
        verified,
        state: agent.state().await,
    }))
}

/// GET /api/activity?limit=N
pub async fn api_activity(
    State(ctx): State<AppContext>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<ActivityEntry>> {
    ctx.runtime
        .memory
        .recent_activity(query.limit())
        .map(Json)
        .map_err(internal)
}

/// A feed item plus whether the agent has already evaluated it
#[derive(Debug, Serialize)]
pub struct AnnotatedItem {
    #[serde(flatten)]
    pub item: FeedItem,
    pub seen: bool,
}

/// GET /api/feed?limit=N
pub async fn api_feed(
    State(ctx): State<AppContext>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Vec<AnnotatedItem>> {
    let Some(platform) = ctx.runtime.agent.platform().await else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "agent is not registered".to_string(),
        ));
    };

    let items = platform
        .get_feed(FeedSort::Hot, query.limit(), None)
        .await
        .map_err(|e| {
            warn!(error = %e, "Feed fetch failed");
            (StatusCode::BAD_GATEWAY, e.to_string())
        })?;

    let memory = &ctx.runtime.memory;
    let mut annotated = Vec::with_capacity(items.len());
    for item in items {
        let seen = memory.is_seen(&item.id).map_err(internal)?;
        annotated.push(AnnotatedItem { item, seen });
    }
    Ok(Json(annotated))
}

/// GET /api/memory
pub async fn api_memory(State(ctx): State<AppContext>) -> ApiResult<MemoryExport> {
    ctx.runtime.memory.export_state().map(Json).map_err(internal)
}

/// GET /api/config (secrets are never serialized)
pub async fn api_config(State(ctx): State<AppContext>) -> Json<AgentConfig> {
    Json(ctx.runtime.config.clone())
}

/// GET /api/attestation - fresh evidence from the enclave
pub async fn api_attestation(State(ctx): State<AppContext>) -> Json<AttestationBundle> {
    Json(ctx.runtime.attestation.collect().await)
}

/// GET /api/birth-certificate
pub async fn api_birth_certificate(State(ctx): State<AppContext>) -> ApiResult<BirthCertificate> {
    match ctx.runtime.agent.birth_certificate().map_err(internal)? {
        Some(certificate) => Ok(Json(certificate)),
        None => Err((
            StatusCode::NOT_FOUND,
            "no birth certificate issued".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    use attested_agent::attestation::{AttestationProvider, FetchOutcome};
    use attested_agent::oracle::backend::MockBackend;
    use attested_agent::platform::{MockConnector, MockPlatformClient};
    use attested_agent::{AgentRuntime, MemoryStore};

    struct NoAttestation;

    #[async_trait]
    impl AttestationProvider for NoAttestation {
        async fn collect(&self) -> AttestationBundle {
            AttestationBundle::assemble(
                FetchOutcome::Failed("offline".into()),
                FetchOutcome::Failed("offline".into()),
            )
        }
    }

    fn runtime(platform: Arc<MockPlatformClient>) -> Arc<AgentRuntime> {
        let config = AgentConfig {
            agent_name: "reef".into(),
            credential_seal_key: Some("11".repeat(32)),
            ..Default::default()
        };
        Arc::new(
            AgentRuntime::assemble(
                config,
                Arc::new(MemoryStore::open_in_memory().unwrap()),
                Arc::new(MockConnector::new(platform)),
                Arc::new(NoAttestation),
                Arc::new(MockBackend::new("mock").with_response("[]")),
            )
            .unwrap(),
        )
    }

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, String) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn json(app: &Router, method: &str, uri: &str) -> Value {
        let (status, body) = call(app, method, uri).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(AppContext::new(runtime(Arc::new(
            MockPlatformClient::seeded("reef"),
        ))));
        let (status, body) = call(&app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_status_follows_lifecycle() {
        let platform = Arc::new(MockPlatformClient::seeded("reef"));
        let runtime = runtime(platform.clone());
        let app = create_router(AppContext::new(runtime.clone()));

        let booting = json(&app, "GET", "/api/status").await;
        assert_eq!(booting["state"], "booting");
        assert!(booting.get("stats").is_none());

        runtime.agent.boot().await.unwrap();
        let registered = json(&app, "GET", "/api/status").await;
        assert_eq!(registered["state"], "registered");
        assert!(registered["claim_url"].as_str().is_some());
        assert!(registered.get("stats").is_none());

        let check = json(&app, "POST", "/api/check-verification").await;
        assert_eq!(check["verified"], false);

        platform.set_claimed(true);
        let check = json(&app, "POST", "/api/check-verification").await;
        assert_eq!(check["verified"], true);
        assert_eq!(check["state"], "verified");

        let verified = json(&app, "GET", "/api/status").await;
        assert_eq!(verified["state"], "verified");
        assert!(verified.get("claim_url").is_none());
        assert_eq!(verified["stats"]["name"], "reef");
        assert_eq!(verified["scheduler"]["running"], false);
    }

    #[tokio::test]
    async fn test_credential_never_served() {
        let platform = Arc::new(MockPlatformClient::seeded("reef"));
        let runtime = runtime(platform);
        runtime.agent.boot().await.unwrap();
        let app = create_router(AppContext::new(runtime.clone()));

        let certificate = runtime.agent.birth_certificate().unwrap().unwrap();
        assert!(certificate.verify());

        for uri in [
            "/api/status",
            "/api/memory",
            "/api/config",
            "/api/activity",
            "/api/birth-certificate",
        ] {
            let (status, body) = call(&app, "GET", uri).await;
            assert_eq!(status, StatusCode::OK, "{}", uri);
            assert!(!body.contains("mock_"), "{} leaked the credential", uri);
            assert!(!body.contains(&"11".repeat(32)), "{} leaked the seal key", uri);
        }

        let memory = json(&app, "GET", "/api/memory").await;
        assert!(memory["config"].get("credential").is_none());
        assert!(memory["config"].get("birth_certificate").is_some());
    }

    #[tokio::test]
    async fn test_birth_certificate_missing_before_registration() {
        let app = create_router(AppContext::new(runtime(Arc::new(
            MockPlatformClient::seeded("reef"),
        ))));
        let (status, _) = call(&app, "GET", "/api/birth-certificate").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_feed_marks_seen_items() {
        let platform = Arc::new(MockPlatformClient::seeded("reef"));
        let runtime = runtime(platform);
        let app = create_router(AppContext::new(runtime.clone()));

        let (status, _) = call(&app, "GET", "/api/feed").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        runtime.agent.boot().await.unwrap();
        runtime.memory.mark_seen("post_001").unwrap();

        let feed = json(&app, "GET", "/api/feed?limit=50").await;
        let items = feed.as_array().unwrap();
        assert_eq!(items.len(), 12);
        for item in items {
            let seen = item["seen"].as_bool().unwrap();
            assert_eq!(seen, item["id"] == "post_001");
        }

        let feed = json(&app, "GET", "/api/feed?limit=3").await;
        assert_eq!(feed.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_activity_and_attestation() {
        let runtime = runtime(Arc::new(MockPlatformClient::seeded("reef")));
        let app = create_router(AppContext::new(runtime));

        let activity = json(&app, "GET", "/api/activity?limit=5").await;
        assert!(activity.as_array().unwrap().is_empty());

        let attestation = json(&app, "GET", "/api/attestation").await;
        assert_eq!(attestation["verified"], false);
    }
}
