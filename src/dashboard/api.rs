//! Backend REST client.
//!
//! Every call resolves the session identity first and fails with
//! `IdentityUnavailable` before touching the network. The identity then rides
//! along three ways: `?fingerprint=` query parameter, `fingerprint` header, and
//! `fingerprint` + `id` fields merged into any JSON body.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use super::errors::DashboardError;
use super::identity::Session;
use super::messages::CallbackPayload;
use super::types::{AuthUrlResponse, BotDraft, BotRecord, IdentityTag, LinkedAccount, Tagged};

// ─────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────

pub const DEFAULT_API_BASE_URL: &str = "https://twitter-ai-backend-b805ba3ec401.herokuapp.com/api";
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Query parameter and header carrying the identity.
pub const IDENTITY_PARAM: &str = "fingerprint";

/// Backend message meaning "this wallet has no bot yet".
pub const NO_BOT_MESSAGE: &str = "No bot found for this browser";

const FALLBACK_ERROR: &str = "API call failed";

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
        }
    }
}

impl BackendConfig {
    pub fn from_env() -> Self {
        let mut c = Self::default();
        if let Ok(v) = std::env::var("BOTDECK_API_BASE_URL") { if !v.trim().is_empty() { c.base_url = v.trim().to_string(); } }
        if let Ok(v) = std::env::var("BOTDECK_HTTP_TIMEOUT_MS") { if let Ok(ms) = v.parse() { c.timeout_ms = ms; } }
        c
    }
}

// ─────────────────────────────────────────────────────────
// Backend seam
// ─────────────────────────────────────────────────────────

/// The bot backend as the dashboard consumes it. Every response carries the
/// tag of the identity it was requested under.
#[async_trait]
pub trait BotBackend: Send + Sync {
    /// `GET /bots/my`. `None` when this wallet has no bot yet.
    async fn my_bot(&self) -> Result<Tagged<Option<BotRecord>>, DashboardError>;
    /// `POST /bots`.
    async fn create_bot(&self, draft: &BotDraft) -> Result<Tagged<Value>, DashboardError>;
    /// `PATCH /bots/my`.
    async fn update_bot(&self, draft: &BotDraft) -> Result<Tagged<Value>, DashboardError>;
    /// `POST /bots/my/activate` or `/bots/my/deactivate`.
    async fn set_active(&self, active: bool) -> Result<Tagged<Value>, DashboardError>;
    /// `GET /twitter/auth`, yielding the third-party authorization URL.
    async fn twitter_auth_url(&self) -> Result<Tagged<String>, DashboardError>;
    /// `GET /twitter/callback?oauth_token&oauth_verifier`.
    async fn twitter_callback(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Tagged<LinkedAccount>, DashboardError>;
    /// `PATCH /bots/my` nulling the stored Twitter credentials and account id.
    async fn unlink_twitter(&self) -> Result<Tagged<Value>, DashboardError>;
}

// ─────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────

pub struct BackendClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
    session: Arc<Session>,
}

impl BackendClient {
    pub fn new(cfg: &BackendConfig, session: Arc<Session>) -> Result<Self, DashboardError> {
        Ok(Self {
            base_url: normalize_base_url(&cfg.base_url)?,
            timeout: Duration::from_millis(cfg.timeout_ms),
            http: reqwest::Client::new(),
            session,
        })
    }

    /// Resolve identity, then send. Nothing leaves the process without one.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<Tagged<T>, DashboardError> {
        let tag = self.session.resolve_identity()?;
        let value = self.send(&tag, method, endpoint, query, body).await?;
        Ok(Tagged { tag, value })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        tag: &IdentityTag,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
    ) -> Result<T, DashboardError> {
        let identity = tag.identity.as_str();
        let mut url = endpoint_url(&self.base_url, endpoint)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
            pairs.append_pair(IDENTITY_PARAM, identity);
        }

        debug!(%method, endpoint, identity = %tag.identity.short(), "➡️ backend request");
        let mut request = self
            .http
            .request(method, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(IDENTITY_PARAM, identity)
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.body(merge_identity(body, identity)?.to_string());
        }

        let response = request.send().await.map_err(DashboardError::transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(DashboardError::transport)?;

        if !status.is_success() {
            let message = normalize_error_detail(&bytes);
            debug!(status = status.as_u16(), %message, "⬅️ backend error");
            return Err(DashboardError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Mutations may answer 204; treat an empty body as JSON null.
        let payload: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(payload).map_err(|e| DashboardError::Decode {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl BotBackend for BackendClient {
    async fn my_bot(&self) -> Result<Tagged<Option<BotRecord>>, DashboardError> {
        let tag = self.session.resolve_identity()?;
        match self
            .send::<BotRecord>(&tag, Method::GET, "/bots/my", &[], None)
            .await
        {
            Ok(record) => Ok(Tagged {
                tag,
                value: Some(record),
            }),
            Err(DashboardError::Api { message, .. }) if message == NO_BOT_MESSAGE => {
                Ok(Tagged { tag, value: None })
            }
            Err(e) => Err(e),
        }
    }

    async fn create_bot(&self, draft: &BotDraft) -> Result<Tagged<Value>, DashboardError> {
        self.fetch(Method::POST, "/bots", &[], Some(draft_body(draft)))
            .await
    }

    async fn update_bot(&self, draft: &BotDraft) -> Result<Tagged<Value>, DashboardError> {
        self.fetch(Method::PATCH, "/bots/my", &[], Some(draft_body(draft)))
            .await
    }

    async fn set_active(&self, active: bool) -> Result<Tagged<Value>, DashboardError> {
        let endpoint = if active {
            "/bots/my/activate"
        } else {
            "/bots/my/deactivate"
        };
        self.fetch(Method::POST, endpoint, &[], None).await
    }

    async fn twitter_auth_url(&self) -> Result<Tagged<String>, DashboardError> {
        let resp: Tagged<AuthUrlResponse> =
            self.fetch(Method::GET, "/twitter/auth", &[], None).await?;
        Ok(resp.map(|r| r.auth_url))
    }

    async fn twitter_callback(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Tagged<LinkedAccount>, DashboardError> {
        let query = [
            ("oauth_token", payload.oauth_token.as_str()),
            ("oauth_verifier", payload.oauth_verifier.as_str()),
        ];
        self.fetch(Method::GET, "/twitter/callback", &query, None)
            .await
    }

    async fn unlink_twitter(&self) -> Result<Tagged<Value>, DashboardError> {
        let body = json!({
            "twitter_credentials": null,
            "twitter_account_id": null,
        });
        self.fetch(Method::PATCH, "/bots/my", &[], Some(body)).await
    }
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

fn draft_body(draft: &BotDraft) -> Value {
    json!({
        "name": draft.name,
        "system_prompt": draft.system_prompt,
        "post_interval": draft.post_interval,
    })
}

fn normalize_base_url(base_url: &str) -> Result<String, DashboardError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(DashboardError::invalid("backend base URL is empty"));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn endpoint_url(base_url: &str, endpoint: &str) -> Result<Url, DashboardError> {
    let path = endpoint.trim_start_matches('/');
    Url::parse(&format!("{base_url}/{path}"))
        .map_err(|e| DashboardError::invalid(format!("bad endpoint {endpoint}: {e}")))
}

/// Add `fingerprint` and `id` to a JSON object body. Caller fields survive
/// unless they collide with those two keys.
pub fn merge_identity(body: Value, identity: &str) -> Result<Value, DashboardError> {
    let Value::Object(mut map) = body else {
        return Err(DashboardError::invalid("Invalid JSON in request body"));
    };
    map.insert(IDENTITY_PARAM.to_string(), Value::String(identity.to_string()));
    map.insert("id".to_string(), Value::String(identity.to_string()));
    Ok(Value::Object(map))
}

/// Collapse a non-2xx body into one message.
///
/// `{"detail": "x"}` → `x`; `{"detail": [{"msg": "a"}, {"msg": "b"}]}` → `a, b`;
/// anything else → `API call failed`.
pub fn normalize_error_detail(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return FALLBACK_ERROR.to_string();
    };
    match value.get("detail") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("msg") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => FALLBACK_ERROR.to_string(),
    }
}
