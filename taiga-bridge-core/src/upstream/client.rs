//! reqwest-backed Taiga client with connection pooling.
//!
//! # Authentication
//!
//! The client logs in lazily with the service account (`POST auth`) and
//! caches the bearer token. When a request comes back 401 the cached token
//! is discarded and the request is retried once with a fresh login.
//!
//! # Error Classification
//!
//! - 404 → `NotFound`
//! - 409 / 412, or a 400 complaining about `version` → `Conflict`
//! - 401 / 403 → `Denied`
//! - other 4xx → `Rejected` with Taiga's explanation
//! - 5xx → `Server`
//! - timeouts and connection failures are reported separately
//!
//! Writes are never retried except for the single re-authentication above,
//! which happens before the upstream has accepted the request.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use super::{Filters, TaigaApi, UpstreamError};
use crate::config::{ConfigError, parse_env_warn, require_env};
use crate::model::{
    Page, PageRequest, Pagination, Record, ResourceKind, ResourceRef, StatusRecord, StatusScope,
};

/// Longest upstream error text echoed back to callers.
const MAX_ERROR_DETAIL: usize = 300;

/// Configuration for the Taiga client.
#[derive(Clone)]
pub struct TaigaConfig {
    /// Base URL of the Taiga API (e.g. "https://api.taiga.io/api/v1")
    pub base_url: String,
    /// Service-account username
    pub username: String,
    /// Service-account password
    pub password: String,
    /// Request timeout (includes connection + response)
    pub timeout: Duration,
    /// Connection timeout (TCP + TLS handshake)
    pub connect_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout
    pub pool_idle_timeout: Duration,
    /// Maximum response body size in bytes
    pub max_response_size: usize,
}

impl std::fmt::Debug for TaigaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaigaConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

impl Default for TaigaConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 16,
            pool_idle_timeout: Duration::from_secs(90),
            max_response_size: 10 * 1024 * 1024, // 10 MB
        }
    }
}

impl TaigaConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TAIGA_BASE_URL` (required)
    /// - `TAIGA_USERNAME` (required)
    /// - `TAIGA_PASSWORD` (required)
    /// - `TAIGA_BRIDGE_REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `TAIGA_BRIDGE_CONNECT_TIMEOUT_SECS` (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::default();
        let base_url = require_env("TAIGA_BASE_URL")?;
        Url::parse(base_url.trim()).map_err(|e| ConfigError::InvalidVar {
            name: "TAIGA_BASE_URL",
            reason: e.to_string(),
        })?;

        Ok(Self {
            base_url: base_url.trim().to_string(),
            username: require_env("TAIGA_USERNAME")?,
            password: require_env("TAIGA_PASSWORD")?,
            timeout: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_REQUEST_TIMEOUT_SECS",
                default.timeout.as_secs(),
            )),
            connect_timeout: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_CONNECT_TIMEOUT_SECS",
                default.connect_timeout.as_secs(),
            )),
            ..default
        })
    }

    /// Config with the given endpoint and credentials; defaults elsewhere.
    pub fn with_credentials(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }
}

/// Cached login.
#[derive(Debug)]
struct AuthSession {
    token: String,
    user_id: Option<u64>,
}

/// Taiga REST client.
///
/// Cheap to share behind an `Arc`; reqwest pools connections internally.
pub struct TaigaClient {
    client: Client,
    config: TaigaConfig,
    /// Base URL normalised to end with `/` so relative joins keep the prefix.
    base: Url,
    session: ArcSwapOption<AuthSession>,
    /// Serialises logins so concurrent 401s trigger one re-authentication.
    login_lock: tokio::sync::Mutex<()>,
}

impl TaigaClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError::Config` if the base URL is empty or invalid,
    /// or the HTTP client cannot be built.
    pub fn new(config: TaigaConfig) -> Result<Self, UpstreamError> {
        if config.base_url.trim().is_empty() {
            return Err(UpstreamError::Config {
                details: "base_url is empty".to_string(),
            });
        }

        let mut normalised = config.base_url.trim().trim_end_matches('/').to_string();
        normalised.push('/');
        let base = Url::parse(&normalised).map_err(|e| UpstreamError::Config {
            details: format!("invalid base_url '{}': {}", config.base_url, e),
        })?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(default_headers)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| UpstreamError::Config {
                details: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            config,
            base,
            session: ArcSwapOption::const_empty(),
            login_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn url(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| UpstreamError::Config {
                details: format!("cannot build URL for '{path}': {e}"),
            })
    }

    /// Current token, logging in if there is none.
    async fn token(&self) -> Result<Arc<AuthSession>, UpstreamError> {
        if let Some(session) = self.session.load_full() {
            return Ok(session);
        }
        self.login(None).await
    }

    /// Log in unless another task already replaced `stale`.
    async fn login(&self, stale: Option<&Arc<AuthSession>>) -> Result<Arc<AuthSession>, UpstreamError> {
        let _guard = self.login_lock.lock().await;

        if let Some(current) = self.session.load_full() {
            let replaced = stale.is_none_or(|stale| !Arc::ptr_eq(stale, &current));
            if replaced {
                return Ok(current);
            }
        }

        let url = self.url("auth")?;
        let response = self
            .client
            .post(url)
            .json(&json!({
                "type": "normal",
                "username": self.config.username,
                "password": self.config.password,
            }))
            .send()
            .await
            .map_err(|e| self.classify_error(e, "auth"))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Taiga authentication failed");
            return Err(UpstreamError::Denied {
                status: status.as_u16(),
            });
        }

        let body = self.read_json(response, "auth").await?;
        let token = body
            .get("auth_token")
            .and_then(Value::as_str)
            .ok_or_else(|| UpstreamError::Decode {
                details: "authentication response did not contain auth_token".to_string(),
            })?
            .to_string();
        let user_id = body.get("id").and_then(Value::as_u64);

        info!(user_id = ?user_id, "Authenticated with Taiga");
        let session = Arc::new(AuthSession { token, user_id });
        self.session.store(Some(Arc::clone(&session)));
        Ok(session)
    }

    /// Send a request with the bearer token, re-authenticating once on 401.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        disable_pagination: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let url = self.url(path)?;
        let mut session = self.token().await?;

        for attempt in 0..2 {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&session.token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if disable_pagination {
                request = request.header("x-disable-pagination", "True");
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(method = %method, path = %path, "Sending Taiga request");
            let response = request
                .send()
                .await
                .map_err(|e| self.classify_error(e, path))?;

            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!(path = %path, "Taiga token rejected, re-authenticating");
                session = self.login(Some(&session)).await?;
                continue;
            }
            return Ok(response);
        }

        Err(UpstreamError::Denied { status: 401 })
    }

    /// Send and require a success status.
    async fn send_checked(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        disable_pagination: bool,
    ) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .send(method, path, query, body, disable_pagination)
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.error_from_response(response, path).await)
        }
    }

    async fn error_from_response(&self, response: reqwest::Response, path: &str) -> UpstreamError {
        let status = response.status();
        let detail = match self.read_body_limited(response, path).await {
            Ok(bytes) => describe_error_body(&bytes),
            Err(_) => None,
        };
        let error = classify_upstream_status(status, path, detail);
        if status.is_server_error() {
            error!(path = %path, status = %status, "Taiga returned server error");
        } else {
            debug!(path = %path, status = %status, error = %error, "Taiga rejected request");
        }
        error
    }

    /// Read a response body with size enforcement.
    async fn read_body_limited(
        &self,
        response: reqwest::Response,
        path: &str,
    ) -> Result<bytes::Bytes, UpstreamError> {
        let max_size = self.config.max_response_size;

        if let Some(content_length) = response.content_length()
            && content_length as usize > max_size
        {
            warn!(
                path = %path,
                content_length,
                max_response_size = max_size,
                "Taiga response exceeds size limit (Content-Length)"
            );
            return Err(UpstreamError::Decode {
                details: format!("response too large: {content_length} bytes exceeds {max_size}"),
            });
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|e| {
            error!(path = %path, error = %e, "Failed to read Taiga response body chunk");
            UpstreamError::Decode {
                details: format!("failed to read response: {e}"),
            }
        })? {
            if buf.len() + chunk.len() > max_size {
                warn!(
                    path = %path,
                    accumulated = buf.len(),
                    max_response_size = max_size,
                    "Taiga response exceeds size limit during streaming"
                );
                return Err(UpstreamError::Decode {
                    details: format!("response too large: exceeds {max_size} byte limit"),
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.into())
    }

    /// Read a JSON body; an empty body is `null`.
    async fn read_json(&self, response: reqwest::Response, path: &str) -> Result<Value, UpstreamError> {
        let bytes = self.read_body_limited(response, path).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Decode {
            details: format!("invalid JSON from {path}: {e}"),
        })
    }

    async fn read_record(&self, response: reqwest::Response, path: &str) -> Result<Record, UpstreamError> {
        match self.read_json(response, path).await? {
            Value::Object(map) => Ok(map),
            other => Err(UpstreamError::Decode {
                details: format!("expected an object from {path}, got {}", json_kind(&other)),
            }),
        }
    }

    async fn read_records(
        &self,
        response: reqwest::Response,
        path: &str,
    ) -> Result<Vec<Record>, UpstreamError> {
        match self.read_json(response, path).await? {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(UpstreamError::Decode {
                        details: format!(
                            "expected objects in list from {path}, got {}",
                            json_kind(&other)
                        ),
                    }),
                })
                .collect(),
            other => Err(UpstreamError::Decode {
                details: format!("expected a list from {path}, got {}", json_kind(&other)),
            }),
        }
    }

    fn classify_error(&self, error: reqwest::Error, path: &str) -> UpstreamError {
        if error.is_timeout() {
            warn!(
                path = %path,
                timeout_secs = self.config.timeout.as_secs(),
                "Taiga request timed out"
            );
            UpstreamError::Timeout {
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else if error.is_connect() {
            warn!(path = %path, base_url = %self.config.base_url, "Failed to connect to Taiga");
            UpstreamError::Connect {
                reason: error.to_string(),
            }
        } else {
            error!(path = %path, error = %error, "Taiga request failed");
            UpstreamError::Connect {
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait::async_trait]
impl TaigaApi for TaigaClient {
    async fn current_user_id(&self) -> Result<u64, UpstreamError> {
        if let Some(id) = self.token().await?.user_id {
            return Ok(id);
        }
        let response = self
            .send_checked(Method::GET, "users/me", &[], None, false)
            .await?;
        let me = self.read_record(response, "users/me").await?;
        me.get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| UpstreamError::Decode {
                details: "users/me did not provide the authenticated user id".to_string(),
            })
    }

    async fn get_resource(&self, kind: ResourceKind, id: u64) -> Result<Record, UpstreamError> {
        let path = ResourceRef::new(kind, id).path();
        let response = self
            .send_checked(Method::GET, &path, &[], None, false)
            .await?;
        self.read_record(response, &path).await
    }

    async fn get_project_by_slug(&self, slug: &str) -> Result<Record, UpstreamError> {
        let path = "projects/by_slug";
        let query = [("slug".to_string(), slug.to_string())];
        let response = self
            .send_checked(Method::GET, path, &query, None, false)
            .await?;
        self.read_record(response, path).await
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        filters: &Filters,
        page: Option<PageRequest>,
    ) -> Result<Page, UpstreamError> {
        let path = kind.endpoint();
        let mut query = filters.clone();
        if let Some(request) = page {
            query.push(("page".to_string(), request.page.to_string()));
            query.push(("page_size".to_string(), request.page_size.to_string()));
        }

        let response = self
            .send(Method::GET, path, &query, None, page.is_none())
            .await?;

        if response.status() == StatusCode::NOT_FOUND
            && let Some(request) = page
            && request.page > 1
        {
            debug!(path = %path, page = request.page, "Page past the end, returning empty list");
            return Ok(Page {
                items: Vec::new(),
                pagination: Pagination::past_end(request),
            });
        }

        if !response.status().is_success() {
            return Err(self.error_from_response(response, path).await);
        }

        let pagination = pagination_from_headers(response.headers());
        let items = self.read_records(response, path).await?;
        Ok(Page { items, pagination })
    }

    async fn create_resource(
        &self,
        kind: ResourceKind,
        payload: &Record,
    ) -> Result<Record, UpstreamError> {
        let path = kind.endpoint();
        let body = Value::Object(payload.clone());
        let response = self
            .send_checked(Method::POST, path, &[], Some(&body), false)
            .await?;
        self.read_record(response, path).await
    }

    async fn update_resource(
        &self,
        kind: ResourceKind,
        id: u64,
        payload: &Record,
        expected_version: Option<u64>,
    ) -> Result<Record, UpstreamError> {
        let path = ResourceRef::new(kind, id).path();
        let mut body = payload.clone();
        if let Some(version) = expected_version {
            body.insert("version".to_string(), Value::from(version));
        }
        let body = Value::Object(body);
        let response = self
            .send_checked(Method::PATCH, &path, &[], Some(&body), false)
            .await?;
        self.read_record(response, &path).await
    }

    async fn delete_resource(&self, kind: ResourceKind, id: u64) -> Result<(), UpstreamError> {
        let path = ResourceRef::new(kind, id).path();
        self.send_checked(Method::DELETE, &path, &[], None, false)
            .await?;
        Ok(())
    }

    async fn list_statuses(
        &self,
        scope: StatusScope,
        project_id: u64,
    ) -> Result<Vec<StatusRecord>, UpstreamError> {
        let path = scope.endpoint();
        let query = [("project".to_string(), project_id.to_string())];
        let response = self
            .send_checked(Method::GET, path, &query, None, true)
            .await?;
        let value = self.read_json(response, path).await?;
        serde_json::from_value(value).map_err(|e| UpstreamError::Decode {
            details: format!("invalid status list from {path}: {e}"),
        })
    }

    async fn link_story_to_epic(
        &self,
        epic_id: u64,
        story_id: u64,
    ) -> Result<Option<Value>, UpstreamError> {
        let path = format!("epics/{epic_id}/related_userstories");
        let body = json!({"epic": epic_id, "user_story": story_id});
        let response = self
            .send_checked(Method::POST, &path, &[], Some(&body), false)
            .await?;
        match self.read_json(response, &path).await? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn list_project_members(&self, project_id: u64) -> Result<Vec<Value>, UpstreamError> {
        let path = format!("projects/{project_id}/users");
        let response = self
            .send_checked(Method::GET, &path, &[], None, true)
            .await?;
        match self.read_json(response, &path).await? {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Err(UpstreamError::Decode {
                details: format!("expected a list from {path}, got {}", json_kind(&other)),
            }),
        }
    }
}

/// Map a non-success status to an upstream error.
fn classify_upstream_status(status: StatusCode, path: &str, detail: Option<ErrorDetail>) -> UpstreamError {
    let mentions_version = detail.as_ref().is_some_and(|d| d.mentions_version);
    match status.as_u16() {
        404 => UpstreamError::NotFound {
            path: path.to_string(),
        },
        409 | 412 => UpstreamError::Conflict {
            path: path.to_string(),
        },
        400 if mentions_version => UpstreamError::Conflict {
            path: path.to_string(),
        },
        401 | 403 => UpstreamError::Denied {
            status: status.as_u16(),
        },
        code @ 400..=499 => UpstreamError::Rejected {
            status: code,
            message: detail
                .map(|d| d.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("client error").to_string()),
        },
        code => UpstreamError::Server { status: code },
    }
}

#[derive(Debug)]
struct ErrorDetail {
    message: String,
    mentions_version: bool,
}

/// Summarise a Taiga error body.
///
/// Taiga reports either `{"_error_message": "..."}` or per-field lists such
/// as `{"subject": ["This field is required."]}`.
fn describe_error_body(bytes: &[u8]) -> Option<ErrorDetail> {
    if bytes.is_empty() {
        return None;
    }
    let message = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => {
            let mentions_version = map.contains_key("version");
            if let Some(text) = map.get("_error_message").and_then(Value::as_str) {
                return Some(ErrorDetail {
                    message: truncate(text),
                    mentions_version,
                });
            }
            let parts: Vec<String> = map
                .iter()
                .filter(|(key, _)| !key.starts_with('_'))
                .map(|(key, value)| match value {
                    Value::Array(items) => format!(
                        "{key}: {}",
                        items
                            .iter()
                            .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                            .collect::<Vec<_>>()
                            .join(" ")
                    ),
                    Value::String(s) => format!("{key}: {s}"),
                    other => format!("{key}: {other}"),
                })
                .collect();
            return Some(ErrorDetail {
                message: truncate(&parts.join("; ")),
                mentions_version,
            });
        }
        Ok(other) => other.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    };
    Some(ErrorDetail {
        message: truncate(&message),
        mentions_version: false,
    })
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_ERROR_DETAIL {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ERROR_DETAIL).collect();
    out.push('…');
    out
}

fn header_u64(headers: &HeaderMap, names: &[&str]) -> Option<u64> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

/// Parse Taiga's `x-pagination-*` headers.
fn pagination_from_headers(headers: &HeaderMap) -> Pagination {
    Pagination {
        page: header_u64(headers, &["x-pagination-page", "x-pagination-current"]),
        page_size: header_u64(headers, &["x-pagination-page-size"]),
        total: header_u64(headers, &["x-pagination-total", "x-pagination-count"]),
        total_pages: header_u64(headers, &["x-pagination-pages", "x-pagination-total-pages"]),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
