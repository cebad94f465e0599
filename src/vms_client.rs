//! VMS REST client.
//!
//! Unique responsibility: talk to the VMS management API over HTTP, and
//! define the [`RemoteClient`] seam the reconciliation core works against.
//!
//! The seam is an explicit trait with one method per verb plus a task-status
//! query addressed by a [`TaskEndpoint`] tag. Resource types are plain path
//! segments (e.g. `views`, `users`); payloads and responses are untyped JSON
//! mappings, since VMS resources carry no fixed schema.
//!
//! API shape:
//! - GET    `{base}/{resource_type}/?field=value` — filtered list
//! - GET    `{base}/{resource_type}/{id}/`
//! - POST   `{base}/{resource_type}/`
//! - PATCH  `{base}/{resource_type}/{id}/`
//! - DELETE `{base}/{resource_type}/{id}/`
//! - GET    `{base}/vtasks/?id={id}` (fallback: `{base}/async_tasks/?id={id}`)
//!
//! All configuration is loaded from environment variables.

use std::{env, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::vms_error::VmsError;
use crate::vms_id::ResourceId;

/// Logical task-status endpoints a cluster may expose.
///
/// Newer clusters serve `vtasks`; older ones only `async_tasks`. The waiter
/// probes them in that order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEndpoint {
    /// The `vtasks` endpoint.
    VTasks,
    /// The legacy `async_tasks` endpoint.
    AsyncTasks,
}

impl TaskEndpoint {
    /// Path segment for this endpoint.
    #[must_use]
    pub const fn as_path(self) -> &'static str {
        match self {
            Self::VTasks => "vtasks",
            Self::AsyncTasks => "async_tasks",
        }
    }
}

/// Outcome of probing one task-status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskProbe {
    /// The task was found; here is its status mapping.
    Found(Map<String, Value>),
    /// The endpoint exists but has no such task.
    NotFound,
    /// The endpoint itself is not served by this cluster.
    EndpointMissing,
}

/// Abstract remote resource client the reconciliation core depends on.
///
/// One implementation talks REST ([`VmsRestClient`]); tests substitute
/// scripted in-memory fakes.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// List resources of a type matching a field filter.
    async fn list(
        &self,
        resource_type: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>, VmsError>;

    /// Fetch one resource by identifier. `Ok(None)` when it does not exist.
    async fn get_by_id(
        &self,
        resource_type: &str,
        id: &ResourceId,
    ) -> Result<Option<Map<String, Value>>, VmsError>;

    /// Create a resource. The response may carry an async task marker.
    async fn create(
        &self,
        resource_type: &str,
        payload: &Map<String, Value>,
    ) -> Result<Map<String, Value>, VmsError>;

    /// Patch a resource. The response may carry an async task marker.
    async fn update(
        &self,
        resource_type: &str,
        id: &ResourceId,
        patch: &Map<String, Value>,
    ) -> Result<Map<String, Value>, VmsError>;

    /// Delete a resource. The response may be empty or carry a task marker.
    async fn delete(
        &self,
        resource_type: &str,
        id: &ResourceId,
    ) -> Result<Map<String, Value>, VmsError>;

    /// Query one task-status endpoint for a task.
    async fn task_status(
        &self,
        endpoint: TaskEndpoint,
        task_id: &ResourceId,
    ) -> Result<TaskProbe, VmsError>;
}

/// Configuration for the VMS REST client.
#[derive(Clone, Debug)]
pub struct VmsRestConfig {
    /// Base API URL, e.g. "<https://vms.example.com/api>".
    /// Env: `VMS_URL` (required)
    pub base_url: String,

    /// API token for bearer authentication.
    /// Env: `VMS_API_TOKEN` (required)
    pub api_token: String,

    /// Whether to validate TLS certificates. Storage appliances commonly
    /// ship self-signed certificates, so this is switchable.
    /// Env: `VMS_VALIDATE_CERTS` (default: true)
    pub validate_certs: bool,

    /// HTTP request timeout in milliseconds.
    /// Env: `VMS_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// Maximum number of retry attempts for transient failures.
    /// Env: `VMS_HTTP_RETRY_MAX` (default: 3)
    pub retry_max: u32,

    /// Backoff time between retries in milliseconds.
    /// Env: `VMS_HTTP_RETRY_BACKOFF_MS` (default: 500)
    pub retry_backoff_ms: u64,
}

impl VmsRestConfig {
    /// Load configuration from environment variables.
    ///
    /// In local dev, this will also attempt to load `.env` from the current
    /// directory. If `.env` is missing, it does not fail.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, VmsError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            base_url: must_env("VMS_URL")?,
            api_token: must_env("VMS_API_TOKEN")?,
            validate_certs: parse_bool_env("VMS_VALIDATE_CERTS", true),
            timeout_ms: parse_u64_env("VMS_HTTP_TIMEOUT_MS", 30_000)?,
            retry_max: parse_u32_env("VMS_HTTP_RETRY_MAX", 3)?,
            retry_backoff_ms: parse_u64_env("VMS_HTTP_RETRY_BACKOFF_MS", 500)?,
        })
    }
}

/// REST implementation of [`RemoteClient`].
pub struct VmsRestClient {
    cfg: VmsRestConfig,
    http: reqwest::Client,
}

impl VmsRestClient {
    /// Create a new VMS REST client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cfg: VmsRestConfig) -> Result<Self, VmsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .danger_accept_invalid_certs(!cfg.validate_certs)
            .build()
            .map_err(VmsError::Http)?;

        Ok(Self { cfg, http })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &VmsRestConfig {
        &self.cfg
    }

    fn collection_url(&self, resource_type: &str) -> String {
        format!("{}/{}/", self.cfg.base_url.trim_end_matches('/'), resource_type)
    }

    fn item_url(&self, resource_type: &str, id: &ResourceId) -> String {
        format!(
            "{}/{}/{}/",
            self.cfg.base_url.trim_end_matches('/'),
            resource_type,
            id.as_path_segment()
        )
    }

    /// Send a request with retry for transient failures, returning the final
    /// status and body.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder + Send + Sync,
    ) -> Result<(reqwest::StatusCode, String), VmsError> {
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(self.cfg.retry_backoff_ms);

        loop {
            attempt = attempt.saturating_add(1);

            let send_res = build().bearer_auth(&self.cfg.api_token).send().await;

            match send_res {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();

                    if !status.is_success()
                        && attempt <= self.cfg.retry_max
                        && is_retryable_status(status)
                    {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }

                    return Ok((status, body));
                }
                Err(e) => {
                    if attempt <= self.cfg.retry_max && is_retryable_reqwest(&e) {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }

                    return Err(VmsError::Http(e));
                }
            }
        }
    }

    fn decode_map(body: String) -> Result<Map<String, Value>, VmsError> {
        if body.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) => Ok(map),
            // Some endpoints answer an item request with a one-element list.
            Ok(Value::Array(items)) => Ok(items
                .into_iter()
                .find_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .unwrap_or_default()),
            Ok(_) => Ok(Map::new()),
            Err(source) => Err(VmsError::Json { source, body }),
        }
    }

    fn decode_list(body: &str) -> Result<Vec<Map<String, Value>>, VmsError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Array(items)) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            Ok(Value::Object(map)) => Ok(vec![map]),
            Ok(_) => Ok(Vec::new()),
            Err(source) => Err(VmsError::Json {
                source,
                body: body.to_string(),
            }),
        }
    }
}

#[async_trait]
impl RemoteClient for VmsRestClient {
    async fn list(
        &self,
        resource_type: &str,
        filter: &Map<String, Value>,
    ) -> Result<Vec<Map<String, Value>>, VmsError> {
        let url = self.collection_url(resource_type);
        let query: Vec<(String, String)> = filter
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect();

        let (status, body) = self
            .send_with_retry(|| self.http.get(&url).query(&query))
            .await?;

        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }
        Self::decode_list(&body)
    }

    async fn get_by_id(
        &self,
        resource_type: &str,
        id: &ResourceId,
    ) -> Result<Option<Map<String, Value>>, VmsError> {
        let url = self.item_url(resource_type, id);
        let (status, body) = self.send_with_retry(|| self.http.get(&url)).await?;

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }
        let map = Self::decode_map(body)?;
        Ok(if map.is_empty() { None } else { Some(map) })
    }

    async fn create(
        &self,
        resource_type: &str,
        payload: &Map<String, Value>,
    ) -> Result<Map<String, Value>, VmsError> {
        let url = self.collection_url(resource_type);
        let (status, body) = self
            .send_with_retry(|| self.http.post(&url).json(payload))
            .await?;

        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }
        Self::decode_map(body)
    }

    async fn update(
        &self,
        resource_type: &str,
        id: &ResourceId,
        patch: &Map<String, Value>,
    ) -> Result<Map<String, Value>, VmsError> {
        let url = self.item_url(resource_type, id);
        let (status, body) = self
            .send_with_retry(|| self.http.patch(&url).json(patch))
            .await?;

        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }
        Self::decode_map(body)
    }

    async fn delete(
        &self,
        resource_type: &str,
        id: &ResourceId,
    ) -> Result<Map<String, Value>, VmsError> {
        let url = self.item_url(resource_type, id);
        let (status, body) = self.send_with_retry(|| self.http.delete(&url)).await?;

        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }
        Self::decode_map(body)
    }

    async fn task_status(
        &self,
        endpoint: TaskEndpoint,
        task_id: &ResourceId,
    ) -> Result<TaskProbe, VmsError> {
        let url = self.collection_url(endpoint.as_path());
        let query = [("id", task_id.as_path_segment())];

        let (status, body) = self
            .send_with_retry(|| self.http.get(&url).query(&query))
            .await?;

        // 404 on the collection path means the cluster does not serve this
        // endpoint at all; an empty list means the task is unknown to it.
        if status.as_u16() == 404 {
            return Ok(TaskProbe::EndpointMissing);
        }
        if !status.is_success() {
            return Err(VmsError::Api { status, body });
        }

        let tasks = Self::decode_list(&body)?;
        Ok(tasks
            .into_iter()
            .next()
            .map_or(TaskProbe::NotFound, TaskProbe::Found))
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Render a JSON value as a query-string value (strings unquoted).
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn must_env(key: &'static str) -> Result<String, VmsError> {
    env::var(key).map_err(|_| VmsError::MissingEnv(key))
}

fn parse_u32_env(key: &'static str, default: u32) -> Result<u32, VmsError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u32>().map_err(|_| VmsError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

fn parse_u64_env(key: &'static str, default: u64) -> Result<u64, VmsError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u64>().map_err(|_| VmsError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

fn parse_bool_env(key: &'static str, default: bool) -> bool {
    env::var(key).map_or(default, |v| {
        matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")
    })
}

#[inline]
fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    matches!(
        status.as_u16(),
        408 | 409 | 425 | 429 | 500 | 502 | 503 | 504
    )
}

#[inline]
fn is_retryable_reqwest(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

#[inline]
fn next_backoff(current: Duration) -> Duration {
    let next = current.saturating_mul(2);
    next.min(Duration::from_secs(10))
}
