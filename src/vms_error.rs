//! Error types for VMS reconciliation.
//!
//! Unique responsibility: one typed error shared by the client, waiter, and
//! manager modules, with enough context (identifiers, last observed state,
//! remote message text) to diagnose a failed reconciliation pass.
//!
//! Taxonomy:
//! - Configuration errors (`MissingEnv`, `InvalidEnv`, `NoTaskEndpoint`):
//!   fatal, never retried.
//! - Timeout errors: fatal after the full wait budget, carry the last state.
//! - Task/resource failure errors: fatal, carry the remote-reported message.
//! - Transport errors (`Http`, `Api`, `Json`): may be transient; the waiter
//!   consults `is_transient()` instead of swallowing everything.

use std::fmt;

use crate::vms_id::ResourceId;

/// Error type for VMS reconciliation operations.
#[derive(Debug)]
pub enum VmsError {
    /// Missing required environment variable.
    MissingEnv(&'static str),
    /// Invalid environment variable value.
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The reason for invalidity.
        reason: &'static str,
    },
    /// HTTP client error.
    Http(reqwest::Error),
    /// JSON decode error.
    Json {
        /// The JSON parsing error.
        source: serde_json::Error,
        /// The response body that failed to decode.
        body: String,
    },
    /// API error response.
    Api {
        /// HTTP status code.
        status: reqwest::StatusCode,
        /// Response body.
        body: String,
    },
    /// Resource not found where one was required.
    NotFound {
        /// Resource type name (e.g. "views").
        resource_type: String,
        /// Identifier or lookup value that matched nothing.
        lookup: String,
    },
    /// Multiple resources matched a lookup that must be unique.
    Ambiguous {
        /// Resource type name.
        resource_type: String,
        /// The lookup description that matched more than one resource.
        lookup: String,
    },
    /// Neither a lookup value nor an identifier was supplied.
    MissingLookup {
        /// Resource type name.
        resource_type: String,
        /// The canonical lookup field that was expected.
        lookup_field: &'static str,
    },
    /// The API answered with a response the reconciler cannot use.
    MalformedResponse {
        /// Resource type name.
        resource_type: String,
        /// What was wrong with the response.
        reason: &'static str,
    },
    /// Neither task-status endpoint is usable on this cluster.
    NoTaskEndpoint {
        /// The task whose status could not be queried.
        task_id: ResourceId,
    },
    /// Task does not exist (never created, or already purged).
    TaskNotFound {
        /// The missing task.
        task_id: ResourceId,
    },
    /// Task reached a terminal non-success state.
    TaskFailed {
        /// The failed task.
        task_id: ResourceId,
        /// Terminal state reported by the cluster.
        state: String,
        /// Error/message text carried by the task, if any.
        message: String,
    },
    /// Resource entered a known error state while being waited on.
    ResourceErrorState {
        /// Resource type name.
        resource_type: String,
        /// Resource identifier.
        id: ResourceId,
        /// The error state observed.
        state: String,
        /// Error/message text carried by the resource, if any.
        message: String,
    },
    /// The polled condition never came true within the wait budget.
    Timeout {
        /// Description of what was being waited for.
        waiting_for: String,
        /// Wait budget in seconds.
        timeout_secs: u64,
        /// Last observed state, if any poll succeeded.
        last_state: Option<String>,
    },
}

impl VmsError {
    /// Whether a polling loop may treat this error as "not yet available"
    /// and retry, rather than aborting.
    ///
    /// Transport failures and throttling/server statuses are transient;
    /// everything else (auth, not-found, configuration) is fatal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => {
                status.is_server_error()
                    || matches!(status.as_u16(), 408 | 425 | 429)
            }
            _ => false,
        }
    }
}

impl fmt::Display for VmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(k) => write!(f, "missing required env var: {k}"),
            Self::InvalidEnv { key, reason } => write!(f, "invalid env var {key}: {reason}"),
            Self::Http(e) => write!(f, "http error: {e}"),
            Self::Json { source, .. } => write!(f, "json decode error: {source}"),
            Self::Api { status, body } => {
                write!(f, "vms api error: status={status}, body={body}")
            }
            Self::NotFound {
                resource_type,
                lookup,
            } => write!(f, "{resource_type} not found: {lookup}"),
            Self::Ambiguous {
                resource_type,
                lookup,
            } => write!(f, "multiple {resource_type} resources match {lookup}"),
            Self::MissingLookup {
                resource_type,
                lookup_field,
            } => write!(
                f,
                "either '{lookup_field}' or an id is required to identify a {resource_type} resource"
            ),
            Self::MalformedResponse {
                resource_type,
                reason,
            } => write!(f, "malformed {resource_type} response: {reason}"),
            Self::NoTaskEndpoint { task_id } => write!(
                f,
                "cannot query task {task_id}: neither vtasks nor async_tasks endpoint is available"
            ),
            Self::TaskNotFound { task_id } => write!(f, "task {task_id} not found"),
            Self::TaskFailed {
                task_id,
                state,
                message,
            } => write!(f, "task {task_id} failed with state '{state}': {message}"),
            Self::ResourceErrorState {
                resource_type,
                id,
                state,
                message,
            } => write!(
                f,
                "{resource_type}/{id} entered error state '{state}': {message}"
            ),
            Self::Timeout {
                waiting_for,
                timeout_secs,
                last_state,
            } => match last_state {
                Some(state) => write!(
                    f,
                    "timed out waiting for {waiting_for} after {timeout_secs}s (last state: {state})"
                ),
                None => write!(f, "timed out waiting for {waiting_for} after {timeout_secs}s"),
            },
        }
    }
}

impl std::error::Error for VmsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for VmsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}
