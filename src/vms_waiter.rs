//! Async task waiter.
//!
//! Unique responsibility: poll long-running VMS operations to completion.
//!
//! Mutating calls against VMS may return an async task marker instead of the
//! finished resource. The waiter extracts the marker, then polls the task
//! status under a timeout and fixed poll interval until the task reaches a
//! terminal state. Concrete status strings map into a coarse three-state
//! model (running, success, failed).
//!
//! Polling blocks the calling task; there is no backoff or jitter, and
//! cancellation happens only via the timeout. Reconciling many resources in
//! parallel means running one waiter per resource.

use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::vms_client::{RemoteClient, TaskEndpoint, TaskProbe};
use crate::vms_error::VmsError;
use crate::vms_id::ResourceId;

/// Default wait budget for async operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Task states that count as successful completion.
pub const SUCCESS_STATES: &[&str] = &["COMPLETED", "SUCCESS"];
/// Task states from which no further transition occurs.
pub const TERMINAL_STATES: &[&str] = &["COMPLETED", "SUCCESS", "FAILED", "ERROR", "CANCELLED"];
/// Resource states that are fatal regardless of the wait target.
const RESOURCE_ERROR_STATES: &[&str] = &["ERROR", "FAILED", "DELETED"];

/// Coarse task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not yet terminal.
    Running,
    /// Terminal, successful.
    Success,
    /// Terminal, not successful.
    Failed,
}

impl TaskState {
    /// Map a concrete status string into the coarse model.
    ///
    /// Any terminal state not in the success set is a failure.
    #[must_use]
    pub fn classify(state: &str) -> Self {
        if SUCCESS_STATES.contains(&state) {
            Self::Success
        } else if TERMINAL_STATES.contains(&state) {
            Self::Failed
        } else {
            Self::Running
        }
    }
}

/// Extract an async task marker from an operation response.
///
/// Responses carry task info in one of three shapes, checked in order:
/// a top-level `task_id` field, a nested `async_task` object (`id` or
/// `task_id` key), or the response itself being a task object
/// (`type == "async_task"`). `None` means the operation was synchronous
/// and there is nothing to wait for.
#[must_use]
pub fn extract_task_id(response: &Map<String, Value>) -> Option<ResourceId> {
    if let Some(id) = response.get("task_id") {
        return ResourceId::from_value(id);
    }

    if let Some(Value::Object(async_task)) = response.get("async_task")
        && let Some(id) = async_task.get("id").or_else(|| async_task.get("task_id"))
    {
        return ResourceId::from_value(id);
    }

    if response.get("type").and_then(Value::as_str) == Some("async_task")
        && let Some(id) = response.get("id")
    {
        return ResourceId::from_value(id);
    }

    None
}

/// Waits for async VMS tasks to complete.
pub struct TaskWaiter<'a, C: RemoteClient + ?Sized> {
    client: &'a C,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a, C: RemoteClient + ?Sized> TaskWaiter<'a, C> {
    /// Create a waiter with an explicit timeout and poll interval.
    #[must_use]
    pub const fn new(client: &'a C, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client,
            timeout,
            poll_interval,
        }
    }

    /// Create a waiter with the default timeout and poll interval.
    #[must_use]
    pub const fn with_defaults(client: &'a C) -> Self {
        Self::new(client, DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    /// Wait for an async task to complete, returning its final status mapping.
    ///
    /// # Errors
    ///
    /// - [`VmsError::Timeout`] if no terminal state is reached in budget,
    ///   carrying the last observed state.
    /// - [`VmsError::TaskFailed`] if the task terminates unsuccessfully.
    /// - [`VmsError::TaskNotFound`] / [`VmsError::NoTaskEndpoint`] for a task
    ///   that does not exist or a cluster with no usable status endpoint;
    ///   these are definitive and not retried.
    ///
    /// Transient query failures are treated as "not yet available" and
    /// polling continues.
    pub async fn wait_for_task(&self, task_id: &ResourceId) -> Result<Map<String, Value>, VmsError> {
        let start = Instant::now();
        let mut last_state: Option<String> = None;

        loop {
            if start.elapsed() >= self.timeout {
                return Err(VmsError::Timeout {
                    waiting_for: format!("task {task_id}"),
                    timeout_secs: self.timeout.as_secs(),
                    last_state,
                });
            }

            match self.fetch_task(task_id).await {
                Ok(task) => {
                    let state = state_label(&task);
                    last_state = Some(state.clone());

                    match TaskState::classify(&state) {
                        TaskState::Success => return Ok(task),
                        TaskState::Failed => {
                            return Err(VmsError::TaskFailed {
                                task_id: task_id.clone(),
                                state,
                                message: message_label(&task),
                            });
                        }
                        TaskState::Running => {}
                    }
                }
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Query the task status, falling back from `vtasks` to `async_tasks`.
    async fn fetch_task(&self, task_id: &ResourceId) -> Result<Map<String, Value>, VmsError> {
        let vtasks_missing = match self
            .client
            .task_status(TaskEndpoint::VTasks, task_id)
            .await?
        {
            TaskProbe::Found(task) => return Ok(task),
            TaskProbe::EndpointMissing => true,
            TaskProbe::NotFound => false,
        };

        match self
            .client
            .task_status(TaskEndpoint::AsyncTasks, task_id)
            .await?
        {
            TaskProbe::Found(task) => Ok(task),
            TaskProbe::EndpointMissing if vtasks_missing => Err(VmsError::NoTaskEndpoint {
                task_id: task_id.clone(),
            }),
            TaskProbe::NotFound | TaskProbe::EndpointMissing => Err(VmsError::TaskNotFound {
                task_id: task_id.clone(),
            }),
        }
    }

    /// Wait for an arbitrary condition to become true.
    ///
    /// The predicate is polled under the waiter's timing contract. A
    /// transient error from the predicate counts as "not yet true" and
    /// polling continues; a fatal error aborts immediately. Probing a live
    /// cluster is expected to be occasionally flaky, but genuine failures
    /// (auth, not-found, configuration) must not be masked by the retry loop.
    ///
    /// # Errors
    ///
    /// Returns [`VmsError::Timeout`] if the condition never comes true in
    /// budget, or the predicate's own error when it is fatal.
    pub async fn wait_for_condition<F, Fut>(
        &self,
        mut check: F,
        description: &str,
    ) -> Result<(), VmsError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<bool, VmsError>> + Send,
    {
        let start = Instant::now();

        loop {
            if start.elapsed() >= self.timeout {
                return Err(VmsError::Timeout {
                    waiting_for: description.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                    last_state: None,
                });
            }

            match check().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Wait for a resource's own state field to reach a target value.
    ///
    /// The state is read from `state`, falling back to `status`. Known error
    /// states (`ERROR`, `FAILED`, `DELETED`) are fatal regardless of the
    /// target, so a resource that has already failed does not burn the full
    /// wait budget.
    ///
    /// # Errors
    ///
    /// Returns [`VmsError::Timeout`] if the target state is never reached,
    /// or [`VmsError::ResourceErrorState`] when the resource fails first.
    pub async fn wait_for_resource_state(
        &self,
        resource_type: &str,
        id: &ResourceId,
        target_state: &str,
    ) -> Result<Map<String, Value>, VmsError> {
        let start = Instant::now();
        let mut last_state: Option<String> = None;

        loop {
            if start.elapsed() >= self.timeout {
                return Err(VmsError::Timeout {
                    waiting_for: format!("{resource_type}/{id} state '{target_state}'"),
                    timeout_secs: self.timeout.as_secs(),
                    last_state,
                });
            }

            match self.client.get_by_id(resource_type, id).await {
                Ok(Some(resource)) => {
                    let state = state_label(&resource);
                    last_state = Some(state.clone());

                    if state == target_state {
                        return Ok(resource);
                    }
                    if RESOURCE_ERROR_STATES.contains(&state.as_str()) {
                        return Err(VmsError::ResourceErrorState {
                            resource_type: resource_type.to_string(),
                            id: id.clone(),
                            state,
                            message: message_label(&resource),
                        });
                    }
                }
                // Not visible yet (e.g. racing an async create); keep polling.
                Ok(None) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Read the state field of a task or resource (`state`, then `status`).
fn state_label(map: &Map<String, Value>) -> String {
    map.get("state")
        .or_else(|| map.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string()
}

/// Read the error/message text of a task or resource.
fn message_label(map: &Map<String, Value>) -> String {
    map.get("error")
        .or_else(|| map.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown error")
        .to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(state: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("id".to_string(), json!(7));
        map.insert("state".to_string(), json!(state));
        map
    }

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    /// Scripted client: pops one probe/resource per poll.
    #[derive(Default)]
    struct ScriptedClient {
        vtasks: Mutex<VecDeque<Result<TaskProbe, VmsError>>>,
        async_tasks: Mutex<VecDeque<Result<TaskProbe, VmsError>>>,
        resources: Mutex<VecDeque<Result<Option<Map<String, Value>>, VmsError>>>,
        polls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteClient for ScriptedClient {
        async fn list(
            &self,
            _resource_type: &str,
            _filter: &Map<String, Value>,
        ) -> Result<Vec<Map<String, Value>>, VmsError> {
            Ok(Vec::new())
        }

        async fn get_by_id(
            &self,
            _resource_type: &str,
            _id: &ResourceId,
        ) -> Result<Option<Map<String, Value>>, VmsError> {
            self.resources
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(None))
        }

        async fn create(
            &self,
            _resource_type: &str,
            _payload: &Map<String, Value>,
        ) -> Result<Map<String, Value>, VmsError> {
            Ok(Map::new())
        }

        async fn update(
            &self,
            _resource_type: &str,
            _id: &ResourceId,
            _patch: &Map<String, Value>,
        ) -> Result<Map<String, Value>, VmsError> {
            Ok(Map::new())
        }

        async fn delete(
            &self,
            _resource_type: &str,
            _id: &ResourceId,
        ) -> Result<Map<String, Value>, VmsError> {
            Ok(Map::new())
        }

        async fn task_status(
            &self,
            endpoint: TaskEndpoint,
            _task_id: &ResourceId,
        ) -> Result<TaskProbe, VmsError> {
            let queue = match endpoint {
                TaskEndpoint::VTasks => {
                    self.polls.fetch_add(1, Ordering::SeqCst);
                    &self.vtasks
                }
                TaskEndpoint::AsyncTasks => &self.async_tasks,
            };
            queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(TaskProbe::NotFound))
        }
    }

    impl ScriptedClient {
        fn with_vtask_states(states: &[&str]) -> Self {
            let client = Self::default();
            {
                let mut queue = client.vtasks.lock().unwrap();
                for state in states {
                    queue.push_back(Ok(TaskProbe::Found(task(state))));
                }
            }
            client
        }
    }

    #[test]
    fn classify_partitions_states() {
        assert_eq!(TaskState::classify("PENDING"), TaskState::Running);
        assert_eq!(TaskState::classify("RUNNING"), TaskState::Running);
        assert_eq!(TaskState::classify("COMPLETED"), TaskState::Success);
        assert_eq!(TaskState::classify("SUCCESS"), TaskState::Success);
        assert_eq!(TaskState::classify("FAILED"), TaskState::Failed);
        assert_eq!(TaskState::classify("CANCELLED"), TaskState::Failed);
        assert_eq!(TaskState::classify("UNKNOWN"), TaskState::Running);
    }

    #[test]
    fn extract_task_id_handles_all_shapes() {
        let top = as_map(json!({"task_id": 7}));
        assert_eq!(extract_task_id(&top), Some(ResourceId::Num(7)));

        let nested = as_map(json!({"async_task": {"id": 9}}));
        assert_eq!(extract_task_id(&nested), Some(ResourceId::Num(9)));

        let nested_alt = as_map(json!({"async_task": {"task_id": 11}}));
        assert_eq!(extract_task_id(&nested_alt), Some(ResourceId::Num(11)));

        let root = as_map(json!({"id": 3, "type": "async_task"}));
        assert_eq!(extract_task_id(&root), Some(ResourceId::Num(3)));

        let not_a_task = as_map(json!({"id": 3, "type": "view"}));
        assert_eq!(extract_task_id(&not_a_task), None);

        assert_eq!(extract_task_id(&Map::new()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_returns_on_success_after_three_polls() {
        let client = ScriptedClient::with_vtask_states(&["PENDING", "RUNNING", "COMPLETED"]);
        let waiter = TaskWaiter::with_defaults(&client);

        let final_task = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap();
        assert_eq!(final_task.get("state"), Some(&json!("COMPLETED")));
        assert_eq!(client.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_fails_on_terminal_failure() {
        let client = ScriptedClient::with_vtask_states(&["RUNNING", "FAILED"]);
        let waiter = TaskWaiter::with_defaults(&client);

        let err = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap_err();
        match err {
            VmsError::TaskFailed { state, .. } => assert_eq!(state, "FAILED"),
            other => panic!("expected TaskFailed, got {other}"),
        }
        assert_eq!(client.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_times_out_with_last_state() {
        let client = ScriptedClient::with_vtask_states(&["RUNNING"; 10]);
        let waiter = TaskWaiter::new(
            &client,
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        let err = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap_err();
        match err {
            VmsError::Timeout { last_state, .. } => {
                assert_eq!(last_state.as_deref(), Some("RUNNING"));
            }
            other => panic!("expected Timeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_falls_back_to_async_tasks_endpoint() {
        let client = ScriptedClient::default();
        client
            .vtasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::EndpointMissing));
        client
            .async_tasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::Found(task("COMPLETED"))));

        let waiter = TaskWaiter::with_defaults(&client);
        let final_task = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap();
        assert_eq!(final_task.get("state"), Some(&json!("COMPLETED")));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_fails_fast_when_no_endpoint_usable() {
        let client = ScriptedClient::default();
        client
            .vtasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::EndpointMissing));
        client
            .async_tasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::EndpointMissing));

        let waiter = TaskWaiter::with_defaults(&client);
        let err = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap_err();
        assert!(matches!(err, VmsError::NoTaskEndpoint { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_fails_fast_when_task_missing() {
        // vtasks endpoint exists but knows no such task; async_tasks neither.
        let client = ScriptedClient::default();
        client.vtasks.lock().unwrap().push_back(Ok(TaskProbe::NotFound));
        client
            .async_tasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::NotFound));

        let waiter = TaskWaiter::with_defaults(&client);
        let err = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap_err();
        assert!(matches!(err, VmsError::TaskNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_task_retries_transient_query_errors() {
        let client = ScriptedClient::default();
        {
            let mut queue = client.vtasks.lock().unwrap();
            queue.push_back(Err(VmsError::Api {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "maintenance".to_string(),
            }));
            queue.push_back(Ok(TaskProbe::Found(task("COMPLETED"))));
        }

        let waiter = TaskWaiter::with_defaults(&client);
        let final_task = waiter.wait_for_task(&ResourceId::Num(7)).await.unwrap();
        assert_eq!(final_task.get("state"), Some(&json!("COMPLETED")));
        assert_eq!(client.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_condition_retries_transient_and_aborts_on_fatal() {
        let client = ScriptedClient::default();
        let waiter = TaskWaiter::with_defaults(&client);

        let calls = AtomicUsize::new(0);
        waiter
            .wait_for_condition(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        match n {
                            0 => Err(VmsError::Api {
                                status: reqwest::StatusCode::BAD_GATEWAY,
                                body: String::new(),
                            }),
                            1 => Ok(false),
                            _ => Ok(true),
                        }
                    }
                },
                "quorum",
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = waiter
            .wait_for_condition(
                || async {
                    Err(VmsError::Api {
                        status: reqwest::StatusCode::FORBIDDEN,
                        body: "no".to_string(),
                    })
                },
                "quorum",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VmsError::Api { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_condition_times_out() {
        let client = ScriptedClient::default();
        let waiter = TaskWaiter::new(
            &client,
            Duration::from_secs(2),
            Duration::from_secs(1),
        );

        let err = waiter
            .wait_for_condition(|| async { Ok(false) }, "quorum")
            .await
            .unwrap_err();
        match err {
            VmsError::Timeout { waiting_for, .. } => assert_eq!(waiting_for, "quorum"),
            other => panic!("expected Timeout, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_resource_state_reaches_target() {
        let client = ScriptedClient::default();
        {
            let mut queue = client.resources.lock().unwrap();
            queue.push_back(Ok(None));
            queue.push_back(Ok(Some(as_map(json!({"id": 1, "state": "ACTIVATING"})))));
            queue.push_back(Ok(Some(as_map(json!({"id": 1, "state": "ONLINE"})))));
        }

        let waiter = TaskWaiter::with_defaults(&client);
        let resource = waiter
            .wait_for_resource_state("views", &ResourceId::Num(1), "ONLINE")
            .await
            .unwrap();
        assert_eq!(resource.get("state"), Some(&json!("ONLINE")));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_resource_state_fails_fast_on_error_state() {
        let client = ScriptedClient::default();
        client.resources.lock().unwrap().push_back(Ok(Some(as_map(
            json!({"id": 1, "state": "FAILED", "error": "disk gone"}),
        ))));

        let waiter = TaskWaiter::with_defaults(&client);
        let err = waiter
            .wait_for_resource_state("views", &ResourceId::Num(1), "ONLINE")
            .await
            .unwrap_err();
        match err {
            VmsError::ResourceErrorState { state, message, .. } => {
                assert_eq!(state, "FAILED");
                assert_eq!(message, "disk gone");
            }
            other => panic!("expected ResourceErrorState, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn status_field_is_accepted_as_state_alias() {
        let client = ScriptedClient::default();
        client
            .vtasks
            .lock()
            .unwrap()
            .push_back(Ok(TaskProbe::Found(as_map(
                json!({"id": 7, "status": "SUCCESS"}),
            ))));

        let waiter = TaskWaiter::with_defaults(&client);
        assert!(waiter.wait_for_task(&ResourceId::Num(7)).await.is_ok());
    }
}
