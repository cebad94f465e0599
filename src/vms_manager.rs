//! Resource manager.
//!
//! Unique responsibility: drive one resource through an idempotent CRUD
//! lifecycle against a [`RemoteClient`].
//!
//! A manager is bound to one resource type and its field classification. It
//! looks the resource up by canonical lookup field, identifier, or composite
//! unique constraints, then `ensure_present` / `ensure_absent` converge the
//! remote state on the declared one:
//!
//! - absent + present wanted: create (ephemeral secrets are sent once here)
//! - present + drift: patch only the drifted fields (diff engine)
//! - present + matching: no write at all (`changed == false`)
//! - present + absent wanted: delete
//!
//! Mutating responses may carry an async task marker; the manager hands it
//! to a [`TaskWaiter`] before reporting completion, and re-reads the
//! resource so callers see real state rather than a task object. Check mode
//! reports what would change without performing any write.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::vms_client::RemoteClient;
use crate::vms_diff::{compute_patch, normalize_resource};
use crate::vms_error::VmsError;
use crate::vms_id::ResourceId;
use crate::vms_schema::{FieldClassification, classification_for};
use crate::vms_waiter::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT, TaskWaiter, extract_task_id};

/// Behavior knobs for a [`ResourceManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Whether to wait for async tasks after mutating calls.
    pub wait: bool,
    /// Wait budget for async tasks.
    pub wait_timeout: Duration,
    /// Interval between task-status polls.
    pub poll_interval: Duration,
    /// Report what would change without performing any write.
    pub check_mode: bool,
    /// Include ephemeral fields (passwords/secrets) in update patches.
    /// This breaks idempotency (the API never returns them, so every pass
    /// re-sends them) but is the only way to rotate a secret in place.
    pub include_ephemeral_in_updates: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            wait: true,
            wait_timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_mode: false,
            include_ephemeral_in_updates: false,
        }
    }
}

/// Before/after snapshot of a changed resource.
#[derive(Debug, Clone, Serialize)]
pub struct StateDiff {
    /// Resource state before the change (empty for a create).
    pub before: Map<String, Value>,
    /// Resource state after the change (empty for a delete).
    pub after: Map<String, Value>,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// Whether anything changed (or would change, in check mode).
    pub changed: bool,
    /// The resource after the pass (current remote state, or the would-be
    /// state in check mode; the prior state for a delete).
    pub resource: Map<String, Value>,
    /// Before/after snapshot, present when `changed`.
    pub diff: Option<StateDiff>,
}

/// Idempotent CRUD manager for one VMS resource type.
pub struct ResourceManager<'a, C: RemoteClient + ?Sized> {
    client: &'a C,
    resource_type: String,
    classification: &'static FieldClassification,
    opts: ManagerOptions,
}

impl<'a, C: RemoteClient + ?Sized> ResourceManager<'a, C> {
    /// Create a manager for a resource type with default options.
    ///
    /// The field classification is resolved from the built-in registry;
    /// unknown types get the baseline classification.
    #[must_use]
    pub fn new(client: &'a C, resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let classification = classification_for(&resource_type);
        Self {
            client,
            resource_type,
            classification,
            opts: ManagerOptions::default(),
        }
    }

    /// Replace the manager options.
    #[must_use]
    pub fn with_options(mut self, opts: ManagerOptions) -> Self {
        self.opts = opts;
        self
    }

    /// The classification this manager diffs with.
    #[must_use]
    pub const fn classification(&self) -> &'static FieldClassification {
        self.classification
    }

    /// Find the resource by identifier, composite unique constraints, or
    /// canonical lookup field, in that order of preference.
    ///
    /// # Errors
    ///
    /// Returns [`VmsError::Ambiguous`] when a lookup that must identify one
    /// resource matches several; API errors pass through. A plain miss is
    /// `Ok(None)`.
    pub async fn find(
        &self,
        lookup_value: Option<&Value>,
        id: Option<&ResourceId>,
        unique_constraints: &Map<String, Value>,
    ) -> Result<Option<Map<String, Value>>, VmsError> {
        // Direct id lookup is the most reliable when available.
        if let Some(id) = id {
            return self.client.get_by_id(&self.resource_type, id).await;
        }

        // When the unique constraints do not include the lookup field,
        // search by them directly. This is what makes renames possible:
        // the resource is recognized by its constraint fields while the
        // lookup field itself is the thing changing.
        if !unique_constraints.is_empty()
            && !unique_constraints.contains_key(self.classification.lookup_field)
        {
            let matches = self
                .client
                .list(&self.resource_type, unique_constraints)
                .await?;
            match matches.len() {
                0 => {} // fall through to the lookup-field search
                1 => return Ok(matches.into_iter().next()),
                _ => {
                    return Err(VmsError::Ambiguous {
                        resource_type: self.resource_type.clone(),
                        lookup: format!("unique constraints {unique_constraints:?}"),
                    });
                }
            }
        }

        let Some(lookup_value) = lookup_value else {
            return Ok(None);
        };

        let mut filter = Map::new();
        filter.insert(
            self.classification.lookup_field.to_string(),
            lookup_value.clone(),
        );
        let results = self.client.list(&self.resource_type, &filter).await?;

        if unique_constraints.is_empty() {
            return Ok(results.into_iter().next());
        }

        // The API filtered by the lookup field; narrow to the exact resource
        // by the remaining constraint fields.
        let mut matches = results.into_iter().filter(|r| {
            unique_constraints
                .iter()
                .all(|(field, want)| &field_value(r, field) == want)
        });
        let first = matches.next();
        if matches.next().is_some() {
            return Err(VmsError::Ambiguous {
                resource_type: self.resource_type.clone(),
                lookup: format!(
                    "{}={lookup_value} with unique constraints {unique_constraints:?}",
                    self.classification.lookup_field
                ),
            });
        }
        Ok(first)
    }

    /// Converge the remote resource on the desired declared state.
    ///
    /// `desired` maps field names to wanted values; null values mean "do not
    /// touch". The resource is located by `id` when given, else by the
    /// classification's unique-constraint fields and canonical lookup field
    /// taken from `desired`.
    ///
    /// # Errors
    ///
    /// Returns [`VmsError::MissingLookup`] when neither an id nor a lookup
    /// value identifies the resource; otherwise API, task, and ambiguity
    /// errors pass through.
    pub async fn ensure_present(
        &self,
        id: Option<&ResourceId>,
        desired: &Map<String, Value>,
    ) -> Result<ApplyOutcome, VmsError> {
        let lookup_value = desired.get(self.classification.lookup_field);
        if id.is_none() && lookup_value.is_none() {
            return Err(VmsError::MissingLookup {
                resource_type: self.resource_type.clone(),
                lookup_field: self.classification.lookup_field,
            });
        }

        let unique_constraints = self.unique_constraints_from(desired);
        let current = self.find(lookup_value, id, &unique_constraints).await?;

        match current {
            None => self.create(desired).await,
            Some(current) => self.update(&current, desired).await,
        }
    }

    /// Make sure the resource does not exist.
    ///
    /// # Errors
    ///
    /// API and task errors pass through; a resource that is already absent
    /// is a successful no-op.
    pub async fn ensure_absent(
        &self,
        id: Option<&ResourceId>,
        lookup_value: Option<&Value>,
    ) -> Result<ApplyOutcome, VmsError> {
        let current = self.find(lookup_value, id, &Map::new()).await?;

        let Some(current) = current else {
            return Ok(ApplyOutcome {
                changed: false,
                resource: Map::new(),
                diff: None,
            });
        };

        if !self.opts.check_mode {
            let current_id = self.id_of(&current)?;
            let response = self.client.delete(&self.resource_type, &current_id).await?;
            self.wait_for_response_task(&response).await?;
        }

        Ok(ApplyOutcome {
            changed: true,
            resource: current.clone(),
            diff: Some(StateDiff {
                before: current,
                after: Map::new(),
            }),
        })
    }

    async fn create(&self, desired: &Map<String, Value>) -> Result<ApplyOutcome, VmsError> {
        // Create payloads keep ephemeral secrets; this is the one moment
        // they can be transmitted.
        let payload = normalize_resource(desired, self.classification, false, true);

        if self.opts.check_mode {
            return Ok(ApplyOutcome {
                changed: true,
                resource: payload.clone(),
                diff: Some(StateDiff {
                    before: Map::new(),
                    after: payload,
                }),
            });
        }

        let response = self.client.create(&self.resource_type, &payload).await?;
        let waited = self.wait_for_response_task(&response).await?;

        // After an async create the response may be stale or a task object;
        // re-read so callers see the actual resource.
        let mut resource = response;
        if waited {
            let refreshed = if resource.get("type").and_then(Value::as_str) == Some("async_task") {
                // The response was the task itself; its id is the task id,
                // so locate the resource the way ensure_present would.
                let unique_constraints = self.unique_constraints_from(desired);
                self.find(
                    desired.get(self.classification.lookup_field),
                    None,
                    &unique_constraints,
                )
                .await?
            } else if let Some(id) = resource.get("id").and_then(ResourceId::from_value) {
                self.client.get_by_id(&self.resource_type, &id).await?
            } else {
                None
            };
            if let Some(refreshed) = refreshed {
                resource = refreshed;
            }
        }

        Ok(ApplyOutcome {
            changed: true,
            resource: resource.clone(),
            diff: Some(StateDiff {
                before: Map::new(),
                after: resource,
            }),
        })
    }

    async fn update(
        &self,
        current: &Map<String, Value>,
        desired: &Map<String, Value>,
    ) -> Result<ApplyOutcome, VmsError> {
        let current_normalized = normalize_resource(current, self.classification, true, false);
        let desired_normalized = normalize_resource(
            desired,
            self.classification,
            true,
            self.opts.include_ephemeral_in_updates,
        );
        let patch = compute_patch(&current_normalized, &desired_normalized, self.classification);

        if patch.is_empty() {
            return Ok(ApplyOutcome {
                changed: false,
                resource: current.clone(),
                diff: None,
            });
        }

        if self.opts.check_mode {
            let mut after = current.clone();
            for (key, value) in patch {
                after.insert(key, value);
            }
            return Ok(ApplyOutcome {
                changed: true,
                resource: after.clone(),
                diff: Some(StateDiff {
                    before: current.clone(),
                    after,
                }),
            });
        }

        let current_id = self.id_of(current)?;
        let response = self
            .client
            .update(&self.resource_type, &current_id, &patch)
            .await?;
        let waited = self.wait_for_response_task(&response).await?;

        let mut resource = response;
        if waited
            && let Some(refreshed) = self
                .client
                .get_by_id(&self.resource_type, &current_id)
                .await?
        {
            resource = refreshed;
        }

        Ok(ApplyOutcome {
            changed: true,
            resource: resource.clone(),
            diff: Some(StateDiff {
                before: current.clone(),
                after: resource,
            }),
        })
    }

    /// Wait for an async task carried by a mutating response, if any.
    /// Returns whether a task was waited on.
    async fn wait_for_response_task(&self, response: &Map<String, Value>) -> Result<bool, VmsError> {
        if !self.opts.wait {
            return Ok(false);
        }
        let Some(task_id) = extract_task_id(response) else {
            // No marker: the operation was synchronous.
            return Ok(false);
        };

        let waiter = TaskWaiter::new(self.client, self.opts.wait_timeout, self.opts.poll_interval);
        waiter.wait_for_task(&task_id).await?;
        Ok(true)
    }

    /// Collect the non-null unique-constraint fields from a desired state.
    fn unique_constraints_from(&self, desired: &Map<String, Value>) -> Map<String, Value> {
        let mut constraints = Map::new();
        for field in self.classification.unique_constraints {
            if let Some(value) = desired.get(*field)
                && !value.is_null()
            {
                constraints.insert((*field).to_string(), value.clone());
            }
        }
        constraints
    }

    fn id_of(&self, resource: &Map<String, Value>) -> Result<ResourceId, VmsError> {
        resource
            .get("id")
            .and_then(ResourceId::from_value)
            .ok_or(VmsError::MalformedResponse {
                resource_type: self.resource_type.clone(),
                reason: "resource has no usable 'id' field",
            })
    }
}

/// Read a field from a resource, resolving `*_id` fields through nested
/// objects. The API often returns `local_provider: {"id": 1, ...}` where the
/// declared configuration says `local_provider_id: 1`.
fn field_value(resource: &Map<String, Value>, field: &str) -> Value {
    if let Some(value) = resource.get(field)
        && !value.is_null()
    {
        return value.clone();
    }

    if let Some(nested_field) = field.strip_suffix("_id") {
        match resource.get(nested_field) {
            Some(Value::Object(nested)) => {
                return nested.get("id").cloned().unwrap_or(Value::Null);
            }
            Some(Value::Number(n)) => return Value::Number(n.clone()),
            _ => {}
        }
    }

    Value::Null
}
