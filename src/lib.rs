//! VMS Reconcile - idempotent resource management for VMS storage clusters.
//!
//! A library for converging VMS-managed resources (views, users, tenants,
//! and friends) on a declared desired state:
//! - **Diff Engine**: schema-driven normalization and minimal-patch
//!   computation with read-only/immutable/ephemeral/set-like field handling
//! - **Task Waiter**: polling of long-running VMS operations to completion
//! - **Schema Registry**: per-resource-type field classifications
//! - **Resource Manager**: idempotent CRUD lifecycle with check-mode support
//! - **REST Client**: VMS management API access with retry logic
//!
//! ## Quick Start
//!
//! All connection configuration is loaded from environment variables.
//! Create a `.env` file:
//!
//! ```text
//! VMS_URL=https://vms.example.com/api
//! VMS_API_TOKEN=your_api_token_here
//! ```
//!
//! Then use a resource manager to converge on a desired state:
//!
//! ```ignore
//! use serde_json::{Map, json};
//! use vms_reconcile::{ResourceManager, VmsRestClient, VmsRestConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = VmsRestClient::new(VmsRestConfig::from_env()?)?;
//!     let manager = ResourceManager::new(&client, "views");
//!
//!     let mut desired = Map::new();
//!     desired.insert("path".to_string(), json!("/shares/vol1"));
//!     desired.insert("protocols".to_string(), json!(["NFS", "SMB"]));
//!
//!     let outcome = manager.ensure_present(None, &desired).await?;
//!     println!("changed: {}", outcome.changed);
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy for strict discipline
#![deny(clippy::all)]                 // All standard Clippy lints
#![deny(clippy::unwrap_used)]         // unwrap() is forbidden
#![deny(clippy::expect_used)]         // expect() is forbidden
#![deny(clippy::panic)]               // panic!() is forbidden
#![deny(clippy::print_stdout)]        // println!() is forbidden in production
#![deny(clippy::todo)]                // TODO is forbidden
#![deny(clippy::unimplemented)]       // unimplemented!() is forbidden
#![deny(clippy::unwrap_in_result)]    // unwrap() in Result is forbidden
#![deny(clippy::module_inception)]    // Module with same name as crate is forbidden
#![deny(clippy::redundant_clone)]     // Useless clones are forbidden

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Modules
// ============================================================================

/// Schema-driven diff engine.
///
/// Use this module to normalize resource states and compute minimal patches.
pub mod vms_diff;

/// Per-resource-type field classifications.
///
/// Use this module to look up which fields are read-only, immutable,
/// ephemeral, or set-like for a resource type.
pub mod vms_schema;

/// Async task waiter.
///
/// Use this module to poll long-running VMS operations to completion.
pub mod vms_waiter;

/// VMS REST client and the abstract remote-client seam.
///
/// Use this module to talk to the VMS management API, or implement
/// [`RemoteClient`] yourself for testing.
pub mod vms_client;

/// Resource manager.
///
/// Use this module for the idempotent CRUD lifecycle of one resource type.
pub mod vms_manager;

/// Opaque VMS identifiers.
///
/// Use this module for typed resource/task identifiers.
pub mod vms_id;

/// Error types for VMS reconciliation.
///
/// Use this module for the shared error taxonomy.
pub mod vms_error;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use vms_client::{RemoteClient, TaskEndpoint, TaskProbe, VmsRestClient, VmsRestConfig};
pub use vms_diff::{compute_patch, has_changes, normalize_resource, normalize_value, values_equal};
pub use vms_error::VmsError;
pub use vms_id::ResourceId;
pub use vms_manager::{ApplyOutcome, ManagerOptions, ResourceManager, StateDiff};
pub use vms_schema::{FieldClassification, classification_for};
pub use vms_waiter::{TaskState, TaskWaiter, extract_task_id};
