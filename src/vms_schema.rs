//! Per-resource-type field classifications.
//!
//! Unique responsibility: declare, per VMS resource type, which fields are
//! read-only, immutable, ephemeral, or set-like lists, plus the canonical
//! lookup field used for idempotency. The diff engine consults these
//! classifications when normalizing and comparing states.
//!
//! Field classes:
//! - **read-only**: computed by the cluster, never compared, never sent.
//! - **immutable**: write-once at creation; excluded from update diffs since
//!   changing them would require recreation.
//! - **ephemeral**: credentials/secrets the API never returns in reads;
//!   excluded from update diffs (they cannot be verified for drift) but sent
//!   once in create payloads.
//! - **set-like lists**: list fields whose element order is insignificant;
//!   compared as unordered, deduplicated collections.
//!
//! Unknown resource types fall back to [`DEFAULT`], which only strips the
//! bookkeeping fields every VMS resource carries.

/// Field classification for one VMS resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldClassification {
    /// Fields computed by the cluster; ignored in diffs, never sent.
    pub read_only: &'static [&'static str],
    /// Fields that cannot change after creation.
    pub immutable: &'static [&'static str],
    /// Secret fields never returned by reads.
    pub ephemeral: &'static [&'static str],
    /// List fields compared as unordered collections.
    pub set_like_lists: &'static [&'static str],
    /// Canonical identifier field for idempotency lookups.
    pub lookup_field: &'static str,
    /// Fields that together uniquely identify the resource.
    pub unique_constraints: &'static [&'static str],
}

impl FieldClassification {
    /// Whether a field is read-only.
    #[must_use]
    pub fn is_read_only(&self, field: &str) -> bool {
        self.read_only.contains(&field)
    }

    /// Whether a field is immutable after creation.
    #[must_use]
    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable.contains(&field)
    }

    /// Whether a field is an ephemeral secret.
    #[must_use]
    pub fn is_ephemeral(&self, field: &str) -> bool {
        self.ephemeral.contains(&field)
    }

    /// Whether a field is a set-like list.
    #[must_use]
    pub fn is_set_like(&self, field: &str) -> bool {
        self.set_like_lists.contains(&field)
    }
}

/// Baseline classification for resource types without a dedicated entry.
///
/// Only strips the bookkeeping fields every VMS resource carries.
pub const DEFAULT: FieldClassification = FieldClassification {
    read_only: &["id", "guid", "url", "created"],
    immutable: &[],
    ephemeral: &[],
    set_like_lists: &[],
    lookup_field: "name",
    unique_constraints: &[],
};

/// Classification for `views`.
pub const VIEWS: FieldClassification = FieldClassification {
    read_only: &[
        "id",
        "guid",
        "url",
        "created",
        "title",
        "internal",
        "sync",
        "sync_time",
        "is_remote",
        "directory",
        "physical_capacity",
        "logical_capacity",
        "cluster",
        "cluster_id",
        "tenant_name",
    ],
    immutable: &["path", "tenant_id"],
    ephemeral: &["create_dir"],
    set_like_lists: &["protocols", "abac_tags", "abe_protocols"],
    // Views are addressed by filesystem path, not name.
    lookup_field: "path",
    unique_constraints: &[],
};

/// Classification for `users`.
pub const USERS: FieldClassification = FieldClassification {
    read_only: &["id", "guid", "url", "provider_name"],
    // Username cannot be changed; local_provider_id is write-once at creation.
    immutable: &["name", "local_provider_id"],
    // Password is never returned by the API; only sent on create.
    ephemeral: &["password"],
    set_like_lists: &["gids"],
    lookup_field: "name",
    unique_constraints: &["name", "local_provider_id"],
};

/// Classification for `clusters`.
pub const CLUSTERS: FieldClassification = FieldClassification {
    read_only: &[
        "id",
        "guid",
        "url",
        "created",
        "state",
        "upgrade_state",
        "physical_capacity",
        "logical_capacity",
        "usable_capacity",
        "ssd_capacity",
        "read_bw",
        "write_bw",
        "read_iops",
        "write_iops",
        "leader_cnode",
        "encryption_status",
    ],
    immutable: &[],
    ephemeral: &[],
    set_like_lists: &[],
    lookup_field: "name",
    unique_constraints: &[],
};

/// Classification for `viewpolicies`.
pub const VIEW_POLICIES: FieldClassification = FieldClassification {
    read_only: &["id", "guid", "url", "created", "cluster", "tenant_name", "views_count"],
    immutable: &["tenant_id"],
    ephemeral: &[],
    set_like_lists: &["protocols_audit", "trash_access"],
    lookup_field: "name",
    unique_constraints: &[],
};

/// Classification for `tenants`.
pub const TENANTS: FieldClassification = FieldClassification {
    read_only: &["id", "guid", "url", "created"],
    immutable: &["name"],
    ephemeral: &[],
    set_like_lists: &["client_ip_ranges"],
    lookup_field: "name",
    unique_constraints: &[],
};

/// Look up the classification for a resource type by name.
///
/// Unknown resource types fall back to [`DEFAULT`].
#[must_use]
pub fn classification_for(resource_type: &str) -> &'static FieldClassification {
    match resource_type {
        "views" => &VIEWS,
        "users" => &USERS,
        "clusters" => &CLUSTERS,
        "viewpolicies" => &VIEW_POLICIES,
        "tenants" => &TENANTS,
        _ => &DEFAULT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_resource_types_resolve() {
        assert_eq!(classification_for("views").lookup_field, "path");
        assert_eq!(classification_for("users").lookup_field, "name");
        assert!(classification_for("views").is_set_like("protocols"));
        assert!(classification_for("users").is_ephemeral("password"));
        assert!(classification_for("users").is_immutable("name"));
    }

    #[test]
    fn unknown_resource_type_falls_back_to_default() {
        let c = classification_for("quotas");
        assert_eq!(c, &DEFAULT);
        assert!(c.is_read_only("id"));
        assert!(c.is_read_only("guid"));
        assert!(!c.is_read_only("name"));
        assert_eq!(c.lookup_field, "name");
    }

    #[test]
    fn field_classes_are_disjoint_per_resource() {
        for rt in ["views", "users", "clusters", "viewpolicies", "tenants"] {
            let c = classification_for(rt);
            for field in c.immutable {
                assert!(!c.is_read_only(field), "{rt}.{field} both immutable and read-only");
            }
            for field in c.ephemeral {
                assert!(!c.is_read_only(field), "{rt}.{field} both ephemeral and read-only");
            }
        }
    }
}
