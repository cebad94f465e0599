//! Opaque VMS identifiers.
//!
//! Unique responsibility: a typed identifier for resources and async tasks.
//! The VMS API is inconsistent about identifier types (numeric ids for most
//! resources, string ids for a few), so the identifier is an enum rather than
//! an arbitrary `serde_json::Value` (avoids confusion with resource payloads).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a VMS resource or async task.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    /// Numeric identifier (the common case).
    Num(i64),
    /// String identifier.
    Str(String),
}

impl ResourceId {
    /// Extract an identifier from a JSON value, if it is one.
    ///
    /// Accepts integers and strings; everything else (objects, arrays,
    /// floats, booleans, null) is not an identifier.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Num),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Render the identifier as a URL path segment.
    #[must_use]
    pub fn as_path_segment(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => f.debug_tuple("ResourceId").field(n).finish(),
            Self::Str(s) => f.debug_tuple("ResourceId").field(s).finish(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => n.fmt(f),
            Self::Str(s) => s.fmt(f),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}
