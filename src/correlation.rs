//! Correlation identifiers threaded through every unit of work.
//!
//! A root id is minted once per top-level trigger (an ingestion, a CLI
//! command, a reprocess request). Sub-units derive children from it so a
//! multi-stage failure can be reassembled by prefix.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh root identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Adopt an identifier supplied by a caller (e.g. an upstream request header).
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive an identifier for a sub-unit: `{parent}/{8 hex}`.
    pub fn child(&self) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}/{}", self.0, &suffix[..8]))
    }

    /// The root segment shared by every descendant.
    pub fn root(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_shares_root() {
        let root = CorrelationId::new();
        let child = root.child();
        let grandchild = child.child();

        assert_ne!(root, child);
        assert!(child.as_str().starts_with(root.as_str()));
        assert_eq!(grandchild.root(), root.as_str());
        assert_eq!(grandchild.as_str().matches('/').count(), 2);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = CorrelationId::from_string("abc-123");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc-123\"");
    }
}
