//! Issue model: a previously recorded finding awaiting reconciliation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Globally unique issue key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueKey(String);

impl IssueKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for IssueKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Key of the component (file, module, ...) owning an issue. Issues are
/// partitioned by this key and consumed one component at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentKey(String);

impl ComponentKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ComponentKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One issue as recorded by a previous analysis.
///
/// Only the key and the component are interpreted here; every other domain
/// field (rule, severity, line, message, ...) travels in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    key: IssueKey,
    component_key: ComponentKey,
    #[serde(default)]
    payload: serde_json::Value,
}

impl IssueRecord {
    pub fn new(
        key: impl Into<IssueKey>,
        component_key: impl Into<ComponentKey>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            key: key.into(),
            component_key: component_key.into(),
            payload,
        }
    }

    pub fn key(&self) -> &IssueKey {
        &self.key
    }

    pub fn component_key(&self) -> &ComponentKey {
        &self.component_key
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
