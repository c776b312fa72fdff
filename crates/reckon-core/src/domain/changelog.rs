//! Changelog entries: the recorded history of an issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::issue::IssueKey;

/// One recorded change of an issue (status transition, reassignment, ...).
///
/// Several entries share an `issue_key`; their order of insertion is the
/// order in which the store hands them back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    issue_key: IssueKey,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

impl ChangelogEntry {
    pub fn new(issue_key: impl Into<IssueKey>, payload: serde_json::Value) -> Self {
        Self {
            issue_key: issue_key.into(),
            payload,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn issue_key(&self) -> &IssueKey {
        &self.issue_key
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}
