use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lifecycle of a maintenance task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a delegate
    Pending,
    /// Being applied
    Ongoing,
    /// Abandoned
    Cancelled,
    /// Applied
    Completed,
}

/// Typed value of a task property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    /// Value type, `STRING` for every property the core writes
    #[serde(rename = "type")]
    pub value_type: String,
    /// String payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
}

/// Named property of a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyStub {
    /// Property name
    pub id: String,
    /// Property value
    pub typed_value: TypedValue,
}

impl PropertyStub {
    /// A string property
    pub fn string(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            typed_value: TypedValue {
                value_type: "STRING".into(),
                string_value: Some(value.into()),
            },
        }
    }
}

/// Delegable message between data owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceTask {
    /// Task id
    pub id: String,
    /// Revision for optimistic locking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Creation instant (epoch millis)
    pub created: i64,
    /// Kind of task
    pub task_type: String,
    /// Lifecycle state
    pub status: TaskStatus,
    /// Data owner that created the task
    pub responsible: String,
    /// Data owners allowed to read the task
    #[serde(default)]
    pub delegates: BTreeSet<String>,
    /// Task payload
    #[serde(default)]
    pub properties: Vec<PropertyStub>,
}

impl MaintenanceTask {
    /// String value of a property
    pub fn property(&self, id: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.id == id)
            .and_then(|p| p.typed_value.string_value.as_deref())
    }
}
