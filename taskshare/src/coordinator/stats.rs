//! Point-in-time snapshots of a coordinator's registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A snapshot of one in-flight shared task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Identifier assigned at registration.
    pub task_id: Uuid,
    /// Debug rendering of the task's key.
    pub key: String,
    /// Number of child views still attached.
    pub child_count: u32,
    /// When the task was registered.
    pub registered_at: DateTime<Utc>,
    /// Fraction completed of the underlying work.
    pub fraction_completed: f64,
}

/// A snapshot of a coordinator's registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// The coordinator's configured name.
    pub name: String,
    /// One entry per in-flight task, in no particular order.
    pub tasks: Vec<TaskInfo>,
}

impl CoordinatorStats {
    /// Returns the number of in-flight tasks.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the number of attached child views across all tasks.
    #[must_use]
    pub fn active_children(&self) -> u64 {
        self.tasks.iter().map(|t| u64::from(t.child_count)).sum()
    }

    /// Converts to a JSON value for logging or diagnostics endpoints.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "active_tasks": self.active_tasks(),
            "active_children": self.active_children(),
            "tasks": self.tasks,
        })
    }
}
