//! Task row types

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, no VM yet
    Pending,
    /// A VM is being set up for this task
    Assigned,
    /// The agent is executing on the VM
    Running,
    /// Agent finished with exit code 0 (terminal)
    Completed,
    /// Agent failed, setup failed, or the task went stale (terminal)
    Failed,
}

impl TaskStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from database string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal tasks never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted task row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// UUID identity
    pub id: String,
    /// Human-friendly unique `adjective-noun` handle
    pub slug: String,
    pub repo_url: String,
    /// Operator instructions passed to the agent
    pub context: String,
    pub status: TaskStatus,
    pub vm_id: Option<String>,
    /// Short outcome text (diff stat, or an error sentence)
    pub result: Option<String>,
    pub exit_code: Option<i32>,
    /// Feature branch the agent worked on
    pub branch: Option<String>,
    pub pr_url: Option<String>,
    /// Unix millis
    pub created_at: i64,
    /// Heartbeat: touched on every poll round-trip
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TaskRecord {
    /// First 8 characters of the id, for branch names and display
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}

/// Fields for creating a task
#[derive(Debug, Clone)]
pub struct NewTask {
    pub id: String,
    pub slug: String,
    pub repo_url: String,
    pub context: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Assigned,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("zombie"), None);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }
}
