//! Task event types
//!
//! One JSON object per line in `events/<taskId>.jsonl`. The envelope
//! carries a per-task monotone sequence number so consumers can order
//! and deduplicate across reconnects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named setup/execution phase markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    VmAcquire,
    SshWait,
    Clone,
    AgentInstall,
    BranchSetup,
    AgentLaunch,
    AgentRun,
}

/// Which remote stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Terminal outcome reported in `task_end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    Completed,
    Failed,
}

/// Events emitted over a task's lifetime
///
/// Every finalized task has exactly one `task_start` and one
/// `task_end`; phase, output and vm_acquired events interleave freely
/// between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    #[serde(rename_all = "camelCase")]
    TaskStart {
        repo_url: String,
        context: String,
        agent: String,
    },

    #[serde(rename_all = "camelCase")]
    VmAcquired {
        vm_id: String,
        provider: String,
        ip: String,
    },

    Phase {
        name: PhaseName,
    },

    Output {
        stream: OutputStream,
        text: String,
    },

    #[serde(rename_all = "camelCase")]
    TaskEnd {
        status: EndStatus,
        exit_code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pr_url: Option<String>,
    },
}

impl TaskEvent {
    pub fn is_task_end(&self) -> bool {
        matches!(self, TaskEvent::TaskEnd { .. })
    }
}

/// Envelope written to the JSONL stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    /// Monotone within a task, starting at 0
    pub seq: u64,
    pub event: TaskEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_end_serializes_with_camel_case_fields() {
        let event = TaskEvent::TaskEnd {
            status: EndStatus::Failed,
            exit_code: Some(1),
            error: Some("agent timed out".to_string()),
            pr_url: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"task_end\""));
        assert!(json.contains("\"exitCode\":1"));
        assert!(json.contains("\"error\":\"agent timed out\""));
        assert!(!json.contains("prUrl"), "absent optionals are omitted");
    }

    #[test]
    fn phase_names_use_snake_case() {
        let json = serde_json::to_string(&TaskEvent::Phase {
            name: PhaseName::AgentInstall,
        })
        .unwrap();
        assert!(json.contains("\"agent_install\""));
    }

    #[test]
    fn envelope_roundtrips() {
        let envelope = EventEnvelope {
            task_id: "t-1".to_string(),
            timestamp: Utc::now(),
            seq: 3,
            event: TaskEvent::Output {
                stream: OutputStream::Stdout,
                text: "hello".to_string(),
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"taskId\":\"t-1\""));
        let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, envelope);
    }
}
