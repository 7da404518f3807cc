//! VM row types

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    /// Row exists, provider call in flight or instance booting
    Provisioning,
    /// Instance is up with a routable address and no task bound
    Ready,
    /// Instance is executing a task
    Assigned,
    /// Destroy requested, provider call in flight
    Destroying,
    /// Instance is gone (terminal)
    Destroyed,
    /// Provider failure left the row unusable (terminal)
    Error,
}

impl VmStatus {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Assigned => "assigned",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        }
    }

    /// Parse from database string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "provisioning" => Some(Self::Provisioning),
            "ready" => Some(Self::Ready),
            "assigned" => Some(Self::Assigned),
            "destroying" => Some(Self::Destroying),
            "destroyed" => Some(Self::Destroyed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed | Self::Error)
    }

    /// States that count against a slot's capacity
    pub fn counts_against_capacity(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Ready | Self::Assigned)
    }
}

impl std::fmt::Display for VmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted VM row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmRecord {
    /// Provider-assigned identity (opaque). During phase one of
    /// provisioning this temporarily holds the label.
    pub id: String,
    /// Logical label, e.g. `hal-3fa9c1d2`
    pub label: String,
    /// Configured slot name this VM belongs to
    pub provider: String,
    pub ip: Option<String>,
    pub ssh_port: Option<u16>,
    pub status: VmStatus,
    /// Task bound to this VM; only non-null in `assigned`
    pub task_id: Option<String>,
    pub snapshot_id: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
    /// Unix millis
    pub created_at: i64,
    pub updated_at: i64,
    /// Set when the VM entered the warm pool; only non-null in `ready`
    pub idle_since: Option<i64>,
    pub last_error: Option<String>,
}

impl VmRecord {
    /// First 8 characters of the id, for display
    pub fn short_id(&self) -> &str {
        let end = self.id.len().min(8);
        &self.id[..end]
    }
}

/// Fields for inserting a fresh provisioning row
#[derive(Debug, Clone)]
pub struct NewVm {
    pub id: String,
    pub label: String,
    pub provider: String,
    pub snapshot_id: Option<String>,
    pub region: Option<String>,
    pub plan: Option<String>,
}

/// Why an `assigned` VM is considered orphaned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanKind {
    /// The bound task already reached a terminal state
    TaskFinished,
    /// The bound task row does not exist
    TaskMissing,
    /// The bound task's heartbeat went stale; the task must be force-failed
    TaskStale { task_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            VmStatus::Provisioning,
            VmStatus::Ready,
            VmStatus::Assigned,
            VmStatus::Destroying,
            VmStatus::Destroyed,
            VmStatus::Error,
        ] {
            assert_eq!(VmStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(VmStatus::parse("bogus"), None);
    }

    #[test]
    fn capacity_accounting_covers_active_states() {
        assert!(VmStatus::Provisioning.counts_against_capacity());
        assert!(VmStatus::Ready.counts_against_capacity());
        assert!(VmStatus::Assigned.counts_against_capacity());
        assert!(!VmStatus::Destroying.counts_against_capacity());
        assert!(!VmStatus::Destroyed.counts_against_capacity());
        assert!(!VmStatus::Error.counts_against_capacity());
    }

    #[test]
    fn short_id_truncates_long_ids() {
        let vm = VmRecord {
            id: "1234567890abcdef".into(),
            label: "hal-test".into(),
            provider: "local".into(),
            ip: None,
            ssh_port: None,
            status: VmStatus::Ready,
            task_id: None,
            snapshot_id: None,
            region: None,
            plan: None,
            created_at: 0,
            updated_at: 0,
            idle_since: None,
            last_error: None,
        };
        assert_eq!(vm.short_id(), "12345678");
    }
}
