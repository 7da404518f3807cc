//! Provider trait and related types
//!
//! The pool never talks to a cloud API directly; every backend sits
//! behind this capability set. Implementations differ in how regions,
//! ports and images are interpreted but must keep the behavioral
//! contract: `create_instance` may return before an IP exists, and
//! `wait_for_ready` blocks until the instance is active with a
//! routable address.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProviderError;

/// Provider-side view of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider-assigned identity
    pub id: String,
    /// May be empty until the provider assigns an address
    pub ip: String,
    pub ssh_port: Option<u16>,
    pub status: InstanceStatus,
}

impl Instance {
    /// True once the instance reports active with a non-loopback IP
    pub fn is_reachable(&self) -> bool {
        self.status == InstanceStatus::Active
            && !self.ip.is_empty()
            && self.ip != "127.0.0.1"
            && self.ip != "::1"
    }
}

/// Provider-reported instance state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Active,
    Stopped,
    Unknown,
}

/// Parameters for creating an instance
#[derive(Debug, Clone, Default)]
pub struct CreateInstance {
    pub region: Option<String>,
    pub plan: Option<String>,
    pub snapshot_id: Option<String>,
    pub label: String,
    pub ssh_key_ids: Vec<String>,
}

/// Contract every VM backend implements
///
/// All operations are idempotent where the underlying API allows it;
/// an absent instance surfaces as [`ProviderError::NotFound`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name for logs and config matching
    fn name(&self) -> &str;

    /// Create an instance. May return before an IP is assigned.
    async fn create_instance(&self, req: CreateInstance) -> Result<Instance, ProviderError>;

    /// Block until the instance is active with a routable IP
    async fn wait_for_ready(&self, id: &str, timeout: Duration) -> Result<Instance, ProviderError>;

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError>;

    /// List instances, optionally filtered by label prefix
    async fn list_instances(&self, label_prefix: Option<&str>)
        -> Result<Vec<Instance>, ProviderError>;

    async fn destroy_instance(&self, id: &str) -> Result<(), ProviderError>;

    async fn start_instance(&self, id: &str) -> Result<(), ProviderError>;

    async fn stop_instance(&self, id: &str) -> Result<(), ProviderError>;

    /// Snapshot a stopped instance, returning the snapshot id
    async fn snapshot_instance(&self, id: &str, label: &str) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reachability_requires_active_and_routable() {
        let mut inst = Instance {
            id: "vm-1".into(),
            ip: String::new(),
            ssh_port: None,
            status: InstanceStatus::Pending,
        };
        assert!(!inst.is_reachable());

        inst.status = InstanceStatus::Active;
        assert!(!inst.is_reachable(), "empty IP is not reachable");

        inst.ip = "127.0.0.1".into();
        assert!(!inst.is_reachable(), "loopback is not reachable");

        inst.ip = "203.0.113.7".into();
        assert!(inst.is_reachable());
    }
}
