//! Mock provider for testing
//!
//! MockProvider keeps its fleet in memory and lets tests script
//! failures ahead of time, enabling fast, deterministic testing of
//! pool logic without any virtualization backend.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::traits::{CreateInstance, Instance, InstanceStatus, Provider};
use crate::error::ProviderError;

struct MockState {
    instances: HashMap<String, Instance>,
    /// Errors consumed by the next create_instance calls, in order
    create_failures: VecDeque<ProviderError>,
    /// When false, wait_for_ready times out unless a test activated
    /// the instance by hand
    auto_ready: bool,
    next_id: u32,
    destroyed: Vec<String>,
}

/// In-memory scriptable Provider implementation
#[derive(Clone)]
pub struct MockProvider {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState {
                instances: HashMap::new(),
                create_failures: VecDeque::new(),
                auto_ready: true,
                next_id: 0,
                destroyed: Vec::new(),
            })),
        }
    }

    /// Queue an error for the next create_instance call
    pub fn fail_next_create(&self, err: ProviderError) {
        self.state.lock().unwrap().create_failures.push_back(err);
    }

    /// Disable automatic activation in wait_for_ready
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.state.lock().unwrap().auto_ready = auto_ready;
    }

    /// Flip an instance to active with an address (for manual readiness)
    pub fn activate(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        let n = state.next_id;
        if let Some(inst) = state.instances.get_mut(id) {
            inst.status = InstanceStatus::Active;
            if inst.ip.is_empty() {
                inst.ip = format!("10.0.0.{}", n);
            }
        }
    }

    /// Register an instance the orchestrator's store knows nothing
    /// about (for reconcile tests)
    pub fn inject_instance(&self, inst: Instance) {
        self.state
            .lock()
            .unwrap()
            .instances
            .insert(inst.id.clone(), inst);
    }

    /// Snapshot of the current fleet
    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().unwrap().instances.values().cloned().collect()
    }

    /// Ids destroyed so far, in destruction order
    pub fn destroyed_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().destroyed.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().unwrap().instances.len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_instance(&self, req: CreateInstance) -> Result<Instance, ProviderError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        state.next_id += 1;
        let id = format!("{}-{}", self.name, state.next_id);
        let inst = Instance {
            id: id.clone(),
            // IP intentionally unassigned at creation, like real clouds
            ip: String::new(),
            ssh_port: Some(22),
            status: InstanceStatus::Pending,
        };
        tracing::debug!(id = %id, label = %req.label, "mock instance created");
        state.instances.insert(id, inst.clone());
        Ok(inst)
    }

    async fn wait_for_ready(&self, id: &str, timeout: Duration) -> Result<Instance, ProviderError> {
        let mut state = self.state.lock().unwrap();
        let n = state.next_id;
        let auto_ready = state.auto_ready;
        let inst = state
            .instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        if auto_ready {
            inst.status = InstanceStatus::Active;
            if inst.ip.is_empty() {
                inst.ip = format!("10.0.0.{}", n);
            }
        }
        if inst.is_reachable() {
            Ok(inst.clone())
        } else {
            Err(ProviderError::Timeout {
                id: id.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    }

    async fn get_instance(&self, id: &str) -> Result<Instance, ProviderError> {
        self.state
            .lock()
            .unwrap()
            .instances
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))
    }

    async fn list_instances(
        &self,
        label_prefix: Option<&str>,
    ) -> Result<Vec<Instance>, ProviderError> {
        // The mock's ids double as labels, which is close enough for
        // prefix filtering in tests.
        let state = self.state.lock().unwrap();
        Ok(state
            .instances
            .values()
            .filter(|inst| label_prefix.map_or(true, |p| inst.id.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn destroy_instance(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.instances.remove(id).is_none() {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        state.destroyed.push(id.to_string());
        Ok(())
    }

    async fn start_instance(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        let inst = state
            .instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        inst.status = InstanceStatus::Active;
        Ok(())
    }

    async fn stop_instance(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        let inst = state
            .instances
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
        inst.status = InstanceStatus::Stopped;
        Ok(())
    }

    async fn snapshot_instance(&self, id: &str, label: &str) -> Result<String, ProviderError> {
        let state = self.state.lock().unwrap();
        if !state.instances.contains_key(id) {
            return Err(ProviderError::NotFound(id.to_string()));
        }
        Ok(format!("snap-{}-{}", self.name, label))
    }
}
