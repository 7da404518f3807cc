//! VM pool management
//!
//! Capacity control, warm pooling, idle reaping, orphan release and
//! provider reconciliation. The pool owns every VM state transition;
//! callers only ever acquire, release and destroy.
//!
//! Correctness rests on short store transactions rather than held
//! locks: the claim of a warm VM and the task binding are each one
//! transaction, and every reap re-reads current rows, so interleaved
//! executors and timers cannot double-assign or resurrect a VM.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SlotConfig;
use crate::error::{PoolError, StoreError};
use crate::provider::{CreateInstance, InstanceStatus, Provider};
use crate::store::{now_ms, NewVm, OrphanKind, Store, VmRecord, VmStatus};

/// Provisioning rows older than this belong to a dead process
pub const STALE_PROVISION_MAX: Duration = Duration::from_secs(600);
/// Heartbeat gap after which an in-flight task counts as stale
pub const STALE_TASK_MAX: Duration = Duration::from_secs(600);
/// Budget for a provider's wait_for_ready
pub const READY_WAIT: Duration = Duration::from_secs(180);
/// Provisioning attempts per acquire; local virtualization flakes
const PROVISION_MAX_ATTEMPTS: u32 = 2;

/// Result text written onto tasks force-failed by GC
pub const STALE_TASK_RESULT: &str = "Stale task (process died)";

/// Outcome of a reconcile pass, for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows promoted or corrected against provider truth
    pub updated: usize,
    /// Rows and instances removed from accounting
    pub destroyed: usize,
}

/// Multi-provider VM pool
pub struct VmPool {
    store: Arc<Store>,
    /// Slot order is priority order after construction
    slots: Vec<SlotConfig>,
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl VmPool {
    /// Build a pool over configured slots and registered backends
    pub fn new(
        store: Arc<Store>,
        mut slots: Vec<SlotConfig>,
        providers: HashMap<String, Arc<dyn Provider>>,
    ) -> Arc<Self> {
        // Stable sort: ties on priority keep configured order.
        slots.sort_by_key(|s| s.priority);
        Arc::new(Self {
            store,
            slots,
            providers,
        })
    }

    pub fn slots(&self) -> &[SlotConfig] {
        &self.slots
    }

    /// Read-only VM row lookup for composers
    pub fn lookup_vm(&self, id: &str) -> Result<Option<VmRecord>, StoreError> {
        self.store.get_vm(id)
    }

    /// Every VM row, for status reporting
    pub fn list_vms(&self) -> Result<Vec<VmRecord>, StoreError> {
        self.store.list_vms()
    }

    /// Whether an acquire would likely hit the warm pool (advisory)
    pub fn has_warm_vm(&self) -> Result<bool, StoreError> {
        self.store.has_ready_vm()
    }

    pub fn slot(&self, name: &str) -> Option<&SlotConfig> {
        self.slots.iter().find(|s| s.name == name)
    }

    fn provider_for(&self, slot: &SlotConfig) -> Result<Arc<dyn Provider>, PoolError> {
        self.providers
            .get(&slot.provider)
            .cloned()
            .ok_or_else(|| PoolError::NoProvider(slot.provider.clone()))
    }

    fn provider_for_slot_name(&self, name: &str) -> Result<Arc<dyn Provider>, PoolError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| PoolError::UnknownSlot(name.to_string()))?;
        self.provider_for(slot)
    }

    fn total_capacity(&self) -> usize {
        self.slots.iter().map(|s| s.max_pool_size).sum()
    }

    /// First slot in priority order with headroom: fill local first,
    /// overflow to cloud.
    pub fn pick_slot(&self) -> Result<&SlotConfig, PoolError> {
        for slot in &self.slots {
            let active = self.store.count_active_vms(&slot.name)?;
            if active < slot.max_pool_size {
                return Ok(slot);
            }
        }
        Err(PoolError::AtCapacity {
            total_max: self.total_capacity(),
        })
    }

    /// Provision on the best slot with headroom
    pub async fn provision_vm(&self) -> Result<VmRecord, PoolError> {
        let slot = self.pick_slot()?.clone();
        self.provision_vm_for_slot(&slot).await
    }

    /// Two-phase provisioning: the row exists (as label-for-id) before
    /// the possibly-slow provider call so capacity accounting covers
    /// in-flight creations, then the row is renamed to the provider's
    /// id. A failed creation leaves an `error` row, never a leak.
    pub async fn provision_vm_for_slot(&self, slot: &SlotConfig) -> Result<VmRecord, PoolError> {
        let provider = self.provider_for(slot)?;
        let label = format!("hal-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.store.insert_vm(&NewVm {
            id: label.clone(),
            label: label.clone(),
            provider: slot.name.clone(),
            snapshot_id: slot.snapshot_id.clone(),
            region: slot.region.clone(),
            plan: slot.plan.clone(),
        })?;
        debug!(label = %label, slot = %slot.name, "provisioning VM");

        let request = CreateInstance {
            region: slot.region.clone(),
            plan: slot.plan.clone(),
            snapshot_id: slot.snapshot_id.clone(),
            label: label.clone(),
            ssh_key_ids: slot.ssh_key_ids.clone(),
        };
        match provider.create_instance(request).await {
            Ok(instance) => {
                let ip = (!instance.ip.is_empty()).then_some(instance.ip.as_str());
                self.store
                    .rename_vm(&label, &instance.id, ip, instance.ssh_port)?;
                info!(id = %instance.id, slot = %slot.name, "VM created");
                self.store
                    .get_vm(&instance.id)?
                    .ok_or_else(|| StoreError::NotFound(instance.id.clone()).into())
            }
            Err(e) => {
                warn!(label = %label, error = %e, "provider refused creation");
                self.store.set_vm_error(&label, &e.to_string())?;
                Err(e.into())
            }
        }
    }

    /// Block until the provider reports the instance active, then
    /// promote the row to `ready`. On error the row stays in
    /// `provisioning`; the caller decides whether to destroy it.
    pub async fn wait_for_vm(&self, id: &str, timeout: Duration) -> Result<VmRecord, PoolError> {
        let vm = self
            .store
            .get_vm(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let provider = self.provider_for_slot_name(&vm.provider)?;
        let instance = provider.wait_for_ready(id, timeout).await?;
        self.store
            .update_vm_network(id, &instance.ip, instance.ssh_port)?;
        self.store.set_vm_status(id, VmStatus::Ready)?;
        self.store
            .get_vm(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    /// Get a VM for `task_id`: housekeeping, then warm reuse, then
    /// provision-with-retry. The task binding is a single transaction
    /// either way.
    pub async fn acquire_vm(self: &Arc<Self>, task_id: &str) -> Result<VmRecord, PoolError> {
        // Housekeeping first so a freed orphan or expired idle VM
        // cannot distort the capacity check below.
        if let Err(e) = self.release_orphans().await {
            warn!(error = %e, "orphan release failed during acquire");
        }
        if let Err(e) = self.reap_stale_provisioning().await {
            warn!(error = %e, "stale-provisioning reap failed during acquire");
        }
        if let Err(e) = self.reap_idle_vms().await {
            warn!(error = %e, "idle reap failed during acquire");
        }

        if let Some(vm) = self.store.claim_ready_vm(task_id)? {
            info!(vm = %vm.short_id(), task = %task_id, "reusing warm VM");
            self.ensure_warm();
            return Ok(vm);
        }

        let mut last_err: Option<PoolError> = None;
        for attempt in 1..=PROVISION_MAX_ATTEMPTS {
            let vm = match self.provision_vm().await {
                Ok(vm) => vm,
                Err(e @ PoolError::AtCapacity { .. }) => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "provisioning attempt failed");
                    last_err = Some(e);
                    continue;
                }
            };
            match self.wait_for_vm(&vm.id, READY_WAIT).await {
                Ok(ready) => {
                    self.store.bind_vm_to_task(&ready.id, task_id)?;
                    info!(vm = %ready.short_id(), task = %task_id, "fresh VM assigned");
                    self.ensure_warm();
                    return self
                        .store
                        .get_vm(&ready.id)?
                        .ok_or_else(|| StoreError::NotFound(ready.id.clone()).into());
                }
                Err(e) => {
                    warn!(attempt, vm = %vm.short_id(), error = %e, "VM never became ready");
                    if let Err(destroy_err) = self.destroy_vm(&vm.id).await {
                        warn!(vm = %vm.short_id(), error = %destroy_err, "cleanup destroy failed");
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(PoolError::AtCapacity {
            total_max: self.total_capacity(),
        }))
    }

    /// Return a VM after its task: into the warm pool when the slot
    /// keeps one, destroyed inline otherwise.
    pub async fn release_vm(self: &Arc<Self>, vm_id: &str) -> Result<(), PoolError> {
        let Some(vm) = self.store.get_vm(vm_id)? else {
            return Ok(());
        };
        if vm.status.is_terminal() {
            return Ok(());
        }
        let warm = self.slot(&vm.provider).filter(|s| s.has_warm_pool());
        let Some(slot) = warm else {
            return self.destroy_vm(vm_id).await;
        };

        self.store.mark_vm_idle(vm_id)?;
        info!(vm = %vm.short_id(), slot = %slot.name, "VM returned to warm pool");
        // Advisory low-latency timer; the persistent reap scan is the
        // authoritative mechanism.
        self.schedule_idle_reap(slot.idle_timeout + Duration::from_secs(1));
        self.ensure_warm();
        Ok(())
    }

    /// One-shot in-process reap trigger. Holds only a weak reference
    /// so a pending timer never keeps the process alive.
    fn schedule_idle_reap(self: &Arc<Self>, delay: Duration) {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(pool) = pool.upgrade() {
                if let Err(e) = pool.reap_idle_vms().await {
                    warn!(error = %e, "scheduled idle reap failed");
                }
            }
        });
    }

    /// Destroy warm VMs whose idle time exceeded their slot's TTL
    pub async fn reap_idle_vms(&self) -> Result<usize, PoolError> {
        let now = now_ms();
        let mut reaped = 0;
        for vm in self.store.idle_vms()? {
            let expired = match self.slot(&vm.provider) {
                // A slot that disappeared from config destroys immediately
                None => true,
                Some(slot) => {
                    let timeout_ms = slot.idle_timeout.as_millis() as i64;
                    let idle_since = vm.idle_since.unwrap_or(now);
                    timeout_ms == 0 || now - idle_since >= timeout_ms
                }
            };
            if !expired {
                continue;
            }
            match self.destroy_vm(&vm.id).await {
                Ok(()) => {
                    info!(vm = %vm.short_id(), "idle VM reaped");
                    reaped += 1;
                }
                Err(e) => warn!(vm = %vm.short_id(), error = %e, "idle reap destroy failed"),
            }
        }
        Ok(reaped)
    }

    /// Destroy rows stuck in `provisioning` — a dead orchestrator
    /// process left them behind.
    pub async fn reap_stale_provisioning(&self) -> Result<usize, PoolError> {
        let cutoff = now_ms() - STALE_PROVISION_MAX.as_millis() as i64;
        let mut reaped = 0;
        for vm in self.store.vms_by_status(VmStatus::Provisioning)? {
            if vm.updated_at >= cutoff {
                continue;
            }
            match self.destroy_vm(&vm.id).await {
                Ok(()) => {
                    info!(vm = %vm.short_id(), "stale provisioning VM reaped");
                    reaped += 1;
                }
                Err(e) => warn!(vm = %vm.short_id(), error = %e, "stale reap destroy failed"),
            }
        }
        Ok(reaped)
    }

    /// Try to destroy every `error` VM on the provider; the row leaves
    /// accounting as `destroyed` regardless of what the provider says.
    pub async fn reap_error_vms(&self) -> Result<usize, PoolError> {
        let mut reaped = 0;
        for vm in self.store.vms_by_status(VmStatus::Error)? {
            if let Ok(provider) = self.provider_for_slot_name(&vm.provider) {
                if let Err(e) = provider.destroy_instance(&vm.id).await {
                    if !e.is_not_found() {
                        warn!(vm = %vm.short_id(), error = %e, "error-VM destroy failed on provider");
                    }
                }
            }
            self.store.set_vm_status(&vm.id, VmStatus::Destroyed)?;
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Free `assigned` VMs whose task is finished, missing, or stale.
    /// Stale tasks are force-failed in the same pass.
    pub async fn release_orphans(&self) -> Result<usize, PoolError> {
        let stale_ms = STALE_TASK_MAX.as_millis() as i64;
        let mut released = 0;
        for (vm, kind) in self.store.orphaned_vms(stale_ms)? {
            if let OrphanKind::TaskStale { task_id } = &kind {
                match self.store.force_fail_task(task_id, STALE_TASK_RESULT) {
                    Ok(true) => info!(task = %task_id, "stale task force-failed"),
                    Ok(false) => {}
                    Err(e) => warn!(task = %task_id, error = %e, "force-fail failed"),
                }
            }
            debug!(vm = %vm.short_id(), ?kind, "releasing orphan VM");
            let warm = self
                .slot(&vm.provider)
                .map(|s| s.has_warm_pool())
                .unwrap_or(false);
            if warm {
                self.store.mark_vm_idle(&vm.id)?;
            } else if let Err(e) = self.destroy_vm(&vm.id).await {
                warn!(vm = %vm.short_id(), error = %e, "orphan destroy failed");
            }
            released += 1;
        }
        Ok(released)
    }

    /// Top up every slot to its pre-warm target. Detached and
    /// best-effort: a failed pre-warm is logged, never fatal.
    pub fn ensure_warm(self: &Arc<Self>) {
        for slot in self.slots.clone() {
            if slot.min_ready == 0 {
                continue;
            }
            let current = match self.store.count_unassigned(&slot.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(slot = %slot.name, error = %e, "warm count failed");
                    continue;
                }
            };
            for _ in current..slot.min_ready {
                let pool = Arc::clone(self);
                let slot = slot.clone();
                tokio::spawn(async move {
                    match pool.provision_vm_for_slot(&slot).await {
                        Ok(vm) => match pool.wait_for_vm(&vm.id, READY_WAIT).await {
                            Ok(ready) => {
                                if let Err(e) = pool.store.mark_vm_idle(&ready.id) {
                                    warn!(vm = %ready.short_id(), error = %e, "pre-warm idle mark failed");
                                }
                            }
                            Err(e) => {
                                warn!(vm = %vm.short_id(), error = %e, "pre-warm VM never became ready");
                                let _ = pool.destroy_vm(&vm.id).await;
                            }
                        },
                        Err(e) => warn!(slot = %slot.name, error = %e, "pre-warm provisioning failed"),
                    }
                });
            }
        }
    }

    /// Periodic drift correction between the store and provider truth.
    ///
    /// The unknown-instance sweep destroys any provider instance
    /// labeled `hal-` that the store does not know: this assumes the
    /// process is the sole owner of that label namespace on every
    /// configured provider.
    pub async fn reconcile(self: &Arc<Self>) -> Result<ReconcileReport, PoolError> {
        let mut report = ReconcileReport::default();

        for vm in self.store.active_vms()? {
            if self.slot(&vm.provider).is_none() {
                warn!(vm = %vm.short_id(), slot = %vm.provider, "slot no longer configured");
                self.store.set_vm_status(&vm.id, VmStatus::Destroyed)?;
                report.destroyed += 1;
                continue;
            }
            let provider = match self.provider_for_slot_name(&vm.provider) {
                Ok(p) => p,
                Err(e) => {
                    warn!(vm = %vm.short_id(), error = %e, "no backend for slot");
                    continue;
                }
            };
            match provider.get_instance(&vm.id).await {
                Ok(instance) => {
                    if instance.status == InstanceStatus::Active
                        && vm.status == VmStatus::Provisioning
                    {
                        if !instance.ip.is_empty() {
                            self.store
                                .update_vm_network(&vm.id, &instance.ip, instance.ssh_port)?;
                        }
                        self.store.set_vm_status(&vm.id, VmStatus::Ready)?;
                        info!(vm = %vm.short_id(), "promoted provisioning VM to ready");
                        report.updated += 1;
                    }
                }
                Err(e) if e.is_not_found() => {
                    info!(vm = %vm.short_id(), "instance gone on provider; marking destroyed");
                    self.store.set_vm_status(&vm.id, VmStatus::Destroyed)?;
                    report.destroyed += 1;
                }
                Err(e) => warn!(vm = %vm.short_id(), error = %e, "provider lookup failed"),
            }
        }

        report.destroyed += self.reap_idle_vms().await.unwrap_or_else(|e| {
            warn!(error = %e, "idle reap failed during reconcile");
            0
        });
        report.destroyed += self.reap_stale_provisioning().await.unwrap_or_else(|e| {
            warn!(error = %e, "stale reap failed during reconcile");
            0
        });
        report.destroyed += self.reap_error_vms().await.unwrap_or_else(|e| {
            warn!(error = %e, "error reap failed during reconcile");
            0
        });
        if let Err(e) = self.release_orphans().await {
            warn!(error = %e, "orphan release failed during reconcile");
        }

        // Defense against leaked instances: anything labeled ours that
        // the store does not track gets destroyed on the provider.
        for slot in &self.slots {
            let Ok(provider) = self.provider_for(slot) else {
                continue;
            };
            let instances = match provider.list_instances(Some("hal-")).await {
                Ok(list) => list,
                Err(e) => {
                    warn!(slot = %slot.name, error = %e, "instance listing failed");
                    continue;
                }
            };
            for instance in instances {
                let known = self
                    .store
                    .get_vm(&instance.id)?
                    .map(|vm| vm.status != VmStatus::Destroyed)
                    .unwrap_or(false);
                if known {
                    continue;
                }
                warn!(instance = %instance.id, slot = %slot.name, "destroying unknown provider instance");
                match provider.destroy_instance(&instance.id).await {
                    Ok(()) => report.destroyed += 1,
                    Err(e) if e.is_not_found() => {}
                    Err(e) => warn!(instance = %instance.id, error = %e, "unknown-instance destroy failed"),
                }
            }
        }

        self.ensure_warm();
        Ok(report)
    }

    /// Destroy a VM. Idempotent: destroying a destroyed or absent row
    /// is a no-op, and a provider that no longer knows the instance
    /// counts as success. Real provider failures demote the row to
    /// `error` and surface to the caller; the next reap retries.
    pub async fn destroy_vm(&self, id: &str) -> Result<(), PoolError> {
        let Some(vm) = self.store.get_vm(id)? else {
            return Ok(());
        };
        if vm.status == VmStatus::Destroyed {
            return Ok(());
        }
        self.store.set_vm_status(id, VmStatus::Destroying)?;
        let provider = match self.provider_for_slot_name(&vm.provider) {
            Ok(p) => p,
            Err(_) => {
                // No backend to ask; the row still must leave accounting.
                self.store.set_vm_status(id, VmStatus::Destroyed)?;
                return Ok(());
            }
        };
        match provider.destroy_instance(id).await {
            Ok(()) => {
                self.store.set_vm_status(id, VmStatus::Destroyed)?;
                info!(vm = %vm.short_id(), "VM destroyed");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.store.set_vm_status(id, VmStatus::Destroyed)?;
                Ok(())
            }
            Err(e) => {
                self.store.set_vm_error(id, &e.to_string())?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;

    fn pool_with(slots: Vec<SlotConfig>) -> (Arc<VmPool>, MockProvider) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let mock = MockProvider::new("mock");
        let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
        for slot in &slots {
            providers.insert(slot.provider.clone(), Arc::new(mock.clone()));
        }
        (VmPool::new(store, slots, providers), mock)
    }

    fn slot(name: &str) -> SlotConfig {
        let mut slot = SlotConfig::new(name);
        slot.provider = "mock".to_string();
        slot
    }

    #[tokio::test]
    async fn pick_slot_fills_by_priority_then_overflows() {
        let (pool, _mock) = pool_with(vec![
            slot("local").with_priority(0).with_max_pool_size(1),
            slot("cloud").with_priority(1).with_max_pool_size(1),
        ]);

        assert_eq!(pool.pick_slot().unwrap().name, "local");
        pool.provision_vm().await.unwrap();
        assert_eq!(pool.pick_slot().unwrap().name, "cloud");
        pool.provision_vm().await.unwrap();

        let err = pool.pick_slot();
        assert!(matches!(err, Err(PoolError::AtCapacity { total_max: 2 })));
    }

    #[tokio::test]
    async fn priority_ties_keep_configured_order() {
        let (pool, _mock) = pool_with(vec![
            slot("first").with_priority(3),
            slot("second").with_priority(3),
        ]);
        assert_eq!(pool.pick_slot().unwrap().name, "first");
    }

    #[tokio::test]
    async fn provisioning_failure_marks_row_error() {
        let (pool, mock) = pool_with(vec![slot("local")]);
        mock.fail_next_create(crate::error::ProviderError::Api("flake".into()));

        assert!(pool.provision_vm().await.is_err());
        let vms = pool.store.list_vms().unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].status, VmStatus::Error);
        assert!(vms[0].last_error.as_deref().unwrap().contains("flake"));
    }

    #[tokio::test]
    async fn destroy_vm_is_idempotent() {
        let (pool, _mock) = pool_with(vec![slot("local")]);
        let vm = pool.provision_vm().await.unwrap();
        let vm = pool.wait_for_vm(&vm.id, READY_WAIT).await.unwrap();

        pool.destroy_vm(&vm.id).await.unwrap();
        assert_eq!(
            pool.store.get_vm(&vm.id).unwrap().unwrap().status,
            VmStatus::Destroyed
        );

        // Second destroy: no change, no error.
        pool.destroy_vm(&vm.id).await.unwrap();
        pool.destroy_vm("never-existed").await.unwrap();
    }
}
