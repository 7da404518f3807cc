//! Crash-recovery integration tests
//!
//! Each test seeds the store the way a dead orchestrator process would
//! have left it, then runs `recover` and checks the repaired state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hal_core::pool::{VmPool, STALE_TASK_RESULT};
use hal_core::provider::MockProvider;
use hal_core::store::{NewTask, Store, TaskStatus, VmStatus};
use hal_core::{
    Credentials, HalConfig, Orchestrator, Provider, SlotConfig,
};
use tempfile::TempDir;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    store: Arc<Store>,
    _mock: MockProvider,
    _data: TempDir,
}

fn harness(slots: Vec<SlotConfig>) -> Harness {
    let data = TempDir::new().unwrap();
    let store = Arc::new(Store::open_in_memory().unwrap());
    let mock = MockProvider::new("mock");
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("mock".to_string(), Arc::new(mock.clone()));
    let pool = VmPool::new(store.clone(), slots.clone(), providers);
    let config = HalConfig::with_slots(slots, data.path());
    let orchestrator = Orchestrator::new(store.clone(), pool, config, Credentials::default());
    Harness {
        orchestrator,
        store,
        _mock: mock,
        _data: data,
    }
}

fn slot(name: &str) -> SlotConfig {
    let mut slot = SlotConfig::new(name);
    slot.provider = "mock".to_string();
    slot
}

fn seed_task(store: &Store, id: &str, slug: &str) {
    store
        .insert_task(&NewTask {
            id: id.to_string(),
            slug: slug.to_string(),
            repo_url: "https://github.com/acme/widgets".to_string(),
            context: "do the thing".to_string(),
        })
        .unwrap();
}

/// Provision a real mock-backed VM and bind it like acquire would.
async fn seed_assigned_vm(h: &Harness, task_id: &str) -> String {
    let pool = h.orchestrator.pool();
    let vm = pool.provision_vm().await.unwrap();
    let vm = pool
        .wait_for_vm(&vm.id, Duration::from_secs(5))
        .await
        .unwrap();
    h.store.bind_vm_to_task(&vm.id, task_id).unwrap();
    vm.id
}

#[tokio::test]
async fn stale_running_task_is_force_failed_and_vm_returned() {
    // Scenario: DB has T=running on V=assigned with a 15-minute-old
    // heartbeat. Recovery force-fails T and returns V to ready.
    let h = harness(vec![slot("local").with_idle_timeout(Duration::from_secs(600))]);
    seed_task(&h.store, "task-1", "brave-otter");
    let vm_id = seed_assigned_vm(&h, "task-1").await;
    h.store.set_task_status("task-1", TaskStatus::Running).unwrap();
    h.store.age_task_for_test("task-1", 900_000);

    h.orchestrator.recover().await.unwrap();

    let task = h.store.get_task("task-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.as_deref(), Some(STALE_TASK_RESULT));

    let vm = h.store.get_vm(&vm_id).unwrap().unwrap();
    assert_eq!(vm.status, VmStatus::Ready);
    assert!(vm.idle_since.is_some());
}

#[tokio::test]
async fn stale_running_task_vm_is_destroyed_without_warm_pool() {
    let h = harness(vec![slot("local").with_idle_timeout(Duration::ZERO)]);
    seed_task(&h.store, "task-1", "brave-otter");
    let vm_id = seed_assigned_vm(&h, "task-1").await;
    h.store.set_task_status("task-1", TaskStatus::Running).unwrap();
    h.store.age_task_for_test("task-1", 900_000);

    h.orchestrator.recover().await.unwrap();

    assert_eq!(
        h.store.get_task("task-1").unwrap().unwrap().status,
        TaskStatus::Failed
    );
    assert_eq!(
        h.store.get_vm(&vm_id).unwrap().unwrap().status,
        VmStatus::Destroyed
    );
}

#[tokio::test]
async fn task_interrupted_during_setup_is_failed_and_vm_released() {
    let h = harness(vec![slot("local").with_idle_timeout(Duration::from_secs(600))]);
    seed_task(&h.store, "task-1", "brave-otter");
    let vm_id = seed_assigned_vm(&h, "task-1").await;
    h.store.set_task_status("task-1", TaskStatus::Assigned).unwrap();

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.failed, 1);

    let task = h.store.get_task("task-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .result
        .as_deref()
        .unwrap()
        .contains("Setup interrupted"));

    let vm = h.store.get_vm(&vm_id).unwrap().unwrap();
    assert_eq!(vm.status, VmStatus::Ready);
}

#[tokio::test]
async fn running_task_with_destroyed_vm_is_failed() {
    let h = harness(vec![slot("local")]);
    seed_task(&h.store, "task-1", "brave-otter");
    let vm_id = seed_assigned_vm(&h, "task-1").await;
    h.store.set_task_status("task-1", TaskStatus::Running).unwrap();
    // The VM evaporated, the heartbeat is fresh.
    h.store.set_vm_status(&vm_id, VmStatus::Destroyed).unwrap();
    h._mock.destroy_instance(&vm_id).await.unwrap();

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.failed, 1);

    let task = h.store.get_task("task-1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result.as_deref().unwrap().contains("VM lost"));
}

#[tokio::test]
async fn recovery_is_idempotent() {
    let h = harness(vec![slot("local").with_idle_timeout(Duration::from_secs(600))]);
    seed_task(&h.store, "task-1", "brave-otter");
    seed_assigned_vm(&h, "task-1").await;
    h.store.set_task_status("task-1", TaskStatus::Running).unwrap();
    h.store.age_task_for_test("task-1", 900_000);

    h.orchestrator.recover().await.unwrap();
    let after_first: Vec<_> = h.store.list_vms().unwrap();

    let report = h.orchestrator.recover().await.unwrap();
    assert_eq!(report.failed, 0);
    assert_eq!(report.resumed, 0);
    let after_second: Vec<_> = h.store.list_vms().unwrap();
    assert_eq!(after_first.len(), after_second.len());
    for (a, b) in after_first.iter().zip(after_second.iter()) {
        assert_eq!(a.status, b.status);
    }
}

#[tokio::test]
async fn terminal_tasks_are_untouched_by_recovery() {
    let h = harness(vec![slot("local")]);
    seed_task(&h.store, "task-1", "brave-otter");
    h.store
        .finish_task("task-1", TaskStatus::Completed, "3 files changed", Some(0))
        .unwrap();
    let before = h.store.get_task("task-1").unwrap().unwrap();

    h.orchestrator.recover().await.unwrap();

    let after = h.store.get_task("task-1").unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.completed_at, before.completed_at);
}
