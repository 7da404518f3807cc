//! Task CRUD and lifecycle transitions
//!
//! A thin manager over the store that owns identity generation and
//! keeps transitions monotone: `pending → assigned → running →
//! (completed | failed)`, timestamps stamped along the way.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{slug, NewTask, Store, TaskRecord, TaskStatus};

/// Manages task rows on behalf of the orchestrator
#[derive(Clone)]
pub struct TaskManager {
    store: Arc<Store>,
}

impl TaskManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create a pending task with a fresh UUID and a unique slug
    pub fn create(&self, repo_url: &str, context: &str) -> Result<TaskRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let slug = slug::generate_unique(|candidate| {
            self.store.slug_taken(candidate).unwrap_or(true)
        });
        self.store.insert_task(&NewTask {
            id,
            slug,
            repo_url: repo_url.to_string(),
            context: context.to_string(),
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get_task(id)
    }

    /// Accept either a task id or its slug
    pub fn resolve(&self, id_or_slug: &str) -> Result<Option<TaskRecord>, StoreError> {
        if let Some(task) = self.store.get_task(id_or_slug)? {
            return Ok(Some(task));
        }
        self.store.get_task_by_slug(id_or_slug)
    }

    pub fn list(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, StoreError> {
        self.store.list_tasks(limit)
    }

    /// Tasks that were in flight when the process last stopped
    pub fn in_flight(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.store
            .tasks_in(&[TaskStatus::Assigned, TaskStatus::Running])
    }

    pub fn mark_assigned(&self, id: &str) -> Result<(), StoreError> {
        self.store.set_task_status(id, TaskStatus::Assigned)
    }

    /// Transition to running; stamps `started_at` on first entry
    pub fn mark_running(&self, id: &str) -> Result<(), StoreError> {
        self.store.set_task_status(id, TaskStatus::Running)
    }

    /// Heartbeat, called on every poll round-trip
    pub fn touch(&self, id: &str) -> Result<(), StoreError> {
        self.store.touch_task(id)
    }

    pub fn set_branch(&self, id: &str, branch: &str) -> Result<(), StoreError> {
        self.store.set_task_branch(id, branch)
    }

    pub fn set_pr_url(&self, id: &str, pr_url: &str) -> Result<(), StoreError> {
        self.store.set_task_pr_url(id, pr_url)
    }

    /// Terminal success. Returns false when the task was already terminal.
    pub fn complete(&self, id: &str, result: &str, exit_code: i32) -> Result<bool, StoreError> {
        self.store
            .finish_task(id, TaskStatus::Completed, result, Some(exit_code))
    }

    /// Terminal failure. Returns false when the task was already terminal.
    pub fn fail(
        &self,
        id: &str,
        result: &str,
        exit_code: Option<i32>,
    ) -> Result<bool, StoreError> {
        self.store
            .finish_task(id, TaskStatus::Failed, result, exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(Store::open_in_memory().unwrap()))
    }

    #[test]
    fn create_assigns_uuid_and_slug() {
        let tasks = manager();
        let task = tasks
            .create("https://github.com/acme/widgets", "fix the tests")
            .unwrap();

        assert_eq!(task.id.len(), 36, "uuid-shaped id");
        assert!(task.slug.contains('-'));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn slugs_are_unique_across_tasks() {
        let tasks = manager();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let task = tasks.create("r", "c").unwrap();
            assert!(seen.insert(task.slug));
        }
    }

    #[test]
    fn resolve_accepts_id_or_slug() {
        let tasks = manager();
        let task = tasks.create("r", "c").unwrap();

        assert_eq!(tasks.resolve(&task.id).unwrap().unwrap().id, task.id);
        assert_eq!(tasks.resolve(&task.slug).unwrap().unwrap().id, task.id);
        assert!(tasks.resolve("no-such-task").unwrap().is_none());
    }

    #[test]
    fn lifecycle_reaches_terminal_and_stays_there() {
        let tasks = manager();
        let task = tasks.create("r", "c").unwrap();

        tasks.mark_assigned(&task.id).unwrap();
        tasks.mark_running(&task.id).unwrap();
        let running = tasks.get(&task.id).unwrap().unwrap();
        assert!(running.started_at.is_some());

        assert!(tasks.complete(&task.id, "3 files changed", 0).unwrap());
        let done = tasks.get(&task.id).unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());

        // No resurrection: terminal tasks reject transitions and
        // further finishes are no-ops.
        assert!(tasks.mark_running(&task.id).is_err());
        assert!(!tasks.fail(&task.id, "late failure", None).unwrap());
        let still = tasks.get(&task.id).unwrap().unwrap();
        assert_eq!(still.status, TaskStatus::Completed);
    }

    #[test]
    fn in_flight_lists_assigned_and_running_only() {
        let tasks = manager();
        let a = tasks.create("r", "c").unwrap();
        let b = tasks.create("r", "c").unwrap();
        let c = tasks.create("r", "c").unwrap();

        tasks.mark_assigned(&a.id).unwrap();
        tasks.mark_assigned(&b.id).unwrap();
        tasks.mark_running(&b.id).unwrap();
        tasks.fail(&c.id, "boom", None).unwrap();

        let in_flight = tasks.in_flight().unwrap();
        let ids: Vec<&str> = in_flight.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&a.id.as_str()));
        assert!(ids.contains(&b.id.as_str()));
        assert!(!ids.contains(&c.id.as_str()));
    }
}
