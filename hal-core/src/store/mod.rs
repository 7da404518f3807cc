//! Durable state for VMs, tasks and images
//!
//! A single SQLite database in WAL mode holds everything the
//! orchestrator must not lose across restarts. One process owns the
//! writer; readers (status commands, tail) go through the same
//! connection. Multi-row transitions — binding a task to a VM,
//! force-failing a stale task — run inside a single transaction.

mod image;
mod migrations;
pub mod slug;
mod task;
mod vm;

pub use image::{ImageRecord, NewImage};
pub use task::{NewTask, TaskRecord, TaskStatus};
pub use vm::{NewVm, OrphanKind, VmRecord, VmStatus};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use migrations::Migrator;

const VM_COLS: &str = "id, label, provider, ip, ssh_port, status, task_id, snapshot_id, \
     region, plan, created_at, updated_at, idle_since, last_error";

const TASK_COLS: &str = "id, slug, repo_url, context, status, vm_id, result, exit_code, \
     branch, pr_url, created_at, updated_at, started_at, completed_at";

/// Current time in unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// SQLite-backed orchestrator store
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL lets status readers overlap the single writer.
        conn.query_row("PRAGMA journal_mode=WAL", [], |row| {
            row.get::<_, String>(0)
        })?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        Migrator::new(&conn).migrate()
    }

    // ==================== VMs ====================

    /// Insert a fresh `provisioning` row. The id is the label until the
    /// provider answers with the real instance id (see [`Store::rename_vm`]).
    pub fn insert_vm(&self, vm: &NewVm) -> Result<VmRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO vms (id, label, provider, status, snapshot_id, region, plan, \
             created_at, updated_at) VALUES (?1, ?2, ?3, 'provisioning', ?4, ?5, ?6, ?7, ?7)",
            params![
                vm.id,
                vm.label,
                vm.provider,
                vm.snapshot_id,
                vm.region,
                vm.plan,
                now
            ],
        )?;
        fetch_vm(&conn, &vm.id)?.ok_or_else(|| StoreError::NotFound(vm.id.clone()))
    }

    pub fn get_vm(&self, id: &str) -> Result<Option<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        fetch_vm(&conn, id)
    }

    /// Swap a provisioning row's identity to the provider-assigned id
    /// and record the network coordinates the provider returned.
    pub fn rename_vm(
        &self,
        old_id: &str,
        new_id: &str,
        ip: Option<&str>,
        ssh_port: Option<u16>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE vms SET id=?1, ip=?2, ssh_port=?3, updated_at=?4 WHERE id=?5",
            params![new_id, ip, ssh_port.map(i64::from), now_ms(), old_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(old_id.to_string()));
        }
        Ok(())
    }

    pub fn update_vm_network(
        &self,
        id: &str,
        ip: &str,
        ssh_port: Option<u16>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE vms SET ip=?1, ssh_port=?2, updated_at=?3 WHERE id=?4",
            params![ip, ssh_port.map(i64::from), now_ms(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Transition a VM's state. Clears `idle_since` always and detaches
    /// the task unless the new state is `assigned`, keeping the
    /// task-attachment and idle invariants true by construction.
    pub fn set_vm_status(&self, id: &str, status: VmStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = if status == VmStatus::Assigned {
            conn.execute(
                "UPDATE vms SET status=?1, idle_since=NULL, updated_at=?2 WHERE id=?3",
                params![status.as_str(), now_ms(), id],
            )?
        } else {
            conn.execute(
                "UPDATE vms SET status=?1, task_id=NULL, idle_since=NULL, updated_at=?2 \
                 WHERE id=?3",
                params![status.as_str(), now_ms(), id],
            )?
        };
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Demote a VM to `error`, recording the failure text.
    pub fn set_vm_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE vms SET status='error', task_id=NULL, idle_since=NULL, \
             last_error=?1, updated_at=?2 WHERE id=?3",
            params![message, now_ms(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Return a VM to the warm pool: `ready`, idle clock started, no task.
    pub fn mark_vm_idle(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let changed = conn.execute(
            "UPDATE vms SET status='ready', task_id=NULL, idle_since=?1, updated_at=?1 \
             WHERE id=?2",
            params![now, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Whether a warm VM is available right now (advisory; the claim
    /// itself is the authoritative, transactional check)
    pub fn has_ready_vm(&self) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vms WHERE status='ready' AND task_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Atomically claim one warm VM for `task_id`. The select and both
    /// updates share a transaction, so two concurrent acquires can
    /// never claim the same row.
    pub fn claim_ready_vm(&self, task_id: &str) -> Result<Option<VmRecord>, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let vm_id: Option<String> = tx
            .query_row(
                "SELECT id FROM vms WHERE status='ready' AND task_id IS NULL LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let Some(vm_id) = vm_id else {
            return Ok(None);
        };
        let now = now_ms();
        tx.execute(
            "UPDATE vms SET status='assigned', task_id=?1, idle_since=NULL, updated_at=?2 \
             WHERE id=?3",
            params![task_id, now, vm_id],
        )?;
        tx.execute(
            "UPDATE tasks SET vm_id=?1, updated_at=?2 WHERE id=?3",
            params![vm_id, now, task_id],
        )?;
        tx.commit()?;
        fetch_vm(&conn, &vm_id)
    }

    /// Bind a freshly provisioned VM to its task in one transaction.
    pub fn bind_vm_to_task(&self, vm_id: &str, task_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = now_ms();
        tx.execute(
            "UPDATE vms SET status='assigned', task_id=?1, idle_since=NULL, updated_at=?2 \
             WHERE id=?3",
            params![task_id, now, vm_id],
        )?;
        tx.execute(
            "UPDATE tasks SET vm_id=?1, updated_at=?2 WHERE id=?3",
            params![vm_id, now, task_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Number of VMs counting against a slot's capacity
    pub fn count_active_vms(&self, provider: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vms WHERE provider=?1 AND \
             status IN ('provisioning','ready','assigned')",
            [provider],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Warm VMs plus VMs on their way to warm, for pre-warm accounting
    pub fn count_unassigned(&self, provider: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vms WHERE provider=?1 AND task_id IS NULL AND \
             status IN ('provisioning','ready')",
            [provider],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn list_vms(&self) -> Result<Vec<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {VM_COLS} FROM vms ORDER BY created_at"))?;
        let rows = stmt.query_map([], row_to_vm)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn vms_by_status(&self, status: VmStatus) -> Result<Vec<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VM_COLS} FROM vms WHERE status=?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([status.as_str()], row_to_vm)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// VMs sitting in the warm pool with an idle clock running
    pub fn idle_vms(&self) -> Result<Vec<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VM_COLS} FROM vms WHERE status='ready' AND idle_since IS NOT NULL \
             ORDER BY idle_since"
        ))?;
        let rows = stmt.query_map([], row_to_vm)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Every VM not yet in a terminal state
    pub fn active_vms(&self) -> Result<Vec<VmRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {VM_COLS} FROM vms WHERE status NOT IN ('destroyed','error') \
             ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_vm)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// `assigned` VMs whose task is finished, missing, or stale.
    ///
    /// One query joins tasks onto assigned VMs; classification happens
    /// here so the pool can decide warm-return vs destroy per orphan.
    pub fn orphaned_vms(&self, stale_after_ms: i64) -> Result<Vec<(VmRecord, OrphanKind)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now_ms() - stale_after_ms;
        let sql = format!(
            "SELECT {cols}, t.id, t.status, t.updated_at FROM vms v \
             LEFT JOIN tasks t ON v.task_id = t.id WHERE v.status='assigned'",
            cols = VM_COLS
                .split(", ")
                .map(|c| format!("v.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let vm = row_to_vm(row)?;
            let task_id: Option<String> = row.get(14)?;
            let task_status: Option<String> = row.get(15)?;
            let task_updated: Option<i64> = row.get(16)?;
            Ok((vm, task_id, task_status, task_updated))
        })?;

        let mut orphans = Vec::new();
        for row in rows {
            let (vm, task_id, task_status, task_updated) = row?;
            let kind = match (task_id, task_status) {
                (None, _) => Some(OrphanKind::TaskMissing),
                (Some(_), Some(status)) => {
                    let status = TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed);
                    if status.is_terminal() {
                        Some(OrphanKind::TaskFinished)
                    } else if matches!(status, TaskStatus::Running | TaskStatus::Assigned)
                        && task_updated.is_some_and(|at| at < cutoff)
                    {
                        Some(OrphanKind::TaskStale {
                            task_id: vm.task_id.clone().unwrap_or_default(),
                        })
                    } else {
                        None
                    }
                }
                (Some(_), None) => Some(OrphanKind::TaskMissing),
            };
            if let Some(kind) = kind {
                orphans.push((vm, kind));
            }
        }
        Ok(orphans)
    }

    // ==================== Tasks ====================

    pub fn insert_task(&self, task: &NewTask) -> Result<TaskRecord, StoreError> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO tasks (id, slug, repo_url, context, status, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?5)",
            params![task.id, task.slug, task.repo_url, task.context, now],
        )?;
        fetch_task(&conn, &task.id)?.ok_or_else(|| StoreError::NotFound(task.id.clone()))
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        fetch_task(&conn, id)
    }

    pub fn get_task_by_slug(&self, slug: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("SELECT {TASK_COLS} FROM tasks WHERE slug=?1"))?;
        Ok(stmt.query_row([slug], row_to_task).optional()?)
    }

    pub fn slug_taken(&self, slug: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE slug=?1",
            [slug],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_tasks(&self, limit: Option<usize>) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = match limit {
            Some(n) => format!("SELECT {TASK_COLS} FROM tasks ORDER BY created_at DESC LIMIT {n}"),
            None => format!("SELECT {TASK_COLS} FROM tasks ORDER BY created_at DESC"),
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn tasks_in(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let list = statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE status IN ({list}) ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Non-terminal transition with timestamp stamping. `running` sets
    /// `started_at` on first entry; transitions on a terminal task are
    /// rejected.
    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let current = fetch_task(&conn, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if current.status.is_terminal() {
            return Err(StoreError::TerminalTask {
                id: id.to_string(),
                status: current.status.to_string(),
            });
        }
        let now = now_ms();
        match status {
            TaskStatus::Running => {
                conn.execute(
                    "UPDATE tasks SET status=?1, updated_at=?2, \
                     started_at=COALESCE(started_at, ?2) WHERE id=?3",
                    params![status.as_str(), now, id],
                )?;
            }
            _ => {
                conn.execute(
                    "UPDATE tasks SET status=?1, updated_at=?2 WHERE id=?3",
                    params![status.as_str(), now, id],
                )?;
            }
        }
        Ok(())
    }

    /// Heartbeat: bump `updated_at` so GC can tell a live poller from a
    /// dead one.
    pub fn touch_task(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tasks SET updated_at=?1 WHERE id=?2",
            params![now_ms(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_task_branch(&self, id: &str, branch: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET branch=?1, updated_at=?2 WHERE id=?3",
            params![branch, now_ms(), id],
        )?;
        Ok(())
    }

    pub fn set_task_pr_url(&self, id: &str, pr_url: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET pr_url=?1, updated_at=?2 WHERE id=?3",
            params![pr_url, now_ms(), id],
        )?;
        Ok(())
    }

    /// Terminal transition. Returns false (and changes nothing) when
    /// the task is already terminal, so repeated force-fails are no-ops.
    pub fn finish_task(
        &self,
        id: &str,
        status: TaskStatus,
        result: &str,
        exit_code: Option<i32>,
    ) -> Result<bool, StoreError> {
        debug_assert!(status.is_terminal());
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        let changed = conn.execute(
            "UPDATE tasks SET status=?1, result=?2, exit_code=?3, updated_at=?4, \
             completed_at=?4 WHERE id=?5 AND status NOT IN ('completed','failed')",
            params![status.as_str(), result, exit_code, now, id],
        )?;
        Ok(changed > 0)
    }

    /// Force-fail used by GC and recovery
    pub fn force_fail_task(&self, id: &str, result: &str) -> Result<bool, StoreError> {
        self.finish_task(id, TaskStatus::Failed, result, None)
    }

    /// Running or assigned tasks whose heartbeat predates the cutoff
    pub fn stale_tasks(&self, stale_after_ms: i64) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now_ms() - stale_after_ms;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLS} FROM tasks WHERE status IN ('running','assigned') \
             AND updated_at < ?1 ORDER BY updated_at"
        ))?;
        let rows = stmt.query_map([cutoff], row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ==================== Test support ====================

    /// Shift a VM's update stamp into the past. Test support only.
    #[doc(hidden)]
    pub fn age_vm_for_test(&self, id: &str, ms: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE vms SET updated_at = updated_at - ?1 WHERE id=?2",
            params![ms, id],
        )
        .unwrap();
    }

    /// Shift a task's heartbeat into the past. Test support only.
    #[doc(hidden)]
    pub fn age_task_for_test(&self, id: &str, ms: i64) {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET updated_at = updated_at - ?1 WHERE id=?2",
            params![ms, id],
        )
        .unwrap();
    }

    // ==================== Images ====================

    pub fn insert_image(&self, image: &NewImage) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO images (id, provider, label, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![image.id, image.provider, image.label, image.status, now_ms()],
        )?;
        Ok(())
    }

    pub fn list_images(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, provider, label, status, created_at FROM images ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ImageRecord {
                id: row.get(0)?,
                provider: row.get(1)?,
                label: row.get(2)?,
                status: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_image(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM images WHERE id=?1", [id])?;
        Ok(())
    }
}

fn fetch_vm(conn: &Connection, id: &str) -> Result<Option<VmRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {VM_COLS} FROM vms WHERE id=?1"))?;
    Ok(stmt.query_row([id], row_to_vm).optional()?)
}

fn fetch_task(conn: &Connection, id: &str) -> Result<Option<TaskRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLS} FROM tasks WHERE id=?1"))?;
    Ok(stmt.query_row([id], row_to_task).optional()?)
}

fn row_to_vm(row: &Row) -> Result<VmRecord, rusqlite::Error> {
    let status: String = row.get(5)?;
    let ssh_port: Option<i64> = row.get(4)?;
    Ok(VmRecord {
        id: row.get(0)?,
        label: row.get(1)?,
        provider: row.get(2)?,
        ip: row.get(3)?,
        ssh_port: ssh_port.map(|p| p as u16),
        status: VmStatus::parse(&status).unwrap_or(VmStatus::Error),
        task_id: row.get(6)?,
        snapshot_id: row.get(7)?,
        region: row.get(8)?,
        plan: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        idle_since: row.get(12)?,
        last_error: row.get(13)?,
    })
}

fn row_to_task(row: &Row) -> Result<TaskRecord, rusqlite::Error> {
    let status: String = row.get(4)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        slug: row.get(1)?,
        repo_url: row.get(2)?,
        context: row.get(3)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        vm_id: row.get(5)?,
        result: row.get(6)?,
        exit_code: row.get(7)?,
        branch: row.get(8)?,
        pr_url: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        started_at: row.get(12)?,
        completed_at: row.get(13)?,
    })
}
