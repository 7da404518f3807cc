//! hal-core: agent-VM orchestration
//!
//! This crate provides the core of hal9999:
//!
//! - **Store** - [`store::Store`], SQLite-backed state for VMs, tasks
//!   and images, recovered across process restarts
//! - **Providers** - the [`provider::Provider`] contract plus a
//!   scriptable [`provider::MockProvider`]
//! - **VM pool** - [`pool::VmPool`] capacity control, warm pooling,
//!   reaping, orphan release and reconcile
//! - **Remote shell** - [`ssh::RemoteShell`] command execution over
//!   OpenSSH with per-operation timeouts
//! - **Wrapper protocol** - [`wrapper::TaskExecutor`] fire-and-forget
//!   setup/poll/collect over `/workspace/.hal/` files
//! - **Orchestrator** - [`orchestrator::Orchestrator`] composing the
//!   above: submit, await, recover
//!
//! # Architecture
//!
//! ```text
//! operator ──▶ Orchestrator ──▶ VmPool ──▶ Provider (cloud/local)
//!                   │               │
//!                   ▼               ▼
//!             TaskExecutor ──▶ RemoteShell ──▶ agent VM
//!                   │                           /workspace/.hal/
//!                   ▼
//!          logs/ + events/ + Store (hal9999.db)
//! ```

pub mod agent;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logs;
pub mod orchestrator;
pub mod pool;
pub mod provider;
pub mod ssh;
pub mod store;
pub mod tasks;
pub mod wrapper;

// Re-export key types for convenience
pub use agent::AgentConfig;
pub use config::{HalConfig, SlotConfig};
pub use credentials::Credentials;
pub use error::{
    ConfigError, ExecError, HalError, LogError, PoolError, ProviderError, SshError, StoreError,
};
pub use logs::{EventEnvelope, EventWriter, LogTail, TaskEvent, TaskLogWriter};
pub use orchestrator::{Orchestrator, RecoverReport};
pub use pool::{ReconcileReport, VmPool};
pub use provider::{CreateInstance, Instance, InstanceStatus, MockProvider, Provider};
pub use ssh::RemoteShell;
pub use store::{Store, TaskRecord, TaskStatus, VmRecord, VmStatus};
pub use tasks::TaskManager;
pub use wrapper::{ExecOptions, TaskExecutor, WrapperSpec};
