//! Error types for hal-core

use thiserror::Error;

/// Top-level error type for hal-core
#[derive(Error, Debug)]
pub enum HalError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("SSH error: {0}")]
    Ssh(#[from] SshError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),
}

/// Errors from startup configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(String),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },

    #[error("Unknown provider '{0}' in HAL_PROVIDERS")]
    UnknownProvider(String),
}

/// Errors from the persistent store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Task {id} is already {status}; refusing transition")]
    TerminalTask { id: String, status: String },
}

/// Errors from a provider backend
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Instance not found: {0}")]
    NotFound(String),

    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Timed out waiting for instance {id} after {seconds}s")]
    Timeout { id: String, seconds: u64 },
}

impl ProviderError {
    /// True when the backend reports the instance as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

/// Errors from the VM pool
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("all provider slots at capacity (total max: {total_max})")]
    AtCapacity { total_max: usize },

    #[error("Unknown slot '{0}'")]
    UnknownSlot(String),

    #[error("No provider registered for '{0}'")]
    NoProvider(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the remote shell
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Failed to spawn ssh: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Remote command timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Host {host} did not answer within {seconds}s")]
    Unreachable { host: String, seconds: u64 },

    #[error("Remote command exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

/// Errors from task execution (setup, launch, poll, collect)
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Setup failed during {phase}: {reason}")]
    Setup { phase: String, reason: String },

    #[error("Remote launch failed: {0}")]
    Launch(String),

    #[error("Agent exceeded its {seconds}s wall-clock budget")]
    AgentTimeout { seconds: u64 },

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Errors from the per-task log and event writers
#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Writer already finalized")]
    Finalized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_error_carries_the_total_in_its_message() {
        let err = PoolError::AtCapacity { total_max: 1 };
        assert!(err.to_string().contains("at capacity (total max: 1)"));
    }

    #[test]
    fn provider_not_found_is_detectable() {
        assert!(ProviderError::NotFound("vm-1".into()).is_not_found());
        assert!(!ProviderError::Api("boom".into()).is_not_found());
    }

    #[test]
    fn pool_error_converts_from_provider_error() {
        let err: PoolError = ProviderError::Api("rate limited".into()).into();
        assert!(matches!(err, PoolError::Provider(_)));
    }

    #[test]
    fn hal_error_converts_from_store_error() {
        let err: HalError = StoreError::NotFound("task xyz".into()).into();
        assert!(err.to_string().contains("task xyz"));
    }

    #[test]
    fn ssh_timeout_displays_budget() {
        let err = SshError::Timeout { seconds: 15 };
        assert!(err.to_string().contains("15s"));
    }

    #[test]
    fn exec_error_converts_from_ssh_error() {
        let err: ExecError = SshError::Timeout { seconds: 30 }.into();
        assert!(matches!(err, ExecError::Ssh(_)));
    }
}
