//! Wrapper protocol: fire-and-forget remote execution
//!
//! The orchestrator ships a self-contained bash wrapper to the VM,
//! launches it under `nohup`, then reconnects every few seconds to
//! observe progress. Agent and orchestrator share nothing but files
//! under `/workspace/.hal/`.

mod executor;
mod protocol;
mod script;

pub use executor::{authenticated_url, repo_name_from_url, ExecOptions, TaskExecutor};
pub use protocol::{
    fetch_command, kill_command, parse_done_content, parse_probe_output, probe_command,
    DoneStatus, ProbeStatus, HAL_DIR,
};
pub use script::WrapperSpec;
