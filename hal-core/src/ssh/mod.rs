//! Remote command execution over OpenSSH
//!
//! Agent VMs are reached through the system `ssh` binary rather than
//! an in-process SSH stack: the golden images already trust the
//! injected key, host keys are ephemeral (fresh VM, fresh key), and
//! the CLI semantics of ConnectTimeout/BatchMode are exactly what the
//! fire-and-forget protocol needs on a lossy transport.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::SshError;

/// How long a single connection attempt may take
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default budget for [`RemoteShell::wait_until_ready`]
pub const READY_BUDGET: Duration = Duration::from_secs(180);
/// Backoff between readiness probes
pub const READY_BACKOFF: Duration = Duration::from_secs(5);

/// Output of a remote command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Remote exit status; -1 when the process died without one
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Handle for running commands on one remote host
#[derive(Debug, Clone)]
pub struct RemoteShell {
    host: String,
    port: u16,
    user: String,
    key_path: Option<PathBuf>,
}

impl RemoteShell {
    pub fn new(host: impl Into<String>, port: Option<u16>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.unwrap_or(22),
            user: user.into(),
            key_path: None,
        }
    }

    /// Use a specific private key instead of the agent/default keys
    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Build the ssh invocation for `remote_cmd`
    ///
    /// Extracted for testability - command construction is verified
    /// without spawning processes. BatchMode keeps a missing key from
    /// hanging on a password prompt; host-key checking is off because
    /// every VM boots with a fresh host key on an ephemeral IP.
    pub fn build_command(&self, remote_cmd: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"))
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-p")
            .arg(self.port.to_string());
        if let Some(ref key) = self.key_path {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(format!("{}@{}", self.user, self.host));
        cmd.arg(remote_cmd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a remote command, blocking until it finishes or the timeout
    /// elapses. Timeouts kill the local ssh process; the remote side of
    /// an interrupted session is left to its own devices.
    pub async fn run(&self, remote_cmd: &str, timeout: Duration) -> Result<CommandOutput, SshError> {
        let mut cmd = self.build_command(remote_cmd);
        let child = cmd.spawn().map_err(SshError::Spawn)?;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| SshError::Timeout {
                seconds: timeout.as_secs(),
            })?
            .map_err(SshError::Spawn)?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Like [`RemoteShell::run`] but maps a non-zero exit to an error
    pub async fn run_checked(
        &self,
        remote_cmd: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        let output = self.run(remote_cmd, timeout).await?;
        if !output.success() {
            return Err(SshError::Failed {
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run a remote command with bytes piped to its stdin.
    ///
    /// Used for the wrapper upload: the payload travels base64-encoded
    /// on stdin so the launch command's own stdin stays untouched.
    pub async fn run_with_stdin(
        &self,
        remote_cmd: &str,
        input: &[u8],
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        let mut cmd = self.build_command(remote_cmd);
        cmd.stdin(Stdio::piped());
        let mut child = cmd.spawn().map_err(SshError::Spawn)?;
        let mut stdin = child.stdin.take().expect("stdin was piped");

        let write_and_wait = async {
            stdin.write_all(input).await?;
            drop(stdin);
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(timeout, write_and_wait)
            .await
            .map_err(|_| SshError::Timeout {
                seconds: timeout.as_secs(),
            })?
            .map_err(SshError::Spawn)?;
        if !output.status.success() {
            return Err(SshError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(CommandOutput {
            status: 0,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Probe until the host answers, up to `budget`.
    ///
    /// Fresh VMs report active at the provider well before sshd is up,
    /// so every setup starts here.
    pub async fn wait_until_ready(
        &self,
        budget: Duration,
        backoff: Duration,
    ) -> Result<(), SshError> {
        let started = tokio::time::Instant::now();
        loop {
            match self.run("echo hal-ready", Duration::from_secs(CONNECT_TIMEOUT_SECS + 5)).await {
                Ok(output) if output.success() => return Ok(()),
                Ok(_) | Err(SshError::Timeout { .. }) | Err(SshError::Failed { .. }) => {}
                Err(e) => return Err(e),
            }
            if started.elapsed() >= budget {
                return Err(SshError::Unreachable {
                    host: self.host.clone(),
                    seconds: budget.as_secs(),
                });
            }
            tokio::time::sleep(backoff).await;
        }
    }
}
