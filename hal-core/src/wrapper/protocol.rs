//! On-VM protocol
//!
//! Orchestrator and wrapper communicate only through files under
//! `/workspace/.hal/`: `run.sh`, `output.log`, `done`, `plan.md` and
//! `result/{diff-stat.txt, diff.patch, pr-url.txt}`. One poll round
//! trip both probes the done sentinel and reports the log size.

/// Root of the on-VM protocol files
pub const HAL_DIR: &str = "/workspace/.hal";

/// Combined probe issued every poll interval: one SSH round trip
/// answers "is it done" and "how big is the log".
pub fn probe_command() -> String {
    format!(
        "test -f {HAL_DIR}/done && echo HAL:DONE || echo HAL:WAITING; \
         stat -c%s {HAL_DIR}/output.log 2>/dev/null || echo 0"
    )
}

/// Fetch `len` bytes of output.log starting at `offset` (0-based)
pub fn fetch_command(offset: u64, len: u64) -> String {
    format!("tail -c +{} {HAL_DIR}/output.log | head -c {}", offset + 1, len)
}

/// Best-effort remote kill used when the agent exceeds its budget.
/// The manufactured sentinel unblocks collection.
pub fn kill_command() -> String {
    format!("pkill -f run.sh; echo timeout > {HAL_DIR}/done")
}

/// What one probe round trip reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStatus {
    pub done: bool,
    pub log_size: u64,
}

/// Parse the two probe lines. Malformed output reads as "still
/// waiting, nothing new" so one garbled round trip never fails a task.
pub fn parse_probe_output(stdout: &str) -> ProbeStatus {
    let mut lines = stdout.lines();
    let done = matches!(lines.next(), Some("HAL:DONE"));
    let log_size = lines
        .next()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(0);
    ProbeStatus { done, log_size }
}

/// Decoded content of the `done` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoneStatus {
    pub exit_code: i32,
    /// Original text when `done` held something non-numeric
    /// (e.g. `timeout`); preserved for the task result, never
    /// surfaced as an exit code.
    pub reason: Option<String>,
}

/// Parse the `done` sentinel file: a decimal exit code on one line,
/// or a textual reason that coerces to exit 1.
pub fn parse_done_content(content: &str) -> DoneStatus {
    let trimmed = content.trim();
    match trimmed.parse::<i32>() {
        Ok(exit_code) => DoneStatus {
            exit_code,
            reason: None,
        },
        Err(_) => DoneStatus {
            exit_code: 1,
            reason: (!trimmed.is_empty()).then(|| trimmed.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_parses_waiting_and_done() {
        let status = parse_probe_output("HAL:WAITING\n2048\n");
        assert_eq!(
            status,
            ProbeStatus {
                done: false,
                log_size: 2048
            }
        );

        let status = parse_probe_output("HAL:DONE\n4096\n");
        assert_eq!(
            status,
            ProbeStatus {
                done: true,
                log_size: 4096
            }
        );
    }

    #[test]
    fn garbled_probe_reads_as_waiting() {
        let status = parse_probe_output("Connection reset by peer\n");
        assert_eq!(
            status,
            ProbeStatus {
                done: false,
                log_size: 0
            }
        );
        assert_eq!(
            parse_probe_output(""),
            ProbeStatus {
                done: false,
                log_size: 0
            }
        );
    }

    #[test]
    fn fetch_command_uses_one_based_tail_offset() {
        let cmd = fetch_command(100, 50);
        assert!(cmd.contains("tail -c +101"));
        assert!(cmd.contains("head -c 50"));
    }

    #[test]
    fn done_parses_numeric_exit_codes() {
        assert_eq!(
            parse_done_content("0\n"),
            DoneStatus {
                exit_code: 0,
                reason: None
            }
        );
        assert_eq!(parse_done_content("  137 ").exit_code, 137);
    }

    #[test]
    fn timeout_coerces_to_one_but_keeps_the_reason() {
        let status = parse_done_content("timeout\n");
        assert_eq!(status.exit_code, 1);
        assert_eq!(status.reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn empty_done_coerces_to_one_without_reason() {
        let status = parse_done_content("");
        assert_eq!(status.exit_code, 1);
        assert_eq!(status.reason, None);
    }
}
