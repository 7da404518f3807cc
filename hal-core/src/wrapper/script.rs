//! Wrapper script generation
//!
//! The wrapper is a self-contained bash script that runs the agent on
//! the VM, detached from any SSH session, and communicates with the
//! orchestrator purely through files under `/workspace/.hal/`.
//! Generation is deterministic: the same spec produces the same bytes.

use crate::agent::shell_quote;

use super::protocol::HAL_DIR;

/// Marker lines delimiting the credential block scrubbed from the
/// on-disk copy of run.sh
const CRED_BEGIN: &str = "# ---hal-credentials---";
const CRED_END: &str = "# ---end-hal-credentials---";

/// Git identity used for the fallback commit
const GIT_NAME: &str = "hal9999";
const GIT_EMAIL: &str = "hal9999@users.noreply.github.com";

/// Everything the wrapper needs to know, resolved ahead of time
#[derive(Debug, Clone)]
pub struct WrapperSpec {
    /// Fully rendered agent invocation (context already substituted)
    pub agent_command: String,
    /// Rendered plan-phase invocation; present only in plan-first mode
    pub plan_command: Option<String>,
    /// Repository checkout on the VM, e.g. `/workspace/widgets`
    pub workdir: String,
    /// Feature branch the fallback commit pushes
    pub branch: String,
    /// PATH exported inline (non-sensitive)
    pub path_env: String,
    /// Sensitive environment, loaded via the scrubbed block
    pub env: Vec<(String, String)>,
    /// Whether to look for a PR and record its URL
    pub create_pr: bool,
}

impl WrapperSpec {
    /// Render the wrapper. Byte-identical output for identical specs.
    pub fn build_script(&self) -> String {
        let mut script = String::new();

        script.push_str("#!/bin/bash\n");
        script.push_str("# hal9999 wrapper: runs the agent detached from the SSH session.\n");
        script.push_str(&format!("HAL_DIR={HAL_DIR}\n"));
        script.push_str("mkdir -p \"$HAL_DIR/result\"\n");
        script.push_str("AGENT_EXIT=1\n");
        // The done sentinel must appear no matter where the script
        // dies; strict mode stays off for the same reason.
        script.push_str("trap 'echo \"$AGENT_EXIT\" > \"$HAL_DIR/done\"' EXIT\n");
        script.push_str(&format!("export PATH={}\n", shell_quote(&self.path_env)));
        script.push('\n');

        self.push_credential_block(&mut script);
        script.push('\n');

        script.push_str(&format!("cd {} || exit 1\n", shell_quote(&self.workdir)));
        script.push('\n');

        match &self.plan_command {
            Some(plan_command) => {
                script.push_str("# Plan first, reset, then execute against the plan\n");
                script.push_str(&format!(
                    "{plan_command} >> \"$HAL_DIR/output.log\" 2>&1\n"
                ));
                script.push_str("if [ -s \"$HAL_DIR/plan.md\" ]; then\n");
                script.push_str("  git checkout -- . >> \"$HAL_DIR/output.log\" 2>&1\n");
                script.push_str("  git clean -fd >> \"$HAL_DIR/output.log\" 2>&1\n");
                script.push_str(&format!(
                    "  {} >> \"$HAL_DIR/output.log\" 2>&1\n",
                    self.agent_command
                ));
                script.push_str("  AGENT_EXIT=$?\n");
                script.push_str("else\n");
                script.push_str(
                    "  echo 'hal9999: no plan produced, falling back to single-shot run' \
                     >> \"$HAL_DIR/output.log\"\n",
                );
                script.push_str(&format!(
                    "  {} >> \"$HAL_DIR/output.log\" 2>&1\n",
                    self.agent_command
                ));
                script.push_str("  AGENT_EXIT=$?\n");
                script.push_str("fi\n");
            }
            None => {
                script.push_str(&format!(
                    "{} >> \"$HAL_DIR/output.log\" 2>&1\n",
                    self.agent_command
                ));
                script.push_str("AGENT_EXIT=$?\n");
            }
        }
        script.push('\n');

        script.push_str("# Safe fallback: keep whatever the agent left behind\n");
        script.push_str(&format!("cd {}\n", shell_quote(&self.workdir)));
        script.push_str("if ! git diff --quiet HEAD 2>/dev/null; then\n");
        script.push_str("  git add -A >> \"$HAL_DIR/output.log\" 2>&1\n");
        script.push_str(&format!(
            "  git -c user.name={} -c user.email={} commit -m 'Agent changes' \
             >> \"$HAL_DIR/output.log\" 2>&1\n",
            shell_quote(GIT_NAME),
            shell_quote(GIT_EMAIL)
        ));
        script.push_str("fi\n");
        script.push_str(&format!(
            "git push -u origin {} >> \"$HAL_DIR/output.log\" 2>&1 || true\n",
            shell_quote(&self.branch)
        ));
        if self.create_pr {
            script.push_str(
                "gh pr view --json url --jq '.url' > \"$HAL_DIR/result/pr-url.txt\" \
                 2>/dev/null || true\n",
            );
        }
        script.push_str(
            "git diff --stat HEAD 2>/dev/null | head -20 > \"$HAL_DIR/result/diff-stat.txt\" \
             || true\n",
        );
        script.push_str("git diff HEAD > \"$HAL_DIR/result/diff.patch\" 2>/dev/null || true\n");
        script.push('\n');
        script.push_str("exit \"$AGENT_EXIT\"\n");

        script
    }

    /// Credentials travel inside run.sh but must not stay there: the
    /// block writes a temp env file, sources it, deletes it, and then
    /// scrubs itself out of the on-disk run.sh. sed's rename-based
    /// in-place edit leaves the running copy untouched.
    fn push_credential_block(&self, script: &mut String) {
        script.push_str(CRED_BEGIN);
        script.push('\n');
        script.push_str("cat > \"$HAL_DIR/env.sh\" <<'HAL_ENV'\n");
        for (key, value) in &self.env {
            script.push_str(&format!("export {}={}\n", key, shell_quote(value)));
        }
        script.push_str("HAL_ENV\n");
        script.push_str(". \"$HAL_DIR/env.sh\"\n");
        script.push_str("rm -f \"$HAL_DIR/env.sh\"\n");
        script.push_str(&format!(
            "sed -i '/^{begin}$/,/^{end}$/d' \"$HAL_DIR/run.sh\" 2>/dev/null || true\n",
            begin = sed_escape(CRED_BEGIN),
            end = sed_escape(CRED_END),
        ));
        script.push_str(CRED_END);
        script.push('\n');
    }
}

/// Escape a literal for use inside a sed address pattern
fn sed_escape(s: &str) -> String {
    s.replace('/', r"\/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WrapperSpec {
        WrapperSpec {
            agent_command: "cd /workspace/widgets && claude -p 'fix it'".to_string(),
            plan_command: None,
            workdir: "/workspace/widgets".to_string(),
            branch: "hal/abc12345".to_string(),
            path_env: "/usr/local/bin:/usr/bin:/bin".to_string(),
            env: vec![
                ("ANTHROPIC_API_KEY".to_string(), "sk-test".to_string()),
                ("GITHUB_TOKEN".to_string(), "ghp_test".to_string()),
            ],
            create_pr: true,
        }
    }

    #[test]
    fn identical_specs_render_identical_bytes() {
        assert_eq!(spec().build_script(), spec().build_script());
    }

    #[test]
    fn script_writes_done_on_every_path() {
        let script = spec().build_script();
        assert!(script.contains("trap 'echo \"$AGENT_EXIT\" > \"$HAL_DIR/done\"' EXIT"));
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(!script.contains("set -e"), "strict mode would skip the sentinel");
    }

    #[test]
    fn credentials_are_sourced_deleted_and_scrubbed() {
        let script = spec().build_script();
        assert!(script.contains("export ANTHROPIC_API_KEY='sk-test'"));
        assert!(script.contains(". \"$HAL_DIR/env.sh\""));
        assert!(script.contains("rm -f \"$HAL_DIR/env.sh\""));
        assert!(script.contains("sed -i"));

        // The scrub range covers the whole credential block including
        // the sed line itself.
        let begin = script.find(CRED_BEGIN).unwrap();
        let end = script.find(CRED_END).unwrap();
        let block = &script[begin..end];
        assert!(block.contains("sed -i"));
        assert!(block.contains("GITHUB_TOKEN"));
    }

    #[test]
    fn simulated_scrub_removes_every_secret() {
        let script = spec().build_script();
        // Emulate the sed range delete line-wise.
        let mut scrubbed = String::new();
        let mut inside = false;
        for line in script.lines() {
            if line == CRED_BEGIN {
                inside = true;
                continue;
            }
            if line == CRED_END {
                inside = false;
                continue;
            }
            if !inside {
                scrubbed.push_str(line);
                scrubbed.push('\n');
            }
        }
        assert!(!scrubbed.contains("sk-test"));
        assert!(!scrubbed.contains("ghp_test"));
        assert!(scrubbed.contains("git push"), "rest of the script survives");
    }

    #[test]
    fn fallback_commits_pushes_and_captures_diffs() {
        let script = spec().build_script();
        assert!(script.contains("git add -A"));
        assert!(script.contains("git push -u origin 'hal/abc12345'"));
        assert!(script.contains("head -20 > \"$HAL_DIR/result/diff-stat.txt\""));
        assert!(script.contains("git diff HEAD > \"$HAL_DIR/result/diff.patch\""));
        assert!(script.contains("gh pr view --json url"));
    }

    #[test]
    fn no_pr_mode_skips_the_pr_probe() {
        let mut s = spec();
        s.create_pr = false;
        assert!(!s.build_script().contains("gh pr view"));
    }

    #[test]
    fn plan_first_runs_twice_with_reset_between() {
        let mut s = spec();
        s.plan_command = Some("cd /workspace/widgets && claude -p 'write a plan'".to_string());
        let script = s.build_script();

        let plan_pos = script.find("write a plan").unwrap();
        let reset_pos = script.find("git checkout -- .").unwrap();
        let exec_pos = script.find("[ -s \"$HAL_DIR/plan.md\" ]").unwrap();
        assert!(plan_pos < exec_pos);
        assert!(exec_pos < reset_pos);
        assert!(script.contains("falling back to single-shot run"));
        assert!(script.contains("git clean -fd"));
    }
}
