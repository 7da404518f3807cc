//! Agent contract
//!
//! The orchestrator is agent-agnostic: an [`AgentConfig`] names the
//! binary, how to install it on a fresh VM, which credential keys it
//! needs, and its wall-clock budget. Everything else about the agent
//! is the wrapper script's business.

use std::time::Duration;

/// Default agent wall-clock budget
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(600);

/// Invocation contract for one coding agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Command template; `{{context}}` and `{{workdir}}` are
    /// substituted at wrapper-build time, context shell-quoted
    pub command: String,
    /// Binary probed with `command -v` to skip a redundant install
    pub install_check: String,
    /// Idempotent install script, run with only PATH forwarded
    pub install_script: Option<String>,
    /// Credential keys the wrapper must carry for this agent
    pub env_keys: Vec<String>,
    pub timeout: Duration,
}

impl AgentConfig {
    /// Claude Code in non-interactive print mode
    pub fn claude() -> Self {
        Self {
            name: "claude".to_string(),
            command: "cd {{workdir}} && claude -p --dangerously-skip-permissions {{context}}"
                .to_string(),
            install_check: "claude".to_string(),
            install_script: Some(
                "npm install -g @anthropic-ai/claude-code".to_string(),
            ),
            env_keys: vec![
                "ANTHROPIC_API_KEY".to_string(),
                "CLAUDE_CODE_OAUTH_TOKEN".to_string(),
            ],
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// OpenAI Codex CLI in full-auto mode
    pub fn codex() -> Self {
        Self {
            name: "codex".to_string(),
            command: "cd {{workdir}} && codex exec --full-auto {{context}}".to_string(),
            install_check: "codex".to_string(),
            install_script: Some("npm install -g @openai/codex".to_string()),
            env_keys: vec!["OPENAI_API_KEY".to_string()],
            timeout: DEFAULT_AGENT_TIMEOUT,
        }
    }

    /// Look up a built-in agent by name
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "claude" => Some(Self::claude()),
            "codex" => Some(Self::codex()),
            _ => None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Substitute workdir and the shell-quoted context into the template
    pub fn render_command(&self, context: &str, workdir: &str) -> String {
        self.command
            .replace("{{workdir}}", workdir)
            .replace("{{context}}", &shell_quote(context))
    }
}

/// Single-quote a string for POSIX sh, escaping embedded quotes
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
