use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::gate::GatePolicy;
use crate::language::LanguageRegistry;
use crate::launcher::ResourceLimits;

/// Confinement flag that always precedes the operator-supplied runtime arguments.
pub const NETWORK_DISABLED_FLAG: &str = "--network=none";

/// Configuration for supervising executions inside the isolation runtime.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Isolation runtime executable (path or name resolved via `PATH`).
    pub runtime_path: PathBuf,
    /// Arguments placed between the fixed confinement flags and the interpreter invocation.
    pub runtime_args: Vec<String>,
    /// Directory under which per-request workspaces are created.
    pub scratch_root: PathBuf,
    /// Upper bound on an execution's wall-clock run time.
    pub timeout: Duration,
    /// How long a terminated process gets to exit before it is killed.
    pub kill_grace: Duration,
    pub max_concurrency: usize,
    pub gate_policy: GatePolicy,
    /// Per-stream capture cap; further output is discarded.
    pub max_output_bytes: usize,
    pub default_language: String,
    pub languages: LanguageRegistry,
    /// Depth of each execution's event channel.
    pub event_buffer: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            runtime_path: PathBuf::from("runsc"),
            runtime_args: vec!["do".to_string(), "--".to_string()],
            scratch_root: env::temp_dir(),
            timeout: Duration::from_secs(30),
            kill_grace: Duration::from_secs(2),
            max_concurrency: 4,
            gate_policy: GatePolicy::Queue,
            max_output_bytes: 1024 * 1024,
            default_language: "python".to_string(),
            languages: LanguageRegistry::builtin(),
            event_buffer: 16,
        }
    }
}

impl ExecConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runtime_path.as_os_str().is_empty() {
            anyhow::bail!("Isolation runtime path cannot be empty");
        }

        if let Some(flag) = self
            .runtime_args
            .iter()
            .find(|arg| arg.trim_start_matches('-').starts_with("network"))
        {
            anyhow::bail!(
                "Runtime argument '{}' would override the fixed '{}' confinement flag",
                flag,
                NETWORK_DISABLED_FLAG
            );
        }

        if self.timeout.is_zero() {
            anyhow::bail!("Execution timeout must be greater than zero");
        }

        if self.max_concurrency == 0 {
            anyhow::bail!("Maximum concurrent executions must be at least 1");
        }

        if self.max_output_bytes == 0 {
            anyhow::bail!("Maximum output size must be greater than zero");
        }

        if self.event_buffer == 0 {
            anyhow::bail!("Event buffer must hold at least one event");
        }

        if self.scratch_root.exists() && !self.scratch_root.is_dir() {
            anyhow::bail!(
                "Scratch root '{}' must be a directory",
                self.scratch_root.display()
            );
        }

        self.languages.validate()?;

        if self.languages.get(&self.default_language).is_none() {
            anyhow::bail!(
                "Default language '{}' has no configured profile (available: {})",
                self.default_language,
                self.languages.names().collect::<Vec<_>>().join(", ")
            );
        }

        Ok(())
    }

    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            timeout: self.timeout,
            kill_grace: self.kill_grace,
            max_output_bytes: self.max_output_bytes,
        }
    }
}
