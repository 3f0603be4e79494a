//! Command-line and environment configuration for the runtime binary.

use anyhow::{Context, Result};
use capsules_code_exec::{ExecConfig, GatePolicy, LanguageRegistry};
use clap::Parser;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "runtime")]
#[command(about = "Runs untrusted code inside an isolation runtime and streams the outcome")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Isolation runtime executable (path or name on PATH)
    #[arg(long, env = "SANDBOX_RUNTIME", default_value = "runsc")]
    pub sandbox_runtime: PathBuf,

    /// Space separated arguments placed after the fixed confinement flags
    #[arg(
        long,
        env = "SANDBOX_RUNTIME_ARGS",
        value_delimiter = ' ',
        allow_hyphen_values = true,
        default_values = ["do", "--"]
    )]
    pub sandbox_runtime_args: Vec<String>,

    /// Directory for per-request workspaces (defaults to the system temp dir)
    #[arg(long, env = "SANDBOX_SCRATCH_ROOT")]
    pub scratch_root: Option<PathBuf>,

    /// Wall-clock limit per execution, e.g. `30s` or `2m`
    #[arg(long, env = "SANDBOX_EXEC_TIMEOUT", default_value = "30s", value_parser = humantime::parse_duration)]
    pub exec_timeout: Duration,

    /// Time a terminated program gets before it is killed
    #[arg(long, env = "SANDBOX_KILL_GRACE", default_value = "2s", value_parser = humantime::parse_duration)]
    pub kill_grace: Duration,

    /// Maximum simultaneously running executions
    #[arg(long, env = "SANDBOX_MAX_CONCURRENCY", default_value_t = 4)]
    pub max_concurrency: usize,

    /// `queue` to wait for a free slot, `reject` to answer 503
    #[arg(long, env = "SANDBOX_GATE_POLICY", default_value_t = GatePolicy::Queue)]
    pub gate_policy: GatePolicy,

    /// Per-stream output cap in bytes
    #[arg(long, env = "SANDBOX_MAX_OUTPUT_BYTES", default_value_t = 1024 * 1024)]
    pub max_output_bytes: usize,

    /// Language used when a request names none
    #[arg(long, env = "SANDBOX_DEFAULT_LANGUAGE", default_value = "python")]
    pub default_language: String,

    /// YAML file with additional language profiles
    #[arg(long, env = "SANDBOX_LANGUAGES_FILE")]
    pub languages_file: Option<PathBuf>,

    /// Output logs in JSON format
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    pub fn exec_config(&self) -> Result<ExecConfig> {
        let mut languages = LanguageRegistry::builtin();
        if let Some(path) = &self.languages_file {
            languages.merge(LanguageRegistry::load_yaml(path)?);
        }

        let config = ExecConfig {
            runtime_path: self.sandbox_runtime.clone(),
            runtime_args: self
                .sandbox_runtime_args
                .iter()
                .filter(|arg| !arg.is_empty())
                .cloned()
                .collect(),
            scratch_root: self.scratch_root.clone().unwrap_or_else(env::temp_dir),
            timeout: self.exec_timeout,
            kill_grace: self.kill_grace,
            max_concurrency: self.max_concurrency,
            gate_policy: self.gate_policy,
            max_output_bytes: self.max_output_bytes,
            default_language: self.default_language.clone(),
            languages,
            ..ExecConfig::default()
        };
        config
            .validate()
            .context("invalid sandbox configuration")?;
        Ok(config)
    }
}
