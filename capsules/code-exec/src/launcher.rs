//! Builds and starts the isolation runtime command for a workspace.

use std::env;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::{ExecConfig, NETWORK_DISABLED_FLAG};
use crate::error::ExecError;
use crate::language::LanguageProfile;
use crate::workspace::Workspace;

/// Environment variables forwarded from the host into the isolated process.
const PASSTHROUGH_ENV: [&str; 2] = ["PATH", "LANG"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub timeout: Duration,
    pub kill_grace: Duration,
    pub max_output_bytes: usize,
}

/// Starts programs under the isolation runtime.
#[derive(Debug, Clone)]
pub struct Launcher {
    runtime: PathBuf,
    runtime_args: Vec<String>,
}

impl Launcher {
    pub fn new(config: &ExecConfig) -> Self {
        Self {
            runtime: config.runtime_path.clone(),
            runtime_args: config.runtime_args.clone(),
        }
    }

    /// Full argument vector: runtime, fixed confinement flags, operator
    /// arguments, then the interpreter invocation for `file`.
    pub fn command_for(&self, file: &Path, profile: &LanguageProfile) -> Vec<OsString> {
        let mut argv = Vec::with_capacity(2 + self.runtime_args.len() + profile.command.len());
        argv.push(self.runtime.clone().into_os_string());
        argv.push(OsString::from(NETWORK_DISABLED_FLAG));
        argv.extend(self.runtime_args.iter().map(OsString::from));
        argv.extend(profile.invocation(file));
        argv
    }

    /// Start the program for `workspace`. A non-zero exit later on is not an
    /// error here; only failing to start the runtime is.
    pub fn launch(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        limits: ResourceLimits,
    ) -> Result<ProcessHandle, ExecError> {
        let argv = self.command_for(workspace.file_path(), profile);
        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        configure_command(&mut command, workspace);

        debug!(
            runtime = %self.runtime.display(),
            args = ?&argv[1..],
            "launching isolated process"
        );

        let mut child = command.spawn().map_err(|source| ExecError::Launch {
            runtime: self.runtime.display().to_string(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let pid = child.id();

        Ok(ProcessHandle {
            child,
            pid,
            stdout,
            stderr,
            limits,
        })
    }

    /// Check that the runtime resolves to an executable file, either as given
    /// or through `PATH`.
    pub fn preflight(&self) -> Result<PathBuf, ExecError> {
        which::which(&self.runtime).map_err(|err| ExecError::Launch {
            runtime: self.runtime.display().to_string(),
            source: io::Error::new(
                io::ErrorKind::NotFound,
                format!("isolation runtime not found or not executable: {}", err),
            ),
        })
    }
}

fn configure_command(command: &mut Command, workspace: &Workspace) {
    command.env_clear();
    for key in PASSTHROUGH_ENV {
        if let Some(value) = env::var_os(key) {
            command.env(key, value);
        }
    }
    command.env("PYTHONUNBUFFERED", "1");
    command.env("PYTHONDONTWRITEBYTECODE", "1");

    command.current_dir(workspace.path());
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.kill_on_drop(true);

    // Own process group so termination reaches every descendant.
    #[cfg(unix)]
    command.process_group(0);
}

/// A started isolated process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    limits: ResourceLimits,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn limits(&self) -> ResourceLimits {
        self.limits
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the process group to stop, escalating to a kill after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        self.signal_group(Signal::Terminate);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    pid = ?self.pid,
                    grace = %humantime::format_duration(grace),
                    "process ignored termination request; killing"
                );
                self.signal_group(Signal::Kill);
                if let Err(err) = self.child.start_kill() {
                    if err.kind() != io::ErrorKind::InvalidInput {
                        return Err(err);
                    }
                }
                self.child.wait().await
            }
        }
    }

    /// Kill anything left in the process group after the leader exited.
    ///
    /// The leader is already reaped at this point. A group with live members
    /// keeps its id reserved, so the signal can only go astray when the group
    /// is empty and its id was recycled as another group leader in between,
    /// which takes a full pid wraparound. That window is accepted.
    pub fn kill_stragglers(&self) {
        self.signal_group(Signal::Kill);
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: Signal) {
        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        let signal = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) with a negative pid signals the group we created at spawn.
        let result = unsafe { libc::kill(-pid, signal) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                warn!(pid, error = %err, "failed to signal process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: Signal) {}
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::FILE_PLACEHOLDER;

    fn launcher(runtime: &str, args: &[&str]) -> Launcher {
        let config = ExecConfig {
            runtime_path: PathBuf::from(runtime),
            runtime_args: args.iter().map(|arg| arg.to_string()).collect(),
            ..ExecConfig::default()
        };
        Launcher::new(&config)
    }

    #[test]
    fn command_prefixes_confinement_flags_before_interpreter() {
        let launcher = launcher("/usr/local/bin/runsc", &["do", "--"]);
        let argv = launcher.command_for(
            Path::new("/scratch/exec-1/main.py"),
            &LanguageProfile::python(),
        );

        let argv: Vec<String> = argv
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            argv,
            vec![
                "/usr/local/bin/runsc",
                "--network=none",
                "do",
                "--",
                "python3",
                "/scratch/exec-1/main.py",
            ]
        );
    }

    #[test]
    fn hostile_file_names_stay_a_single_argument() {
        let launcher = launcher("runsc", &[]);
        let profile = LanguageProfile::new("sh", ["sh", FILE_PLACEHOLDER], ".sh");
        let file = Path::new("/scratch/x; rm -rf ~ $(id)/main.sh");
        let argv = launcher.command_for(file, &profile);

        assert_eq!(argv.len(), 4);
        assert_eq!(argv[3].as_os_str(), file.as_os_str());
    }

    #[test]
    fn preflight_rejects_missing_runtime() {
        let launcher = launcher("/nonexistent/isolation-runtime", &[]);
        let err = launcher.preflight().unwrap_err();
        assert!(matches!(err, ExecError::Launch { .. }));
        assert!(err.to_string().contains("/nonexistent/isolation-runtime"));
    }

    #[cfg(unix)]
    #[test]
    fn preflight_rejects_non_executable_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let launcher = launcher(&file.path().to_string_lossy(), &[]);
        assert!(launcher.preflight().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn preflight_accepts_an_executable_path_as_given() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let runtime = dir.path().join("runsc");
        std::fs::write(&runtime, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();

        let launcher = launcher(&runtime.to_string_lossy(), &[]);
        assert_eq!(launcher.preflight().unwrap(), runtime);
    }

    #[cfg(unix)]
    #[test]
    fn preflight_resolves_bare_names_through_path() {
        let launcher = launcher("sh", &[]);
        let resolved = launcher.preflight().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("sh"));
    }
}
