#![allow(dead_code)]

use capsules_code_exec::{
    ExecConfig, ExecEvent, ExecutionStream, LanguageProfile, LanguageRegistry, ProgressStage,
    FILE_PLACEHOLDER,
};
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Stands in for the isolation runtime: drops its own flags up to `--` and
/// runs the remaining argv in place.
const FAKE_RUNTIME_SCRIPT: &str = r#"#!/bin/sh
while [ "$#" -gt 0 ]; do
  arg="$1"
  shift
  if [ "$arg" = "--" ]; then
    break
  fi
done
exec "$@"
"#;

pub struct RuntimeFixture {
    _temp: TempDir,
    script: PathBuf,
}

impl RuntimeFixture {
    fn new() -> Self {
        let temp = tempfile::Builder::new()
            .prefix("fake-isolation-runtime")
            .tempdir()
            .unwrap();
        let script = temp.path().join("runtime.sh");
        fs::write(&script, FAKE_RUNTIME_SCRIPT).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        Self {
            _temp: temp,
            script,
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

/// Written once per test binary so no test execs a file another thread is still writing.
pub static RUNTIME: Lazy<RuntimeFixture> = Lazy::new(RuntimeFixture::new);

pub fn sh_profile() -> LanguageProfile {
    LanguageProfile::new("sh", ["sh", FILE_PLACEHOLDER], ".sh")
}

pub fn test_config(scratch_root: &Path) -> ExecConfig {
    let mut languages = LanguageRegistry::builtin();
    languages.insert(sh_profile());
    ExecConfig {
        runtime_path: RUNTIME.script().to_path_buf(),
        runtime_args: vec!["do".to_string(), "--".to_string()],
        scratch_root: scratch_root.to_path_buf(),
        timeout: Duration::from_secs(10),
        kill_grace: Duration::from_millis(500),
        default_language: "sh".to_string(),
        languages,
        ..ExecConfig::default()
    }
}

pub async fn collect_events(stream: ExecutionStream) -> Vec<ExecEvent> {
    stream.collect().await
}

pub fn stages(events: &[ExecEvent]) -> Vec<ProgressStage> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecEvent::Progress(progress) => Some(progress.stage),
            ExecEvent::Result(_) => None,
        })
        .collect()
}

pub fn scratch_entries(root: &Path) -> Vec<PathBuf> {
    fs::read_dir(root)
        .map(|entries| entries.filter_map(|entry| entry.ok().map(|e| e.path())).collect())
        .unwrap_or_default()
}

pub fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only probes for existence.
    unsafe { libc::kill(pid, 0) == 0 }
}

pub fn on_path(program: &str) -> bool {
    which::which(program).is_ok()
}
