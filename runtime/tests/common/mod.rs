#![allow(dead_code)]

use capsules_code_exec::{
    ExecConfig, ExecutionService, LanguageProfile, LanguageRegistry, FILE_PLACEHOLDER,
};
use once_cell::sync::Lazy;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

const RUNTIME_SCRIPT: &str = r#"#!/bin/sh
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
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("runtime.sh");
        fs::write(&script, RUNTIME_SCRIPT).unwrap();
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

pub static RUNTIME: Lazy<RuntimeFixture> = Lazy::new(RuntimeFixture::new);

pub fn test_service(scratch_root: &Path, tweak: impl FnOnce(&mut ExecConfig)) -> ExecutionService {
    let mut languages = LanguageRegistry::builtin();
    languages.insert(LanguageProfile::new("sh", ["sh", FILE_PLACEHOLDER], ".sh"));
    let mut config = ExecConfig {
        runtime_path: RUNTIME.script().to_path_buf(),
        scratch_root: scratch_root.to_path_buf(),
        timeout: Duration::from_secs(10),
        kill_grace: Duration::from_millis(500),
        default_language: "sh".to_string(),
        languages,
        ..ExecConfig::default()
    };
    tweak(&mut config);
    ExecutionService::new(config).unwrap()
}

pub fn scratch_is_empty(root: &Path) -> bool {
    fs::read_dir(root)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true)
}
