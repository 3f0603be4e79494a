//! Interpreter profiles selected by an execution request's `language`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::Path;

/// Token in an invocation template that is replaced by the workspace file path.
pub const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub name: String,
    /// Interpreter/compiler argument vector, e.g. `["python3", "{file}"]`.
    pub command: Vec<String>,
    pub extension: String,
}

impl LanguageProfile {
    pub fn new<I, S>(name: impl Into<String>, command: I, extension: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            extension: extension.into(),
        }
    }

    pub fn python() -> Self {
        Self::new("python", ["python3", FILE_PLACEHOLDER], ".py")
    }

    pub fn bash() -> Self {
        Self::new("bash", ["bash", FILE_PLACEHOLDER], ".sh")
    }

    /// Name of the single file the caller's code is written to.
    pub fn file_name(&self) -> String {
        let extension = self.extension.trim();
        if extension.is_empty() {
            "main".to_string()
        } else if extension.starts_with('.') {
            format!("main{}", extension)
        } else {
            format!("main.{}", extension)
        }
    }

    /// Expand the template into an argument vector for `file`.
    ///
    /// Arguments are kept separate; nothing here is ever handed to a shell.
    pub fn invocation(&self, file: &Path) -> Vec<OsString> {
        let mut placed = false;
        let mut argv: Vec<OsString> = self
            .command
            .iter()
            .map(|part| {
                if part == FILE_PLACEHOLDER {
                    placed = true;
                    file.as_os_str().to_os_string()
                } else {
                    OsString::from(part)
                }
            })
            .collect();
        if !placed {
            argv.push(file.as_os_str().to_os_string());
        }
        argv
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Language profile name cannot be empty");
        }
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            anyhow::bail!(
                "Language profile '{}' must name an interpreter command",
                self.name
            );
        }
        if self.command[0] == FILE_PLACEHOLDER {
            anyhow::bail!(
                "Language profile '{}' cannot execute the workspace file directly",
                self.name
            );
        }
        if self.extension.contains('/') {
            anyhow::bail!(
                "Language profile '{}' extension cannot contain path separators",
                self.name
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageProfile>,
}

/// Profiles keyed by normalised language name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.insert(LanguageProfile::python());
        registry.insert(LanguageProfile::bash());
        registry
    }

    /// Register a profile, replacing any existing profile with the same name.
    pub fn insert(&mut self, profile: LanguageProfile) {
        self.profiles.insert(normalize(&profile.name), profile);
    }

    /// Add every profile from `other`, overriding profiles of the same name.
    pub fn merge(&mut self, other: LanguageRegistry) {
        self.profiles.extend(other.profiles);
    }

    pub fn get(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(&normalize(language))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|profile| profile.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            anyhow::bail!("At least one language profile must be configured");
        }
        for profile in self.profiles.values() {
            profile.validate()?;
        }
        Ok(())
    }

    /// Parse a YAML document of the form `languages: [{name, command, extension}]`.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let file: LanguagesFile =
            serde_yaml::from_str(raw).context("parsing language profiles YAML")?;
        let mut registry = Self::default();
        for profile in file.languages {
            profile.validate()?;
            registry.insert(profile);
        }
        registry.validate()?;
        Ok(registry)
    }

    pub fn load_yaml(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading language profiles at {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("loading language profiles from {}", path.display()))
    }
}

fn normalize(language: &str) -> String {
    language.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn placeholder_is_replaced_in_place() {
        let profile =
            LanguageProfile::new("python", ["python3", "-u", FILE_PLACEHOLDER, "--"], ".py");
        let argv = profile.invocation(Path::new("/scratch/exec-1/main.py"));
        assert_eq!(
            argv,
            vec![
                OsString::from("python3"),
                OsString::from("-u"),
                OsString::from("/scratch/exec-1/main.py"),
                OsString::from("--"),
            ]
        );
    }

    #[test]
    fn file_is_appended_without_placeholder() {
        let profile = LanguageProfile::new("node", ["node"], "js");
        let file = PathBuf::from("/scratch/exec-2/main.js");
        assert_eq!(profile.file_name(), "main.js");
        assert_eq!(
            profile.invocation(&file),
            vec![OsString::from("node"), file.into_os_string()]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(
            registry.get(" Python ").map(|p| p.extension.as_str()),
            Some(".py")
        );
        assert_eq!(
            registry.get("BASH").map(|p| p.file_name()),
            Some("main.sh".to_string())
        );
        assert!(registry.get("cobol").is_none());
    }

    #[test]
    fn yaml_profiles_are_loaded_and_validated() {
        let registry = LanguageRegistry::from_yaml_str(
            r#"
languages:
  - name: ruby
    command: ["ruby", "{file}"]
    extension: .rb
  - name: sh
    command: ["sh"]
    extension: .sh
"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ruby", "sh"]);
        assert!(registry.get("python").is_none());
    }

    #[test]
    fn yaml_rejects_profile_without_interpreter() {
        let err = LanguageRegistry::from_yaml_str(
            r#"
languages:
  - name: raw
    command: ["{file}"]
    extension: .bin
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("cannot execute the workspace file directly"));
    }

    #[test]
    fn merged_profiles_override_builtins() {
        let mut registry = LanguageRegistry::builtin();
        let overrides = LanguageRegistry::from_yaml_str(
            r#"
languages:
  - name: Python
    command: ["python3", "-I", "{file}"]
    extension: .py
"#,
        )
        .unwrap();

        registry.merge(overrides);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("python").unwrap().command[1], "-I");
    }

    #[test]
    fn empty_registry_is_invalid() {
        assert!(LanguageRegistry::default().validate().is_err());
        assert!(LanguageRegistry::builtin().validate().is_ok());
    }
}
