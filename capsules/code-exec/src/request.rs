use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::language::{LanguageProfile, LanguageRegistry};

/// A caller's request to run `code`. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// A missing field deserialises as empty so it is rejected by `validate`.
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// The requested language, or `default` when none (or a blank one) was given.
    pub fn language_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.language.as_deref().map(str::trim) {
            Some(language) if !language.is_empty() => language,
            _ => default,
        }
    }

    /// Reject malformed requests and resolve the language profile.
    ///
    /// Runs before any workspace or process exists.
    pub fn validate<'r>(
        &self,
        languages: &'r LanguageRegistry,
        default_language: &str,
    ) -> Result<&'r LanguageProfile, ExecError> {
        if self.code.trim().is_empty() {
            return Err(ExecError::validation("Field 'code' must be provided"));
        }
        let language = self.language_or(default_language);
        languages
            .get(language)
            .ok_or_else(|| ExecError::UnsupportedLanguage {
                language: language.to_string(),
            })
    }
}
