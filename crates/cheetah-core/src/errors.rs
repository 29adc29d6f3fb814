//! Structured error types shared across Cheetah crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`CampError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (run index, file path, parameter name, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Adds a `path` context entry rendered from a filesystem path.
    pub fn with_path(self, path: &Path) -> Self {
        self.with_context("path", path.display().to_string())
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for campaign composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum CampError {
    /// Malformed experiment specification (empty values, zip mismatch, cycles).
    #[error("specification error: {0}")]
    Specification(ErrorInfo),
    /// Two sweep groups declare the same parameter name.
    #[error("duplicate parameter: {0}")]
    DuplicateParameter(ErrorInfo),
    /// Malformed or unsupported machine profile.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// A template references an unresolvable placeholder.
    #[error("template error: {0}")]
    Template(ErrorInfo),
    /// A resource request resolved to an invalid count.
    #[error("resource spec error: {0}")]
    ResourceSpec(ErrorInfo),
    /// A destination file already exists with different content.
    #[error("directory conflict: {0}")]
    DirectoryConflict(ErrorInfo),
    /// Filesystem failure while materializing a run.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl CampError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            CampError::Specification(info)
            | CampError::DuplicateParameter(info)
            | CampError::Configuration(info)
            | CampError::Template(info)
            | CampError::ResourceSpec(info)
            | CampError::DirectoryConflict(info)
            | CampError::Io(info)
            | CampError::Serde(info) => info,
        }
    }

    /// Short family label, matching the serialized `family` tag.
    pub fn family(&self) -> &'static str {
        match self {
            CampError::Specification(_) => "Specification",
            CampError::DuplicateParameter(_) => "DuplicateParameter",
            CampError::Configuration(_) => "Configuration",
            CampError::Template(_) => "Template",
            CampError::ResourceSpec(_) => "ResourceSpec",
            CampError::DirectoryConflict(_) => "DirectoryConflict",
            CampError::Io(_) => "Io",
            CampError::Serde(_) => "Serde",
        }
    }

    /// True for errors that invalidate the whole campaign rather than one run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CampError::Specification(_)
                | CampError::DuplicateParameter(_)
                | CampError::Configuration(_)
        )
    }

    /// Returns the error with an extra context entry attached.
    pub fn with_context(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.map_info(|info| info.with_context(key, value))
    }

    /// Returns the error with its hint replaced.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        self.map_info(|info| info.with_hint(hint))
    }

    fn map_info(self, f: impl FnOnce(ErrorInfo) -> ErrorInfo) -> Self {
        match self {
            CampError::Specification(info) => CampError::Specification(f(info)),
            CampError::DuplicateParameter(info) => CampError::DuplicateParameter(f(info)),
            CampError::Configuration(info) => CampError::Configuration(f(info)),
            CampError::Template(info) => CampError::Template(f(info)),
            CampError::ResourceSpec(info) => CampError::ResourceSpec(f(info)),
            CampError::DirectoryConflict(info) => CampError::DirectoryConflict(f(info)),
            CampError::Io(info) => CampError::Io(f(info)),
            CampError::Serde(info) => CampError::Serde(f(info)),
        }
    }

    /// Wraps a [`std::io::Error`] raised while touching `path`.
    pub fn io(code: &str, path: &Path, err: std::io::Error) -> Self {
        CampError::Io(
            ErrorInfo::new(code, err.to_string())
                .with_path(path)
                .with_context("kind", format!("{:?}", err.kind())),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_and_hint() {
        let err = CampError::Template(
            ErrorInfo::new("template.unknown", "unknown placeholder")
                .with_context("placeholder", "size")
                .with_hint("declare the parameter in a sweep group"),
        );
        let text = err.to_string();
        assert!(text.starts_with("template error: unknown placeholder"));
        assert!(text.contains("placeholder=size"));
        assert!(text.contains("hint: declare"));
    }

    #[test]
    fn with_hint_keeps_family() {
        let err = CampError::Configuration(ErrorInfo::new("machine.launcher", "no launcher"))
            .with_hint("set launcher.exe");
        assert_eq!(err.family(), "Configuration");
        assert_eq!(err.info().hint.as_deref(), Some("set launcher.exe"));
    }

    #[test]
    fn with_context_keeps_family() {
        let err = CampError::Io(ErrorInfo::new("io", "boom")).with_context("run", "3");
        assert_eq!(err.family(), "Io");
        assert_eq!(err.info().context.get("run").map(String::as_str), Some("3"));
        assert!(!err.is_fatal());
    }
}
