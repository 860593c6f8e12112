use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::location::Location;

/// Fatal failure raised by the parser, serializer or executor. Carries a
/// stable machine-readable code plus the source location when one is known.
#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct ScriptError {
    pub code: String,
    pub message: String,
    pub location: Option<Location>,
}

impl ScriptError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(
        code: impl Into<String>,
        message: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            location: Some(location),
        }
    }

    /// Error text with the location appended, for user-facing reports.
    pub fn render(&self) -> String {
        match &self.location {
            Some(location) => format!("{}: {} ({})", self.code, self.message, location),
            None => format!("{}: {}", self.code, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Non-fatal parse problem. Parsers accumulate these instead of aborting;
/// a suite that parsed with a non-empty error list must not be executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseError {
    pub severity: Severity,
    pub location: Option<Location>,
    pub message: String,
}

impl ParseError {
    pub fn error(location: Option<Location>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            location,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_location_when_present() {
        let error = ScriptError::with_location(
            "EXEC_VAR_MISSING",
            "Variable \"x\" is not defined.",
            Location::new(Some("a.uisl".to_string()), 2, 1, "inc x"),
        );
        let rendered = error.render();
        assert!(rendered.starts_with("EXEC_VAR_MISSING"));
        assert!(rendered.contains("line 2"));
    }

    #[test]
    fn parse_error_defaults_to_error_severity() {
        let error = ParseError::error(None, "then should be inside an if");
        assert_eq!(error.severity, Severity::Error);
    }
}
