use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a parsed construct within a script source, kept for error
/// reporting. Synthetic commands (e.g. recorded ones) carry no location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    pub source_text: String,
}

impl Location {
    pub fn new(
        file: Option<String>,
        line: u32,
        column: u32,
        source_text: impl Into<String>,
    ) -> Self {
        Self {
            file,
            line,
            column,
            source_text: source_text.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "file '{}', line {}, column {}, text '{}'",
            self.file.as_deref().unwrap_or("<unknown>"),
            self.line,
            self.column,
            self.source_text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_file_line_column_and_text() {
        let location = Location::new(Some("suite.uisl".to_string()), 3, 5, "set x = 1");
        assert_eq!(
            location.to_string(),
            "file 'suite.uisl', line 3, column 5, text 'set x = 1'"
        );
    }

    #[test]
    fn display_falls_back_when_file_is_unknown() {
        let location = Location::new(None, 1, 1, "break");
        assert!(location.to_string().starts_with("file '<unknown>'"));
    }
}
