use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use uisl_core::ScriptError;

/// Source of `require`d script units. The parser resolves unit names through
/// this seam so tests can feed sources from memory and the CLI from disk.
pub trait ResourceLoader {
    fn read(&self, name: &str) -> Result<String, ScriptError>;
}

/// Loads required units relative to a base directory, typically the
/// directory of the requiring script.
#[derive(Debug, Clone)]
pub struct FsResourceLoader {
    base_dir: PathBuf,
}

impl FsResourceLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl ResourceLoader for FsResourceLoader {
    fn read(&self, name: &str) -> Result<String, ScriptError> {
        let path = self.base_dir.join(name);
        fs::read_to_string(&path).map_err(|error| {
            ScriptError::new(
                "PARSE_REQUIRE_UNREADABLE",
                format!("Cannot read required unit \"{}\": {}", path.display(), error),
            )
        })
    }
}

/// In-memory loader keyed by unit name.
#[derive(Debug, Clone, Default)]
pub struct MapResourceLoader {
    units: BTreeMap<String, String>,
}

impl MapResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.units.insert(name.into(), source.into());
    }
}

impl ResourceLoader for MapResourceLoader {
    fn read(&self, name: &str) -> Result<String, ScriptError> {
        self.units.get(name).cloned().ok_or_else(|| {
            ScriptError::new(
                "PARSE_REQUIRE_UNREADABLE",
                format!("Cannot read required unit \"{}\": not registered.", name),
            )
        })
    }
}
