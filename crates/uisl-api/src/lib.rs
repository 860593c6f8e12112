//! Convenience surface tying the parser front ends and the Player together:
//! build a prototype context with the built-in natives, parse a suite from
//! DSL or XML, and play it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uisl_core::{CommandFlow, ExecutionContext, ParseError, ScriptError, TestSuite};
use uisl_parser::{FsResourceLoader, ResourceLoader, ScriptParser, XmlParser};
use uisl_runtime::{
    register_builtin_natives, Player, PlayerError, RhaiEvaluator, DEFAULT_COMMAND_INTERVAL,
};

pub use uisl_parser::{serialize_commands, serialize_suite};

/// A parsed suite plus the non-fatal errors accumulated while parsing it.
/// A suite with a non-empty error list must not be played.
#[derive(Debug)]
pub struct ParseOutcome {
    pub suite: TestSuite,
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub command_interval: Duration,
    /// Names of the test cases to play; empty plays all of them.
    pub test_cases: Vec<String>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            command_interval: DEFAULT_COMMAND_INTERVAL,
            test_cases: Vec::new(),
        }
    }
}

/// Final flow signal plus every execution fault across the played cases.
#[derive(Debug)]
pub struct PlayReport {
    pub flow: CommandFlow,
    pub errors: Vec<PlayerError>,
}

/// Fresh scope with the built-in native procedures registered; suites parse
/// against it so scripts can call `assert`, `print`, `pause` and `exit`.
pub fn prototype_context() -> ExecutionContext {
    let mut context = ExecutionContext::new();
    register_builtin_natives(&mut context);
    context
}

fn default_loader(file_name: Option<&str>) -> FsResourceLoader {
    let base = file_name
        .and_then(|name| Path::new(name).parent())
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    FsResourceLoader::new(base)
}

/// Parses textual DSL source; `require`d units resolve relative to the
/// source file's directory.
pub fn parse_suite_source(
    source: &str,
    file_name: Option<&str>,
) -> Result<ParseOutcome, ScriptError> {
    let loader = default_loader(file_name);
    parse_suite_source_with_loader(source, file_name, &loader)
}

pub fn parse_suite_source_with_loader(
    source: &str,
    file_name: Option<&str>,
    loader: &dyn ResourceLoader,
) -> Result<ParseOutcome, ScriptError> {
    let prototype = prototype_context();
    let mut parser = ScriptParser::new(loader);
    let suite = parser.parse_suite(source, file_name, &prototype)?;
    Ok(ParseOutcome {
        suite,
        errors: parser.take_errors(),
    })
}

/// Parses the XML dialect; `require`d units resolve relative to the source
/// file's directory.
pub fn parse_suite_xml(source: &str, file_name: Option<&str>) -> Result<ParseOutcome, ScriptError> {
    let loader = default_loader(file_name);
    parse_suite_xml_with_loader(source, file_name, &loader)
}

pub fn parse_suite_xml_with_loader(
    source: &str,
    file_name: Option<&str>,
    loader: &dyn ResourceLoader,
) -> Result<ParseOutcome, ScriptError> {
    let prototype = prototype_context();
    let mut parser = XmlParser::new(loader);
    let suite = parser.parse_suite(source, file_name, &prototype)?;
    Ok(ParseOutcome {
        suite,
        errors: parser.take_errors(),
    })
}

/// Picks the front end from the file extension: `.xml` parses as the XML
/// dialect, everything else as textual DSL.
pub fn parse_suite_auto(
    source: &str,
    file_name: Option<&str>,
) -> Result<ParseOutcome, ScriptError> {
    let is_xml = file_name
        .and_then(|name| Path::new(name).extension())
        .map(|extension| extension.eq_ignore_ascii_case("xml"))
        .unwrap_or(false);
    if is_xml {
        parse_suite_xml(source, file_name)
    } else {
        parse_suite_source(source, file_name)
    }
}

/// Plays a parsed suite. Refuses outcomes that still carry parse errors.
pub fn play_suite(
    outcome: &ParseOutcome,
    options: &PlayOptions,
) -> Result<PlayReport, ScriptError> {
    if !outcome.is_clean() {
        return Err(ScriptError::new(
            "PARSE_ERRORS_PRESENT",
            format!(
                "Suite \"{}\" has {} parse error(s) and cannot be played.",
                outcome.suite.name,
                outcome.errors.len()
            ),
        ));
    }
    let mut player = Player::new(Box::new(RhaiEvaluator::new()))
        .with_command_interval(options.command_interval);
    let flow = player.play_suite_filtered(&outcome.suite, &options.test_cases);
    Ok(PlayReport {
        flow,
        errors: player.take_errors(),
    })
}

/// Parse-and-play in one step, with the front end chosen from the file
/// extension.
pub fn play_source(
    source: &str,
    file_name: Option<&str>,
    options: &PlayOptions,
) -> Result<PlayReport, ScriptError> {
    let outcome = parse_suite_auto(source, file_name)?;
    play_suite(&outcome, options)
}
