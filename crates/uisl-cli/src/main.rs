use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use uisl_api::{parse_suite_auto, play_suite, serialize_suite, ParseOutcome, PlayOptions};
use uisl_core::{CommandFlow, ParseError, ScriptError};
use uisl_runtime::DEFAULT_COMMAND_INTERVAL;
use walkdir::WalkDir;

#[derive(Debug, Parser)]
#[command(name = "uisl")]
#[command(about = "UI test script runner")]
struct Cli {
    #[command(subcommand)]
    command: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Play a script file, or every script under a directory tree.
    Run(RunArgs),
    /// Parse only and report accumulated errors.
    Check(CheckArgs),
    /// Parse a script and print its canonical textual form.
    Format(FormatArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    path: PathBuf,
    /// Play only the named test cases; repeatable.
    #[arg(long = "test-case")]
    test_cases: Vec<String>,
    /// Delay between top-level commands, in milliseconds.
    #[arg(long = "interval-ms", default_value_t = DEFAULT_COMMAND_INTERVAL.as_millis() as u64)]
    interval_ms: u64,
}

#[derive(Debug, Args)]
struct CheckArgs {
    path: PathBuf,
    /// Emit the report as JSON instead of plain text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    file: String,
    suite: Option<String>,
    fatal: Option<String>,
    errors: Vec<ParseError>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {}", error.render());
            2
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, ScriptError> {
    match cli.command {
        Mode::Run(args) => run_scripts(args),
        Mode::Check(args) => check_scripts(args),
        Mode::Format(args) => format_script(args),
    }
}

fn run_scripts(args: RunArgs) -> Result<i32, ScriptError> {
    let files = collect_script_files(&args.path)?;
    let options = PlayOptions {
        command_interval: Duration::from_millis(args.interval_ms),
        test_cases: args.test_cases,
    };

    let mut failed = false;
    for file in files {
        let outcome = load_suite(&file)?;
        if !outcome.is_clean() {
            failed = true;
            report_parse_errors(&file, &outcome.errors);
            continue;
        }
        info!(file = %file.display(), suite = %outcome.suite.name, "playing");
        let report = play_suite(&outcome, &options)?;
        for error in &report.errors {
            failed = true;
            match (&error.test_case, &error.location) {
                (Some(case), Some(location)) => {
                    eprintln!("{}: [{}] {} ({})", file.display(), case, error.message, location)
                }
                (Some(case), None) => {
                    eprintln!("{}: [{}] {}", file.display(), case, error.message)
                }
                _ => eprintln!("{}: {}", file.display(), error.message),
            }
        }
        if report.flow == CommandFlow::Exit {
            println!("{}: suite aborted by exit", file.display());
        }
    }
    Ok(if failed { 1 } else { 0 })
}

fn check_scripts(args: CheckArgs) -> Result<i32, ScriptError> {
    let files = collect_script_files(&args.path)?;
    let mut failed = false;
    let mut reports = Vec::new();
    for file in files {
        let source = read_script(&file)?;
        let name = file.display().to_string();
        let report = match parse_suite_auto(&source, Some(&name)) {
            Ok(outcome) => CheckReport {
                file: name,
                suite: Some(outcome.suite.name),
                fatal: None,
                errors: outcome.errors,
            },
            Err(error) => CheckReport {
                file: name,
                suite: None,
                fatal: Some(error.render()),
                errors: Vec::new(),
            },
        };
        if report.fatal.is_some() || !report.errors.is_empty() {
            failed = true;
        }
        reports.push(report);
    }

    if args.json {
        let body = serde_json::to_string_pretty(&reports).map_err(|error| {
            ScriptError::new("CLI_JSON_ERROR", format!("Cannot encode report: {}", error))
        })?;
        println!("{}", body);
    } else {
        for report in &reports {
            match &report.fatal {
                Some(fatal) => println!("{}: fatal: {}", report.file, fatal),
                None if report.errors.is_empty() => println!("{}: ok", report.file),
                None => {
                    for error in &report.errors {
                        match &error.location {
                            Some(location) => {
                                println!("{}: {} ({})", report.file, error.message, location)
                            }
                            None => println!("{}: {}", report.file, error.message),
                        }
                    }
                }
            }
        }
    }
    Ok(if failed { 1 } else { 0 })
}

fn format_script(args: FormatArgs) -> Result<i32, ScriptError> {
    if !args.path.is_file() {
        return Err(ScriptError::new(
            "CLI_NOT_A_FILE",
            format!("\"{}\" is not a script file.", args.path.display()),
        ));
    }
    let outcome = load_suite(&args.path)?;
    if !outcome.is_clean() {
        report_parse_errors(&args.path, &outcome.errors);
        return Ok(1);
    }
    print!("{}", serialize_suite(&outcome.suite));
    Ok(0)
}

fn load_suite(file: &Path) -> Result<ParseOutcome, ScriptError> {
    let source = read_script(file)?;
    parse_suite_auto(&source, Some(&file.display().to_string()))
}

fn read_script(file: &Path) -> Result<String, ScriptError> {
    fs::read_to_string(file).map_err(|error| {
        ScriptError::new(
            "CLI_IO_ERROR",
            format!("Cannot read \"{}\": {}", file.display(), error),
        )
    })
}

fn report_parse_errors(file: &Path, errors: &[ParseError]) {
    for error in errors {
        match &error.location {
            Some(location) => eprintln!("{}: {} ({})", file.display(), error.message, location),
            None => eprintln!("{}: {}", file.display(), error.message),
        }
    }
}

fn is_script_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|extension| extension.to_str()),
        Some("uisl") | Some("xml")
    )
}

/// A file path plays as-is; a directory plays every script under it, in
/// stable path order.
fn collect_script_files(path: &Path) -> Result<Vec<PathBuf>, ScriptError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(ScriptError::new(
            "CLI_PATH_MISSING",
            format!("\"{}\" is neither a file nor a directory.", path.display()),
        ));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|error| {
            ScriptError::new(
                "CLI_IO_ERROR",
                format!("Cannot walk \"{}\": {}", path.display(), error),
            )
        })?;
        if entry.file_type().is_file() && is_script_file(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }
    if files.is_empty() {
        return Err(ScriptError::new(
            "CLI_NO_SCRIPTS",
            format!("No script files found under \"{}\".", path.display()),
        ));
    }
    Ok(files)
}
