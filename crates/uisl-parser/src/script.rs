use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;
use uisl_core::{
    coerce_literal, BreakCommand, Command, CommandSymbol, ExecutionContext, IncCommand, Location,
    MethodCallCommand, MethodParameter, ParseError, ScriptError, SetCommand, TestCase, TestSuite,
    Type, Value, ValueCommand,
};

use crate::block::BlockStack;
use crate::loader::ResourceLoader;

fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex must compile"))
}

fn def_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)$").expect("def regex must compile")
    })
}

fn date_literal_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date literal regex must compile"))
}

/// Accumulated suite structure while the line walk is in progress.
struct ParseState {
    suite_name: Option<String>,
    cases: Vec<TestCase>,
    /// Suite-level scope; test-case contexts are derived from it, and an
    /// implicit single test case is synthesized from it when the source
    /// never opens one explicitly.
    prototype: ExecutionContext,
    current: Option<(String, ExecutionContext)>,
}

impl ParseState {
    fn lookup_method(&self, name: &str) -> Option<std::sync::Arc<uisl_core::MethodCommand>> {
        if let Some((_, context)) = &self.current {
            if let Some(method) = context.find_method(name) {
                return Some(method);
            }
        }
        self.prototype.find_method(name)
    }

    fn close_current_case(&mut self) {
        if let Some((name, context)) = self.current.take() {
            self.cases.push(TestCase::new(name, context));
        }
    }
}

/// Textual DSL front end. Builds the same Command tree and symbol tables as
/// the XML front end; non-fatal problems accumulate in `errors()` and the
/// offending statement is skipped.
pub struct ScriptParser<'a> {
    loader: &'a dyn ResourceLoader,
    errors: Vec<ParseError>,
}

impl<'a> ScriptParser<'a> {
    pub fn new(loader: &'a dyn ResourceLoader) -> Self {
        Self {
            loader,
            errors: Vec::new(),
        }
    }

    /// Parses one script source into a TestSuite. `prototype` supplies the
    /// pre-registered symbols (native procedures) visible to every test
    /// case. A source without explicit `suite`/`test_case` lines becomes an
    /// implicit suite with a single test case.
    pub fn parse_suite(
        &mut self,
        source: &str,
        file_name: Option<&str>,
        prototype: &ExecutionContext,
    ) -> Result<TestSuite, ScriptError> {
        let mut state = ParseState {
            suite_name: None,
            cases: Vec::new(),
            prototype: ExecutionContext::derive(prototype),
            current: None,
        };
        self.parse_unit(source, file_name, &mut state, false)?;

        state.close_current_case();
        let name = state
            .suite_name
            .unwrap_or_else(|| default_suite_name(file_name));
        debug!(suite = %name, cases = state.cases.len(), errors = self.errors.len(), "parsed script source");

        let mut suite = TestSuite::new(name.clone());
        let mut prototype = state.prototype;
        prototype.test_suite = Some(name);
        if state.cases.is_empty() {
            suite.add_test_case(TestCase::new("main", prototype));
        } else {
            for mut case in state.cases {
                case.context.test_suite = Some(suite.name.clone());
                suite.add_test_case(case);
            }
            suite.commands = prototype.take_commands();
            let stray = suite
                .commands
                .iter()
                .any(|command| !matches!(command, Command::MethodScript(_)));
            if stray {
                self.errors.push(ParseError::error(
                    None,
                    "Commands outside a test case are never executed.",
                ));
            }
        }
        Ok(suite)
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    /// Walks one source unit line by line. `symbols_only` is set for
    /// `require`d units: procedure declarations register, everything else
    /// is dropped.
    fn parse_unit(
        &mut self,
        source: &str,
        file_name: Option<&str>,
        state: &mut ParseState,
        symbols_only: bool,
    ) -> Result<(), ScriptError> {
        let mut stack = BlockStack::new();
        let mut last_location = None;
        for (index, raw_line) in source.lines().enumerate() {
            let stripped = strip_comment(raw_line);
            let statement = stripped.trim();
            if statement.is_empty() {
                continue;
            }
            let column = 1 + stripped.len() - stripped.trim_start().len();
            let location = Location::new(
                file_name.map(|file| file.to_string()),
                (index + 1) as u32,
                column as u32,
                statement,
            );
            last_location = Some(location.clone());
            self.parse_statement(statement, location, state, &mut stack, symbols_only)?;
        }
        if !stack.is_empty() {
            self.errors.push(ParseError::error(
                last_location,
                format!("{} block(s) left open at end of source.", stack.depth()),
            ));
        }
        Ok(())
    }

    fn parse_statement(
        &mut self,
        statement: &str,
        location: Location,
        state: &mut ParseState,
        stack: &mut BlockStack,
        symbols_only: bool,
    ) -> Result<(), ScriptError> {
        let (keyword, rest) = match statement.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (statement, ""),
        };
        match keyword {
            "suite" => {
                if symbols_only {
                    return Ok(());
                }
                match unquote(rest) {
                    Ok(name) if state.suite_name.is_none() => {
                        state.prototype.test_suite = Some(name.clone());
                        state.suite_name = Some(name);
                    }
                    Ok(_) => self.record(location, "Duplicate suite declaration."),
                    Err(problem) => self.record(location, problem),
                }
            }
            "test_case" => {
                if symbols_only {
                    return Ok(());
                }
                if !stack.is_empty() {
                    self.record(location, "test_case cannot open inside a block.");
                    return Ok(());
                }
                match unquote(rest) {
                    Ok(name) => {
                        state.close_current_case();
                        state.current = Some((name, ExecutionContext::derive(&state.prototype)));
                    }
                    Err(problem) => self.record(location, problem),
                }
            }
            "require" => {
                if state.current.is_some() || !stack.is_empty() {
                    self.record(location, "require must appear before any test case.");
                    return Ok(());
                }
                let unit = match unquote(rest) {
                    Ok(unit) => unit,
                    Err(problem) => {
                        self.record(location, problem);
                        return Ok(());
                    }
                };
                debug!(unit = %unit, "loading required unit");
                let required = self.loader.read(&unit)?;
                self.parse_unit(&required, Some(&unit), state, true)?;
            }
            "def" => match parse_def_header(statement) {
                Ok((name, parameters)) => stack.push_method(name, parameters),
                Err(problem) => self.record(location, problem),
            },
            "set" => match rest.split_once('=') {
                Some((variable, expression)) => {
                    let variable = variable.trim();
                    if !identifier_regex().is_match(variable) {
                        self.record(location, format!("Invalid variable name \"{}\".", variable));
                        return Ok(());
                    }
                    let command = Command::Set(SetCommand {
                        variable: variable.to_string(),
                        value: ValueCommand::Expression {
                            expression: expression.trim().to_string(),
                            location: Some(location.clone()),
                        },
                        location: Some(location),
                    });
                    self.emit(command, state, stack, symbols_only);
                }
                None => self.record(location, "set requires the form: set VAR = EXPR."),
            },
            "inc" => {
                if !identifier_regex().is_match(rest) {
                    self.record(location, format!("Invalid variable name \"{}\".", rest));
                    return Ok(());
                }
                let command = Command::Inc(IncCommand {
                    variable: rest.to_string(),
                    location: Some(location),
                });
                self.emit(command, state, stack, symbols_only);
            }
            "if" => {
                if rest.is_empty() {
                    self.record(location, "if requires a condition expression.");
                    return Ok(());
                }
                let condition = ValueCommand::Expression {
                    expression: rest.to_string(),
                    location: Some(location.clone()),
                };
                stack.push_if(condition, Some(location));
            }
            "then" => {
                if let Err(problem) = stack.begin_then() {
                    self.record(location, problem);
                }
            }
            "elsif" => {
                if rest.is_empty() {
                    self.record(location, "elsif requires a condition expression.");
                    return Ok(());
                }
                let condition = ValueCommand::Expression {
                    expression: rest.to_string(),
                    location: Some(location.clone()),
                };
                if let Err(problem) = stack.begin_elsif(condition, Some(location.clone())) {
                    self.record(location, problem);
                }
            }
            "else" => {
                if let Err(problem) = stack.begin_else() {
                    self.record(location, problem);
                }
            }
            "while" => {
                if rest.is_empty() {
                    self.record(location, "while requires a condition expression.");
                    return Ok(());
                }
                let condition = ValueCommand::Expression {
                    expression: rest.to_string(),
                    location: Some(location.clone()),
                };
                stack.push_while(condition, Some(location));
            }
            "break" => {
                let command = Command::Break(BreakCommand {
                    location: Some(location),
                });
                self.emit(command, state, stack, symbols_only);
            }
            "end" => match stack.close(location.file.as_deref()) {
                Ok(command) => self.emit(command, state, stack, symbols_only),
                Err(problem) => self.record(location, problem),
            },
            _ => self.parse_call(keyword, rest, location, state, stack, symbols_only),
        }
        Ok(())
    }

    /// Unknown statement keywords resolve as procedure calls against the
    /// visible symbol tables; arguments bind positionally to the declared
    /// parameter order.
    fn parse_call(
        &mut self,
        name: &str,
        rest: &str,
        location: Location,
        state: &mut ParseState,
        stack: &mut BlockStack,
        symbols_only: bool,
    ) {
        if symbols_only && stack.is_empty() {
            return;
        }
        if !identifier_regex().is_match(name) {
            self.record(location, format!("Unknown statement \"{}\".", name));
            return;
        }
        let Some(method) = state.lookup_method(name) else {
            self.record(location, format!("Unknown command \"{}\".", name));
            return;
        };
        let argument_texts = if rest.is_empty() {
            Vec::new()
        } else {
            match split_arguments(rest) {
                Ok(texts) => texts,
                Err(problem) => {
                    self.record(location, problem);
                    return;
                }
            }
        };
        if argument_texts.len() != method.parameters.len() {
            self.record(
                location,
                format!(
                    "\"{}\" expects {} argument(s), got {}.",
                    name,
                    method.parameters.len(),
                    argument_texts.len()
                ),
            );
            return;
        }
        let mut arguments = Vec::with_capacity(argument_texts.len());
        for (parameter, text) in method.parameters.iter().zip(&argument_texts) {
            match parse_argument(text, &location) {
                Ok(value) => arguments.push((parameter.name.clone(), value)),
                Err(problem) => {
                    self.record(location, problem);
                    return;
                }
            }
        }
        let command = Command::MethodCall(MethodCallCommand {
            method: name.to_string(),
            arguments,
            location: Some(location),
        });
        self.emit(command, state, stack, symbols_only);
    }

    /// Routes a completed command into the innermost open block, or at the
    /// top level into the current test case (or the suite-level prototype).
    /// Procedure definitions reaching the top level also register as
    /// symbols; in symbols-only mode that registration is all that happens.
    fn emit(
        &mut self,
        command: Command,
        state: &mut ParseState,
        stack: &mut BlockStack,
        symbols_only: bool,
    ) {
        let Some(command) = stack.add_command(command) else {
            return;
        };
        if let Command::MethodScript(method) = &command {
            state
                .prototype
                .add_symbol(CommandSymbol::Method(method.clone()));
            if let Some((_, context)) = &mut state.current {
                context.add_symbol(CommandSymbol::Method(method.clone()));
            }
        }
        if symbols_only && !matches!(command, Command::MethodScript(_)) {
            return;
        }
        match &mut state.current {
            Some((_, context)) => context.add_command(command),
            None => state.prototype.add_command(command),
        }
    }

    fn record(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(ParseError::error(Some(location), message));
    }
}

fn default_suite_name(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .unwrap_or("main")
        .to_string()
}

/// Cuts a trailing `#` comment, ignoring `#` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..offset],
            _ => {}
        }
    }
    line
}

fn parse_def_header(statement: &str) -> Result<(String, Vec<MethodParameter>), String> {
    let captures = def_regex()
        .captures(statement)
        .ok_or_else(|| "def requires the form: def NAME(PARAM, ...).".to_string())?;
    let name = captures[1].to_string();
    let parameter_list = captures[2].trim();
    let mut parameters = Vec::new();
    if !parameter_list.is_empty() {
        for part in parameter_list.split(',') {
            let part = part.trim();
            if !identifier_regex().is_match(part) {
                return Err(format!("Invalid parameter name \"{}\".", part));
            }
            if parameters
                .iter()
                .any(|existing: &MethodParameter| existing.name == part)
            {
                return Err(format!("Parameter \"{}\" declared more than once.", part));
            }
            parameters.push(MethodParameter::untyped(part));
        }
    }
    Ok((name, parameters))
}

/// Splits a call argument list on top-level commas, keeping quoted commas
/// intact.
fn split_arguments(rest: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in rest.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                current.push(ch);
                in_string = !in_string;
            }
            ',' if !in_string => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if in_string {
        return Err("Unterminated string literal.".to_string());
    }
    parts.push(current.trim().to_string());
    if parts.iter().any(String::is_empty) {
        return Err("Empty argument in call.".to_string());
    }
    Ok(parts)
}

/// One call argument: a literal inferred from its syntax, or a variable
/// reference when the text is a bare identifier.
fn parse_argument(text: &str, location: &Location) -> Result<ValueCommand, String> {
    let location = Some(location.clone());
    if text.starts_with('"') {
        let value = unquote(text)?;
        return Ok(ValueCommand::Literal {
            value: Value::String(value),
            location,
        });
    }
    match text {
        "true" => {
            return Ok(ValueCommand::Literal {
                value: Value::Boolean(true),
                location,
            })
        }
        "false" => {
            return Ok(ValueCommand::Literal {
                value: Value::Boolean(false),
                location,
            })
        }
        "nil" => {
            return Ok(ValueCommand::Literal {
                value: Value::Nil,
                location,
            })
        }
        _ => {}
    }
    if date_literal_regex().is_match(text) {
        let value = coerce_literal(text, Type::Date).map_err(|error| error.message)?;
        return Ok(ValueCommand::Literal { value, location });
    }
    if let Some(value) = Value::number_from_str(text) {
        return Ok(ValueCommand::Literal { value, location });
    }
    if identifier_regex().is_match(text) {
        return Ok(ValueCommand::VarRef {
            name: text.to_string(),
            location,
        });
    }
    Err(format!("Invalid call argument \"{}\".", text))
}

/// Removes surrounding quotes and resolves `\"`, `\\` and `\n` escapes.
fn unquote(text: &str) -> Result<String, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| text.len() >= 2)
        .ok_or_else(|| format!("Expected a quoted string, got \"{}\".", text))?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            if ch == '"' {
                return Err("Unescaped quote inside string literal.".to_string());
            }
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => return Err(format!("Unknown escape sequence \"\\{}\".", other)),
            None => return Err("Dangling escape at end of string literal.".to_string()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MapResourceLoader;
    use bigdecimal::BigDecimal;

    fn parse(source: &str) -> (TestSuite, Vec<ParseError>) {
        let loader = MapResourceLoader::new();
        let mut parser = ScriptParser::new(&loader);
        let suite = parser
            .parse_suite(source, Some("spec_case.uisl"), &ExecutionContext::new())
            .expect("source should parse");
        let errors = parser.take_errors();
        (suite, errors)
    }

    #[test]
    fn def_and_call_build_the_expected_tree() {
        let source = "def greet(name)\n  set msg = \"hi \" + name\nend\ngreet \"Ann\"\n";
        let (suite, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        assert_eq!(suite.name, "spec_case");
        assert_eq!(suite.test_cases.len(), 1);

        let commands = suite.test_cases[0].context.commands();
        assert_eq!(commands.len(), 2);
        let Command::MethodScript(method) = &commands[0] else {
            panic!("expected the def first");
        };
        assert_eq!(method.name, "greet");
        assert_eq!(method.parameters, vec![MethodParameter::untyped("name")]);

        let Command::MethodCall(call) = &commands[1] else {
            panic!("expected the call second");
        };
        assert_eq!(call.method, "greet");
        assert_eq!(call.arguments.len(), 1);
        assert_eq!(call.arguments[0].0, "name");
        assert_eq!(
            call.arguments[0].1,
            ValueCommand::Literal {
                value: Value::String("Ann".to_string()),
                location: call.arguments[0].1.location().cloned(),
            }
        );
    }

    #[test]
    fn explicit_suite_and_test_cases_are_honored() {
        let source = "suite \"login\"\ntest_case \"ok\"\nset a = 1\ntest_case \"bad\"\nset b = 2\n";
        let (suite, errors) = parse(source);
        assert!(errors.is_empty());
        assert_eq!(suite.name, "login");
        let names: Vec<&str> = suite
            .test_cases
            .iter()
            .map(|case| case.name.as_str())
            .collect();
        assert_eq!(names, vec!["ok", "bad"]);
        assert_eq!(suite.test_cases[0].context.test_suite.as_deref(), Some("login"));
    }

    #[test]
    fn required_units_contribute_symbols_but_no_commands() {
        let mut loader = MapResourceLoader::new();
        loader.insert("lib.uisl", "def helper(x)\n  set y = x\nend\nset leaked = 1\n");
        let mut parser = ScriptParser::new(&loader);
        let suite = parser
            .parse_suite(
                "require \"lib.uisl\"\nhelper 3\n",
                None,
                &ExecutionContext::new(),
            )
            .expect("source should parse");
        assert!(parser.errors().is_empty(), "{:?}", parser.errors());

        let context = &suite.test_cases[0].context;
        assert!(context.find_method("helper").is_some());
        // Only the call from the requiring script runs; lib's `set leaked`
        // was dropped.
        assert_eq!(context.commands().len(), 1);
        assert!(matches!(context.commands()[0], Command::MethodCall(_)));
    }

    #[test]
    fn unknown_command_records_a_parse_error_with_location() {
        let (_, errors) = parse("launch \"app\"\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("launch"));
        let location = errors[0].location.as_ref().expect("location should be set");
        assert_eq!(location.line, 1);
        assert_eq!(location.source_text, "launch \"app\"");
    }

    #[test]
    fn else_outside_an_if_is_skipped_with_an_error() {
        let (suite, errors) = parse("else\nset a = 1\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(suite.test_cases[0].context.commands().len(), 1);
    }

    #[test]
    fn comments_are_stripped_outside_string_literals() {
        let source = "def say(text)\nend\nsay \"#1\" # trailing comment\n";
        let (suite, errors) = parse(source);
        assert!(errors.is_empty(), "{:?}", errors);
        let Command::MethodCall(call) = &suite.test_cases[0].context.commands()[1] else {
            panic!("expected a call");
        };
        assert_eq!(
            call.arguments[0].1,
            ValueCommand::Literal {
                value: Value::String("#1".to_string()),
                location: call.arguments[0].1.location().cloned(),
            }
        );
    }

    #[test]
    fn call_argument_literal_types_are_inferred_from_syntax() {
        let source = "def probe(a, b, c, d, e)\nend\nprobe \"100\", 100, true, 2021-02-28, other\n";
        let (suite, errors) = parse(source);
        assert!(errors.is_empty(), "{:?}", errors);
        let Command::MethodCall(call) = &suite.test_cases[0].context.commands()[1] else {
            panic!("expected a call");
        };
        let values: Vec<&ValueCommand> = call.arguments.iter().map(|(_, value)| value).collect();
        assert!(matches!(
            values[0],
            ValueCommand::Literal {
                value: Value::String(_),
                ..
            }
        ));
        let ValueCommand::Literal {
            value: Value::Number(number),
            ..
        } = values[1]
        else {
            panic!("expected a number literal");
        };
        assert_eq!(number, &BigDecimal::from(100));
        assert!(matches!(
            values[2],
            ValueCommand::Literal {
                value: Value::Boolean(true),
                ..
            }
        ));
        assert!(matches!(
            values[3],
            ValueCommand::Literal {
                value: Value::Date(_),
                ..
            }
        ));
        assert!(matches!(values[4], ValueCommand::VarRef { name, .. } if name == "other"));
    }

    #[test]
    fn argument_count_mismatch_is_a_parse_error() {
        let (_, errors) = parse("def one(a)\nend\none 1, 2\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("expects 1 argument(s), got 2"));
    }

    #[test]
    fn unclosed_blocks_are_reported() {
        let (_, errors) = parse("while true\nbreak\n");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("left open"));
    }

    #[test]
    fn nested_control_flow_round_trips_structurally() {
        let source = "while n < 10\n  if n == 5\n    break\n  elsif n == 3\n    inc n\n  else\n    set n = n + 2\n  end\n  inc n\nend\n";
        let (suite, errors) = parse(source);
        assert!(errors.is_empty(), "{:?}", errors);
        let commands = suite.test_cases[0].context.commands();
        assert_eq!(commands.len(), 1);
        let Command::While(while_command) = &commands[0] else {
            panic!("expected a while");
        };
        assert_eq!(while_command.commands.len(), 2);
        let Command::If(if_command) = &while_command.commands[0] else {
            panic!("expected an if");
        };
        assert_eq!(if_command.elsifs.len(), 1);
        assert!(if_command.else_commands.is_some());
    }
}
