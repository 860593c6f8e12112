use std::sync::Arc;

use tracing::debug;
use uisl_core::{
    coerce_literal, BreakCommand, Command, CommandSymbol, ElsifBranch, ExecutionContext,
    IfCommand, IncCommand, Location, MethodCallCommand, MethodCommand, MethodParameter,
    ParseError, ScriptError, SetCommand, TestCase, TestSuite, Type, Value, ValueCommand,
    WhileCommand,
};

use crate::loader::ResourceLoader;
use crate::xml_tree::{parse_xml_root, XmlElement};

struct ParseState {
    prototype: ExecutionContext,
    cases: Vec<TestCase>,
    current: Option<(String, ExecutionContext)>,
}

impl ParseState {
    fn lookup_method(&self, name: &str) -> Option<Arc<MethodCommand>> {
        if let Some((_, context)) = &self.current {
            if let Some(method) = context.find_method(name) {
                return Some(method);
            }
        }
        self.prototype.find_method(name)
    }

    fn register_method(&mut self, method: Arc<MethodCommand>) {
        self.prototype
            .add_symbol(CommandSymbol::Method(method.clone()));
        if let Some((_, context)) = &mut self.current {
            context.add_symbol(CommandSymbol::Method(method));
        }
    }
}

/// XML front end. Builds the same Command tree as the textual parser;
/// attribute values are untyped strings, so every argument coerces through
/// the declared parameter type of the target procedure.
pub struct XmlParser<'a> {
    loader: &'a dyn ResourceLoader,
    errors: Vec<ParseError>,
}

impl<'a> XmlParser<'a> {
    pub fn new(loader: &'a dyn ResourceLoader) -> Self {
        Self {
            loader,
            errors: Vec::new(),
        }
    }

    /// Parses one XML suite document. A missing `<suite>` root is fatal;
    /// everything structural below it accumulates in `errors()`.
    pub fn parse_suite(
        &mut self,
        source: &str,
        file_name: Option<&str>,
        prototype: &ExecutionContext,
    ) -> Result<TestSuite, ScriptError> {
        let root = parse_xml_root(source, file_name)?;
        if root.name != "suite" {
            return Err(ScriptError::with_location(
                "PARSE_NO_SUITE",
                format!("Expected a <suite> root element, found <{}>.", root.name),
                root.location.clone(),
            ));
        }
        let name = match root.attribute("name") {
            Some(name) => name.to_string(),
            None => {
                self.record(root.location.clone(), "<suite> requires a name attribute.");
                "main".to_string()
            }
        };
        let mut state = ParseState {
            prototype: ExecutionContext::derive(prototype),
            cases: Vec::new(),
            current: None,
        };
        state.prototype.test_suite = Some(name.clone());
        self.parse_suite_children(&root, &mut state, false)?;
        debug!(suite = %name, cases = state.cases.len(), errors = self.errors.len(), "parsed xml source");

        let mut suite = TestSuite::new(name);
        suite.commands = state.prototype.take_commands();
        for case in state.cases {
            suite.add_test_case(case);
        }
        Ok(suite)
    }

    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    fn parse_suite_children(
        &mut self,
        root: &XmlElement,
        state: &mut ParseState,
        symbols_only: bool,
    ) -> Result<(), ScriptError> {
        for child in &root.children {
            match child.name.as_str() {
                "require" => {
                    let Some(unit) = self.required_attribute(child, "name") else {
                        continue;
                    };
                    debug!(unit = %unit, "loading required unit");
                    let required = self.loader.read(&unit)?;
                    let required_root = parse_xml_root(&required, Some(&unit))?;
                    if required_root.name != "suite" {
                        return Err(ScriptError::with_location(
                            "PARSE_NO_SUITE",
                            format!(
                                "Required unit \"{}\" has no <suite> root element.",
                                unit
                            ),
                            required_root.location.clone(),
                        ));
                    }
                    self.parse_suite_children(&required_root, state, true)?;
                }
                "test_case" => {
                    if symbols_only {
                        // Declarations still register; commands are dropped.
                        self.parse_command_list(&child.children, state, true);
                        continue;
                    }
                    let Some(name) = self.required_attribute(child, "name") else {
                        continue;
                    };
                    state.current = Some((name, ExecutionContext::derive(&state.prototype)));
                    let commands = self.parse_command_list(&child.children, state, false);
                    if let Some((name, mut context)) = state.current.take() {
                        for command in commands {
                            context.add_command(command);
                        }
                        state.cases.push(TestCase::new(name, context));
                    }
                }
                "def" => {
                    if let Some(command) = self.parse_def(child, state) {
                        if !symbols_only {
                            state.prototype.add_command(command);
                        }
                    }
                }
                _ => self.record(
                    child.location.clone(),
                    format!(
                        "Unexpected <{}> at suite level; only <test_case>, <require> and <def> may appear here.",
                        child.name
                    ),
                ),
            }
        }
        Ok(())
    }

    fn parse_command_list(
        &mut self,
        elements: &[XmlElement],
        state: &mut ParseState,
        symbols_only: bool,
    ) -> Vec<Command> {
        let mut commands = Vec::new();
        for element in elements {
            if element.name == "def" {
                if let Some(command) = self.parse_def(element, state) {
                    if !symbols_only {
                        commands.push(command);
                    }
                }
                continue;
            }
            if symbols_only {
                continue;
            }
            if let Some(command) = self.parse_command(element, state) {
                commands.push(command);
            }
        }
        commands
    }

    fn parse_command(&mut self, element: &XmlElement, state: &mut ParseState) -> Option<Command> {
        let location = element.location.clone();
        match element.name.as_str() {
            "set" => {
                let variable = self.required_attribute(element, "var")?;
                let expression = self.required_attribute(element, "expression")?;
                Some(Command::Set(SetCommand {
                    variable,
                    value: ValueCommand::Expression {
                        expression,
                        location: Some(location.clone()),
                    },
                    location: Some(location),
                }))
            }
            "inc" => {
                let variable = self.required_attribute(element, "var")?;
                Some(Command::Inc(IncCommand {
                    variable,
                    location: Some(location),
                }))
            }
            "if" => self.parse_if(element, state),
            "while" => {
                let expression = self.required_attribute(element, "expression")?;
                let commands = self.parse_command_list(&element.children, state, false);
                Some(Command::While(WhileCommand {
                    condition: ValueCommand::Expression {
                        expression,
                        location: Some(location.clone()),
                    },
                    commands,
                    location: Some(location),
                }))
            }
            "break" => Some(Command::Break(BreakCommand {
                location: Some(location),
            })),
            "call" => {
                let method = self.required_attribute(element, "method")?;
                let mut provided = Vec::new();
                for child in &element.children {
                    if child.name != "call_parameter" {
                        self.record(
                            child.location.clone(),
                            format!("Unexpected <{}> inside <call>.", child.name),
                        );
                        return None;
                    }
                    let name = self.required_attribute(child, "name")?;
                    let value = self.required_attribute(child, "value")?;
                    provided.push((name, value));
                }
                self.build_call(&method, provided, location, state)
            }
            "then" | "elsif" | "else" => {
                self.record(
                    location,
                    format!("<{}> must be nested directly inside an <if>.", element.name),
                );
                None
            }
            "suite" | "test_case" | "require" => {
                self.record(
                    location,
                    format!("<{}> cannot appear inside a command list.", element.name),
                );
                None
            }
            _ => {
                // Unknown element names resolve as procedure calls with the
                // attributes as named arguments.
                let provided = element
                    .attributes
                    .iter()
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                self.build_call(&element.name, provided, location, state)
            }
        }
    }

    fn parse_if(&mut self, element: &XmlElement, state: &mut ParseState) -> Option<Command> {
        let location = element.location.clone();
        let expression = self.required_attribute(element, "expression")?;
        let mut then_commands = Vec::new();
        let mut seen_then = false;
        let mut elsifs: Vec<ElsifBranch> = Vec::new();
        let mut else_commands = None;
        for section in &element.children {
            match section.name.as_str() {
                "then" => {
                    if seen_then || !elsifs.is_empty() || else_commands.is_some() {
                        self.record(section.location.clone(), "<then> must come first and only once.");
                        continue;
                    }
                    seen_then = true;
                    then_commands = self.parse_command_list(&section.children, state, false);
                }
                "elsif" => {
                    if else_commands.is_some() {
                        self.record(section.location.clone(), "<elsif> cannot follow <else>.");
                        continue;
                    }
                    let Some(condition) = self.required_attribute(section, "expression") else {
                        continue;
                    };
                    let commands = self.parse_command_list(&section.children, state, false);
                    elsifs.push(ElsifBranch {
                        condition: ValueCommand::Expression {
                            expression: condition,
                            location: Some(section.location.clone()),
                        },
                        commands,
                        location: Some(section.location.clone()),
                    });
                }
                "else" => {
                    if else_commands.is_some() {
                        self.record(section.location.clone(), "Duplicate <else>.");
                        continue;
                    }
                    else_commands = Some(self.parse_command_list(&section.children, state, false));
                }
                _ => self.record(
                    section.location.clone(),
                    format!(
                        "Commands inside <if> must be nested in <then>, <elsif> or <else>, found <{}>.",
                        section.name
                    ),
                ),
            }
        }
        Some(Command::If(IfCommand {
            condition: ValueCommand::Expression {
                expression,
                location: Some(location.clone()),
            },
            then_commands,
            elsifs,
            else_commands,
            location: Some(location),
        }))
    }

    /// Parses a `<def>` and registers it so later siblings can call it.
    fn parse_def(&mut self, element: &XmlElement, state: &mut ParseState) -> Option<Command> {
        let name = self.required_attribute(element, "name")?;
        let mut parameters: Vec<MethodParameter> = Vec::new();
        let mut body_elements = Vec::new();
        for child in &element.children {
            if child.name != "parameter" {
                body_elements.push(child.clone());
                continue;
            }
            let Some(parameter_name) = self.required_attribute(child, "name") else {
                continue;
            };
            let Some(type_name) = self.required_attribute(child, "type") else {
                continue;
            };
            let Some(ty) = Type::parse(&type_name) else {
                self.record(
                    child.location.clone(),
                    format!("Unknown parameter type \"{}\".", type_name),
                );
                continue;
            };
            if parameters.iter().any(|existing| existing.name == parameter_name) {
                self.record(
                    child.location.clone(),
                    format!("Parameter \"{}\" declared more than once.", parameter_name),
                );
                continue;
            }
            parameters.push(MethodParameter::typed(parameter_name, ty));
        }
        let commands = self.parse_command_list(&body_elements, state, false);
        let method = Arc::new(MethodCommand::script(
            name,
            parameters,
            commands,
            element.location.file.clone(),
        ));
        state.register_method(method.clone());
        Some(Command::MethodScript(method))
    }

    /// Builds a MethodCallCommand from named, untyped attribute arguments,
    /// coercing each through the declared parameter type and reordering to
    /// the declared parameter order.
    fn build_call(
        &mut self,
        method_name: &str,
        provided: Vec<(String, String)>,
        location: Location,
        state: &mut ParseState,
    ) -> Option<Command> {
        let Some(method) = state.lookup_method(method_name) else {
            self.record(location, format!("Unknown command \"{}\".", method_name));
            return None;
        };
        let mut coerced: Vec<(String, Value)> = Vec::with_capacity(provided.len());
        for (name, text) in provided {
            let Some(parameter) = method.parameter(&name) else {
                self.record(
                    location.clone(),
                    format!(
                        "\"{}\" has no parameter named \"{}\".",
                        method_name, name
                    ),
                );
                return None;
            };
            let Some(ty) = parameter.ty else {
                self.record(
                    location.clone(),
                    format!(
                        "Parameter \"{}\" of \"{}\" has no declared type and cannot take an attribute argument.",
                        name, method_name
                    ),
                );
                return None;
            };
            if coerced.iter().any(|(existing, _)| existing == &name) {
                self.record(
                    location.clone(),
                    format!("Duplicate argument \"{}\".", name),
                );
                return None;
            }
            match coerce_literal(&text, ty) {
                Ok(value) => coerced.push((name, value)),
                Err(error) => {
                    self.record(location.clone(), error.message);
                    return None;
                }
            }
        }
        let mut arguments = Vec::with_capacity(method.parameters.len());
        for parameter in &method.parameters {
            let Some(position) = coerced
                .iter()
                .position(|(name, _)| name == &parameter.name)
            else {
                self.record(
                    location.clone(),
                    format!(
                        "Missing argument \"{}\" for \"{}\".",
                        parameter.name, method_name
                    ),
                );
                return None;
            };
            let (name, value) = coerced.remove(position);
            arguments.push((
                name,
                ValueCommand::Literal {
                    value,
                    location: Some(location.clone()),
                },
            ));
        }
        Some(Command::MethodCall(MethodCallCommand {
            method: method_name.to_string(),
            arguments,
            location: Some(location),
        }))
    }

    fn required_attribute(&mut self, element: &XmlElement, name: &str) -> Option<String> {
        match element.attribute(name) {
            Some(value) => Some(value.to_string()),
            None => {
                self.record(
                    element.location.clone(),
                    format!("<{}> requires a {} attribute.", element.name, name),
                );
                None
            }
        }
    }

    fn record(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(ParseError::error(Some(location), message));
    }
}
