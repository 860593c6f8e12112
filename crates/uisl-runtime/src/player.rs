use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uisl_core::{
    Command, CommandFlow, CommandSymbol, ExecutionContext, ExpressionEvaluator, IfCommand,
    Location, MethodBody, MethodCallCommand, MethodCommand, NativeOutcome, ScriptError, TestSuite,
    Type, Value, ValueCommand, WhileCommand,
};

/// Pacing delay between successfully executed top-level commands, tuned for
/// driving a live UI. Tests and batch runs override it with zero.
pub const DEFAULT_COMMAND_INTERVAL: Duration = Duration::from_millis(50);

/// One recoverable execution fault, attributed to the test case it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerError {
    pub suite: Option<String>,
    pub test_case: Option<String>,
    pub location: Option<Location>,
    pub message: String,
}

/// Live callback fired once per successfully executed command.
pub type CommandObserver = Box<dyn FnMut(&Command)>;

/// Walks command lists and dispatches each command, honoring the flow
/// protocol: NEXT continues, BREAK is absorbed by the innermost while,
/// RETURN by the enclosing procedure call, EXIT unwinds everything.
///
/// Faults stop the current test case only; they accumulate in `errors()`
/// and sibling test cases keep running.
pub struct Player {
    evaluator: Box<dyn ExpressionEvaluator>,
    command_interval: Duration,
    observer: Option<CommandObserver>,
    errors: Vec<PlayerError>,
}

impl Player {
    pub fn new(evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            evaluator,
            command_interval: DEFAULT_COMMAND_INTERVAL,
            observer: None,
            errors: Vec::new(),
        }
    }

    pub fn with_command_interval(mut self, interval: Duration) -> Self {
        self.command_interval = interval;
        self
    }

    /// Registers a callback invoked after every command that executed
    /// without a fault, at any nesting depth. A mirroring or recording
    /// collaborator hooks in here to follow the run live.
    pub fn with_command_observer(mut self, observer: impl FnMut(&Command) + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn errors(&self) -> &[PlayerError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<PlayerError> {
        std::mem::take(&mut self.errors)
    }

    /// Plays every test case of the suite in order.
    pub fn play_suite(&mut self, suite: &TestSuite) -> CommandFlow {
        self.play_suite_filtered(suite, &[])
    }

    /// Plays the named subset of test cases; an empty filter plays all.
    /// EXIT from any case stops the remaining ones.
    pub fn play_suite_filtered(&mut self, suite: &TestSuite, test_cases: &[String]) -> CommandFlow {
        for case in &suite.test_cases {
            if !test_cases.is_empty() && !test_cases.iter().any(|name| name == &case.name) {
                continue;
            }
            debug!(suite = %suite.name, test_case = %case.name, "playing test case");
            let mut context = case.context.clone();
            match self.play(&mut context) {
                Ok(CommandFlow::Exit) => return CommandFlow::Exit,
                Ok(_) => {}
                Err(error) => {
                    warn!(suite = %suite.name, test_case = %case.name, "{}", error.render());
                    self.errors.push(PlayerError {
                        suite: Some(suite.name.clone()),
                        test_case: Some(case.name.clone()),
                        location: error.location,
                        message: format!("{}: {}", error.code, error.message),
                    });
                }
            }
        }
        CommandFlow::Next
    }

    /// Executes a context's top-level command list. BREAK or RETURN
    /// reaching this level means a while/procedure failed to absorb it,
    /// which is a protocol violation, not a script error.
    pub fn play(&mut self, context: &mut ExecutionContext) -> Result<CommandFlow, ScriptError> {
        let commands = context.commands().to_vec();
        match self.run_list(&commands, context, true)? {
            flow @ (CommandFlow::Break | CommandFlow::Return) => Err(ScriptError::new(
                "EXEC_FLOW_PROTOCOL",
                format!("{:?} flow signal escaped to the top-level command list.", flow),
            )),
            flow => Ok(flow),
        }
    }

    fn run_list(
        &mut self,
        commands: &[Command],
        context: &mut ExecutionContext,
        pace: bool,
    ) -> Result<CommandFlow, ScriptError> {
        for command in commands {
            debug!(command = command.name(), "running command");
            let flow = self.run_command(command, context)?;
            if let Some(observer) = &mut self.observer {
                observer(command);
            }
            match flow {
                CommandFlow::Next => {}
                other => return Ok(other),
            }
            if pace && !self.command_interval.is_zero() {
                thread::sleep(self.command_interval);
            }
        }
        Ok(CommandFlow::Next)
    }

    fn run_command(
        &mut self,
        command: &Command,
        context: &mut ExecutionContext,
    ) -> Result<CommandFlow, ScriptError> {
        match command {
            Command::Set(set) => {
                let value = self.eval_value(&set.value, context)?;
                context.set_variable(&set.variable, value);
                Ok(CommandFlow::Next)
            }
            Command::Inc(inc) => {
                let current = context.variable(&inc.variable).cloned().ok_or_else(|| {
                    located(
                        "EXEC_VAR_MISSING",
                        format!("Variable \"{}\" is not defined.", inc.variable),
                        inc.location.as_ref(),
                    )
                })?;
                let Value::Number(number) = current else {
                    return Err(located(
                        "EXEC_TYPE_MISMATCH",
                        format!(
                            "inc expects \"{}\" to hold a number, found {}.",
                            inc.variable,
                            current.type_of().name()
                        ),
                        inc.location.as_ref(),
                    ));
                };
                context.set_variable(&inc.variable, Value::Number(number + BigDecimal::from(1)));
                Ok(CommandFlow::Next)
            }
            Command::If(if_command) => self.run_if(if_command, context),
            Command::While(while_command) => self.run_while(while_command, context),
            Command::Break(_) => Ok(CommandFlow::Break),
            Command::MethodCall(call) => self.run_method_call(call, context),
            Command::MethodScript(method) => {
                // Re-registration keeps replayed scripts deterministic.
                context.add_symbol(CommandSymbol::Method(method.clone()));
                Ok(CommandFlow::Next)
            }
        }
    }

    /// Evaluate the chain's conditions in declaration order and run at most
    /// one branch.
    fn run_if(
        &mut self,
        if_command: &IfCommand,
        context: &mut ExecutionContext,
    ) -> Result<CommandFlow, ScriptError> {
        if self.eval_condition(&if_command.condition, context)? {
            return self.run_list(&if_command.then_commands, context, false);
        }
        for elsif in &if_command.elsifs {
            if self.eval_condition(&elsif.condition, context)? {
                return self.run_list(&elsif.commands, context, false);
            }
        }
        if let Some(else_commands) = &if_command.else_commands {
            return self.run_list(else_commands, context, false);
        }
        Ok(CommandFlow::Next)
    }

    /// The while loop owns BREAK: a body BREAK exits the loop as NEXT.
    /// EXIT and RETURN propagate without further iterations.
    fn run_while(
        &mut self,
        while_command: &WhileCommand,
        context: &mut ExecutionContext,
    ) -> Result<CommandFlow, ScriptError> {
        loop {
            if !self.eval_condition(&while_command.condition, context)? {
                return Ok(CommandFlow::Next);
            }
            match self.run_list(&while_command.commands, context, false)? {
                CommandFlow::Next => {}
                CommandFlow::Break => return Ok(CommandFlow::Next),
                flow => return Ok(flow),
            }
        }
    }

    fn run_method_call(
        &mut self,
        call: &MethodCallCommand,
        context: &mut ExecutionContext,
    ) -> Result<CommandFlow, ScriptError> {
        let method = context.find_method(&call.method).ok_or_else(|| {
            located(
                "EXEC_METHOD_MISSING",
                format!("Unknown command \"{}\".", call.method),
                call.location.as_ref(),
            )
        })?;
        let arguments = self.bind_arguments(call, &method, context)?;
        match &method.body {
            MethodBody::Native(handler) => {
                let outcome = handler.call(context, &arguments).map_err(|error| {
                    attach_location(error, call.location.as_ref())
                })?;
                match outcome {
                    NativeOutcome::Value(_) => Ok(CommandFlow::Next),
                    NativeOutcome::Exit => Ok(CommandFlow::Exit),
                }
            }
            MethodBody::Script { commands, .. } => {
                // Parameters are call-local: shadowed caller symbols are
                // restored on the way out, all other reads and writes in
                // the body hit the caller's context directly.
                let mut shadowed = Vec::with_capacity(arguments.len());
                for (name, value) in &arguments {
                    shadowed.push((name.clone(), context.remove_symbol(name)));
                    context.set_variable(name.clone(), value.clone());
                }
                let result = self.run_list(commands, context, false);
                for (name, previous) in shadowed {
                    context.remove_symbol(&name);
                    if let Some(symbol) = previous {
                        context.add_symbol(symbol);
                    }
                }
                match result? {
                    CommandFlow::Next | CommandFlow::Return => Ok(CommandFlow::Next),
                    CommandFlow::Exit => Ok(CommandFlow::Exit),
                    CommandFlow::Break => Err(located(
                        "EXEC_FLOW_PROTOCOL",
                        format!(
                            "Break flow signal escaped the body of \"{}\".",
                            call.method
                        ),
                        call.location.as_ref(),
                    )),
                }
            }
        }
    }

    /// Evaluates the call's arguments and checks them against the declared
    /// parameters. String-typed parameters accept any value via its display
    /// form; other declared types are strict. Untyped parameters take the
    /// value as-is.
    fn bind_arguments(
        &mut self,
        call: &MethodCallCommand,
        method: &MethodCommand,
        context: &mut ExecutionContext,
    ) -> Result<BTreeMap<String, Value>, ScriptError> {
        if call.arguments.len() != method.parameters.len() {
            return Err(located(
                "EXEC_ARG_COUNT",
                format!(
                    "\"{}\" expects {} argument(s), got {}.",
                    call.method,
                    method.parameters.len(),
                    call.arguments.len()
                ),
                call.location.as_ref(),
            ));
        }
        let mut bound = BTreeMap::new();
        for (name, value_command) in &call.arguments {
            let parameter = method.parameter(name).ok_or_else(|| {
                located(
                    "EXEC_ARG_UNKNOWN",
                    format!("\"{}\" has no parameter named \"{}\".", call.method, name),
                    call.location.as_ref(),
                )
            })?;
            let value = self.eval_value(value_command, context)?;
            let value = match parameter.ty {
                None => value,
                Some(Type::String) => Value::String(value.to_string()),
                Some(ty) if value.type_of() == ty => value,
                Some(ty) => {
                    return Err(located(
                        "EXEC_ARG_TYPE",
                        format!(
                            "Argument \"{}\" of \"{}\" expects {}, got {}.",
                            name,
                            call.method,
                            ty.name(),
                            value.type_of().name()
                        ),
                        call.location.as_ref(),
                    ))
                }
            };
            bound.insert(name.clone(), value);
        }
        Ok(bound)
    }

    fn eval_value(
        &mut self,
        value: &ValueCommand,
        context: &mut ExecutionContext,
    ) -> Result<Value, ScriptError> {
        match value {
            ValueCommand::Literal { value, .. } => Ok(value.clone()),
            ValueCommand::VarRef { name, location } => {
                context.variable(name).cloned().ok_or_else(|| {
                    located(
                        "EXEC_VAR_MISSING",
                        format!("Variable \"{}\" is not defined.", name),
                        location.as_ref(),
                    )
                })
            }
            ValueCommand::Expression {
                expression,
                location,
            } => self
                .evaluator
                .evaluate(&context.variables(), expression)
                .map_err(|error| attach_location(error, location.as_ref())),
        }
    }

    /// Conditions are strictly Boolean; any other result is a fault.
    fn eval_condition(
        &mut self,
        condition: &ValueCommand,
        context: &mut ExecutionContext,
    ) -> Result<bool, ScriptError> {
        let value = self.eval_value(condition, context)?;
        value.as_boolean().ok_or_else(|| {
            located(
                "EXEC_BOOLEAN_EXPECTED",
                format!(
                    "Condition must evaluate to a boolean, got {}.",
                    value.type_of().name()
                ),
                condition.location(),
            )
        })
    }
}

fn located(code: &str, message: String, location: Option<&Location>) -> ScriptError {
    match location {
        Some(location) => ScriptError::with_location(code, message, location.clone()),
        None => ScriptError::new(code, message),
    }
}

fn attach_location(error: ScriptError, location: Option<&Location>) -> ScriptError {
    if error.location.is_some() {
        return error;
    }
    match location {
        Some(location) => ScriptError::with_location(error.code, error.message, location.clone()),
        None => error,
    }
}
