use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command::{Command, MethodCommand};
use crate::value::Value;

/// A named entry in a scope: a variable binding or a procedure declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandSymbol {
    Variable { name: String, value: Value },
    Method(Arc<MethodCommand>),
}

impl CommandSymbol {
    pub fn variable(name: impl Into<String>, value: Value) -> Self {
        CommandSymbol::Variable {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CommandSymbol::Variable { name, .. } => name,
            CommandSymbol::Method(method) => &method.name,
        }
    }
}

/// A scope node: symbol table plus the ordered command list to run in it.
///
/// A test-case context is derived from a prototype context by snapshotting
/// the prototype's symbols at creation time; the two diverge afterwards and
/// keep no back reference to each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    symbols: BTreeMap<String, CommandSymbol>,
    commands: Vec<Command>,
    pub test_suite: Option<String>,
    pub test_case: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a new context with a snapshot of all symbols currently visible
    /// in the prototype. Commands are not inherited.
    pub fn derive(prototype: &ExecutionContext) -> Self {
        Self {
            symbols: prototype.symbols.clone(),
            commands: Vec::new(),
            test_suite: prototype.test_suite.clone(),
            test_case: None,
        }
    }

    pub fn add_command(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    /// Registers a symbol under its own name; last write wins.
    pub fn add_symbol(&mut self, symbol: CommandSymbol) {
        self.symbols.insert(symbol.name().to_string(), symbol);
    }

    pub fn remove_symbol(&mut self, name: &str) -> Option<CommandSymbol> {
        self.symbols.remove(name)
    }

    pub fn find_symbol(&self, name: &str) -> Option<&CommandSymbol> {
        self.symbols.get(name)
    }

    pub fn find_method(&self, name: &str) -> Option<Arc<MethodCommand>> {
        match self.symbols.get(name) {
            Some(CommandSymbol::Method(method)) => Some(method.clone()),
            _ => None,
        }
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.symbols
            .insert(name.clone(), CommandSymbol::Variable { name, value });
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        match self.symbols.get(name) {
            Some(CommandSymbol::Variable { value, .. }) => Some(value),
            _ => None,
        }
    }

    /// All visible variable bindings, in name order. This is what gets fed
    /// to the delegated expression evaluator.
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.symbols
            .iter()
            .filter_map(|(name, symbol)| match symbol {
                CommandSymbol::Variable { value, .. } => Some((name.clone(), value.clone())),
                CommandSymbol::Method(_) => None,
            })
            .collect()
    }
}

/// Ordered collection of test cases parsed from one suite source.
///
/// `commands` holds the suite-level declarations written before the first
/// test case; their symbols are already snapshotted into every case context,
/// but the commands themselves must survive here so the serializer can emit
/// them back.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub name: String,
    pub commands: Vec<Command>,
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: Vec::new(),
            test_cases: Vec::new(),
        }
    }

    pub fn add_test_case(&mut self, test_case: TestCase) {
        self.test_cases.push(test_case);
    }
}

/// A named test case owning the scope its commands run in.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub name: String,
    pub context: ExecutionContext,
}

impl TestCase {
    pub fn new(name: impl Into<String>, mut context: ExecutionContext) -> Self {
        let name = name.into();
        context.test_case = Some(name.clone());
        Self { name, context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MethodParameter;

    #[test]
    fn derive_snapshots_symbols_without_back_reference() {
        let mut prototype = ExecutionContext::new();
        prototype.set_variable("x", Value::Boolean(true));

        let mut derived = ExecutionContext::derive(&prototype);
        assert_eq!(derived.variable("x"), Some(&Value::Boolean(true)));

        // Mutations after derivation do not leak in either direction.
        derived.set_variable("x", Value::Boolean(false));
        prototype.set_variable("y", Value::Nil);
        assert_eq!(prototype.variable("x"), Some(&Value::Boolean(true)));
        assert_eq!(derived.variable("y"), None);
    }

    #[test]
    fn symbols_are_unique_per_context_with_last_write_wins() {
        let mut context = ExecutionContext::new();
        context.set_variable("n", Value::String("first".to_string()));
        context.set_variable("n", Value::String("second".to_string()));
        assert_eq!(
            context.variable("n"),
            Some(&Value::String("second".to_string()))
        );
    }

    #[test]
    fn find_method_ignores_variable_symbols() {
        let mut context = ExecutionContext::new();
        context.set_variable("click", Value::Nil);
        assert!(context.find_method("click").is_none());

        let method = Arc::new(MethodCommand::script(
            "click",
            vec![MethodParameter::untyped("target")],
            Vec::new(),
            None,
        ));
        context.add_symbol(CommandSymbol::Method(method));
        assert!(context.find_method("click").is_some());
    }

    #[test]
    fn variables_excludes_methods() {
        let mut context = ExecutionContext::new();
        context.set_variable("a", Value::Boolean(true));
        context.add_symbol(CommandSymbol::Method(Arc::new(MethodCommand::script(
            "noop",
            Vec::new(),
            Vec::new(),
            None,
        ))));
        let bindings = context.variables();
        assert_eq!(bindings.len(), 1);
        assert!(bindings.contains_key("a"));
    }
}
