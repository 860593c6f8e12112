use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::ScriptError;
use crate::location::Location;
use crate::value::{Type, Value};

/// Sequencing signal returned by every executed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlow {
    /// Continue with the next command in the list.
    Next,
    /// Exit the innermost enclosing while loop; absorbed by the loop itself.
    Break,
    /// Return from the enclosing user-defined procedure; absorbed by the call.
    Return,
    /// Abort the whole suite; propagates through every nesting level.
    Exit,
}

/// Anything evaluable to a Value at run time: a literal, a variable
/// reference, or expression text delegated to the embedded evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueCommand {
    Literal {
        value: Value,
        location: Option<Location>,
    },
    VarRef {
        name: String,
        location: Option<Location>,
    },
    Expression {
        expression: String,
        location: Option<Location>,
    },
}

impl ValueCommand {
    pub fn literal(value: Value) -> Self {
        ValueCommand::Literal {
            value,
            location: None,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            ValueCommand::Literal { location, .. }
            | ValueCommand::VarRef { location, .. }
            | ValueCommand::Expression { location, .. } => location.as_ref(),
        }
    }
}

/// Declared procedure parameter. The type is present for XML-declared
/// procedures and absent for DSL-declared ones, where argument types are
/// inferred from literal syntax at each call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameter {
    pub name: String,
    pub ty: Option<Type>,
}

impl MethodParameter {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
        }
    }

    pub fn typed(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty: Some(ty),
        }
    }
}

/// Outcome of a native procedure invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOutcome {
    Value(Value),
    Exit,
}

/// A built-in procedure supplied by the environment (UI automation backend,
/// assertions, pacing). Opaque to the serializer: it has no textual body.
pub trait NativeMethod: Send + Sync {
    fn call(
        &self,
        context: &mut ExecutionContext,
        args: &BTreeMap<String, Value>,
    ) -> Result<NativeOutcome, ScriptError>;
}

/// A callable procedure: either a user-defined script body or a native leaf.
#[derive(Clone)]
pub struct MethodCommand {
    pub name: String,
    pub parameters: Vec<MethodParameter>,
    pub body: MethodBody,
}

#[derive(Clone)]
pub enum MethodBody {
    Script {
        commands: Vec<Command>,
        source_file: Option<String>,
    },
    Native(Arc<dyn NativeMethod>),
}

impl MethodCommand {
    pub fn script(
        name: impl Into<String>,
        parameters: Vec<MethodParameter>,
        commands: Vec<Command>,
        source_file: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            body: MethodBody::Script {
                commands,
                source_file,
            },
        }
    }

    pub fn native(
        name: impl Into<String>,
        parameters: Vec<MethodParameter>,
        handler: Arc<dyn NativeMethod>,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            body: MethodBody::Native(handler),
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, MethodBody::Native(_))
    }

    pub fn parameter(&self, name: &str) -> Option<&MethodParameter> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

impl fmt::Debug for MethodCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCommand")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("body", &self.body)
            .finish()
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodBody::Script { commands, .. } => {
                write!(f, "Script({} commands)", commands.len())
            }
            MethodBody::Native(_) => write!(f, "Native"),
        }
    }
}

impl PartialEq for MethodCommand {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.parameters == other.parameters && self.body == other.body
    }
}

impl PartialEq for MethodBody {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                MethodBody::Script {
                    commands,
                    source_file,
                },
                MethodBody::Script {
                    commands: other_commands,
                    source_file: other_source_file,
                },
            ) => commands == other_commands && source_file == other_source_file,
            (MethodBody::Native(handler), MethodBody::Native(other_handler)) => {
                Arc::ptr_eq(handler, other_handler)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetCommand {
    pub variable: String,
    pub value: ValueCommand,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncCommand {
    pub variable: String,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElsifBranch {
    pub condition: ValueCommand,
    pub commands: Vec<Command>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfCommand {
    pub condition: ValueCommand,
    pub then_commands: Vec<Command>,
    pub elsifs: Vec<ElsifBranch>,
    pub else_commands: Option<Vec<Command>>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileCommand {
    pub condition: ValueCommand,
    pub commands: Vec<Command>,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakCommand {
    pub location: Option<Location>,
}

/// Invocation of a user-defined or native procedure. Arguments are kept in
/// declared-parameter order so the serializer can emit them positionally.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCallCommand {
    pub method: String,
    pub arguments: Vec<(String, ValueCommand)>,
    pub location: Option<Location>,
}

/// One executable/serializable AST node. The enum is closed on purpose:
/// every operation over commands (run, serialize) matches exhaustively and
/// breaks at compile time when a variant is added without handling.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set(SetCommand),
    Inc(IncCommand),
    If(IfCommand),
    While(WhileCommand),
    Break(BreakCommand),
    MethodCall(MethodCallCommand),
    MethodScript(Arc<MethodCommand>),
}

impl Command {
    pub fn name(&self) -> &str {
        match self {
            Command::Set(_) => "set",
            Command::Inc(_) => "inc",
            Command::If(_) => "if",
            Command::While(_) => "while",
            Command::Break(_) => "break",
            Command::MethodCall(command) => &command.method,
            Command::MethodScript(method) => &method.name,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Command::Set(command) => command.location.as_ref(),
            Command::Inc(command) => command.location.as_ref(),
            Command::If(command) => command.location.as_ref(),
            Command::While(command) => command.location.as_ref(),
            Command::Break(command) => command.location.as_ref(),
            Command::MethodCall(command) => command.location.as_ref(),
            Command::MethodScript(_) => None,
        }
    }
}
