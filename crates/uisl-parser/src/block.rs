use std::sync::Arc;

use uisl_core::{
    Command, ElsifBranch, IfCommand, Location, MethodCommand, MethodParameter, ValueCommand,
    WhileCommand,
};

/// Which branch of an open `if` receives the next command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IfSection {
    Then,
    Elsif,
    Else,
}

#[derive(Debug)]
pub(crate) struct IfBuilder {
    condition: ValueCommand,
    location: Option<Location>,
    then_commands: Vec<Command>,
    elsifs: Vec<ElsifBranch>,
    else_commands: Option<Vec<Command>>,
    section: IfSection,
}

/// One construct that is currently open during parsing. The builder owns
/// its accumulated children until it is closed and handed to its parent.
#[derive(Debug)]
pub(crate) enum OpenBlock {
    Method {
        name: String,
        parameters: Vec<MethodParameter>,
        commands: Vec<Command>,
    },
    While {
        condition: ValueCommand,
        commands: Vec<Command>,
        location: Option<Location>,
    },
    If(IfBuilder),
}

/// Stack of open blocks shared by both front ends: the textual parser pushes
/// and closes on keywords (`def`/`if`/`while` ... `end`), the XML parser on
/// element open/close.
#[derive(Debug, Default)]
pub(crate) struct BlockStack {
    blocks: Vec<OpenBlock>,
}

impl BlockStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn push_method(&mut self, name: impl Into<String>, parameters: Vec<MethodParameter>) {
        self.blocks.push(OpenBlock::Method {
            name: name.into(),
            parameters,
            commands: Vec::new(),
        });
    }

    pub fn push_while(&mut self, condition: ValueCommand, location: Option<Location>) {
        self.blocks.push(OpenBlock::While {
            condition,
            commands: Vec::new(),
            location,
        });
    }

    pub fn push_if(&mut self, condition: ValueCommand, location: Option<Location>) {
        self.blocks.push(OpenBlock::If(IfBuilder {
            condition,
            location,
            then_commands: Vec::new(),
            elsifs: Vec::new(),
            else_commands: None,
            section: IfSection::Then,
        }));
    }

    /// Adds a declared parameter to the innermost open `def`.
    pub fn add_parameter(&mut self, parameter: MethodParameter) -> Result<(), String> {
        match self.blocks.last_mut() {
            Some(OpenBlock::Method { parameters, .. }) => {
                if parameters.iter().any(|existing| existing.name == parameter.name) {
                    return Err(format!(
                        "parameter '{}' declared more than once",
                        parameter.name
                    ));
                }
                parameters.push(parameter);
                Ok(())
            }
            _ => Err("parameter declaration outside a def".to_string()),
        }
    }

    pub fn begin_then(&mut self) -> Result<(), String> {
        match self.blocks.last_mut() {
            Some(OpenBlock::If(builder)) => {
                builder.section = IfSection::Then;
                Ok(())
            }
            _ => Err("then should be inside an if".to_string()),
        }
    }

    pub fn begin_elsif(
        &mut self,
        condition: ValueCommand,
        location: Option<Location>,
    ) -> Result<(), String> {
        match self.blocks.last_mut() {
            Some(OpenBlock::If(builder)) => {
                if builder.else_commands.is_some() {
                    return Err("elsif after else".to_string());
                }
                builder.elsifs.push(ElsifBranch {
                    condition,
                    commands: Vec::new(),
                    location,
                });
                builder.section = IfSection::Elsif;
                Ok(())
            }
            _ => Err("elsif should be inside an if".to_string()),
        }
    }

    pub fn begin_else(&mut self) -> Result<(), String> {
        match self.blocks.last_mut() {
            Some(OpenBlock::If(builder)) => {
                if builder.else_commands.is_some() {
                    return Err("duplicate else".to_string());
                }
                builder.else_commands = Some(Vec::new());
                builder.section = IfSection::Else;
                Ok(())
            }
            _ => Err("else should be inside an if".to_string()),
        }
    }

    /// Appends a command to the innermost open block, or hands it back when
    /// no block is open so the caller can route it to the context.
    pub fn add_command(&mut self, command: Command) -> Option<Command> {
        match self.blocks.last_mut() {
            None => Some(command),
            Some(OpenBlock::Method { commands, .. }) | Some(OpenBlock::While { commands, .. }) => {
                commands.push(command);
                None
            }
            Some(OpenBlock::If(builder)) => {
                let target = match builder.section {
                    IfSection::Then => &mut builder.then_commands,
                    IfSection::Elsif => match builder.elsifs.last_mut() {
                        Some(branch) => &mut branch.commands,
                        None => &mut builder.then_commands,
                    },
                    IfSection::Else => match builder.else_commands.as_mut() {
                        Some(commands) => commands,
                        None => &mut builder.then_commands,
                    },
                };
                target.push(command);
                None
            }
        }
    }

    /// Closes the innermost open block and returns the completed command.
    pub fn close(&mut self, source_file: Option<&str>) -> Result<Command, String> {
        match self.blocks.pop() {
            None => Err("end without an open block".to_string()),
            Some(OpenBlock::Method {
                name,
                parameters,
                commands,
            }) => Ok(Command::MethodScript(Arc::new(MethodCommand::script(
                name,
                parameters,
                commands,
                source_file.map(|file| file.to_string()),
            )))),
            Some(OpenBlock::While {
                condition,
                commands,
                location,
            }) => Ok(Command::While(WhileCommand {
                condition,
                commands,
                location,
            })),
            Some(OpenBlock::If(builder)) => Ok(Command::If(IfCommand {
                condition: builder.condition,
                then_commands: builder.then_commands,
                elsifs: builder.elsifs,
                else_commands: builder.else_commands,
                location: builder.location,
            })),
        }
    }
}
