use uisl_core::{quote, Command, MethodBody, TestSuite, ValueCommand};

const INDENT: &str = "  ";

struct DslWriter {
    out: String,
    level: usize,
}

impl DslWriter {
    fn new() -> Self {
        Self {
            out: String::new(),
            level: 0,
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.level {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn block(&mut self, open: &str, commands: &[Command]) {
        self.line(open);
        self.nested(commands);
        self.line("end");
    }

    fn nested(&mut self, commands: &[Command]) {
        self.level += 1;
        for command in commands {
            self.command(command);
        }
        self.level -= 1;
    }

    /// Exhaustive over the Command variants; adding a variant without a
    /// textual form fails compilation here rather than at run time.
    fn command(&mut self, command: &Command) {
        match command {
            Command::Set(set) => {
                self.line(&format!("set {} = {}", set.variable, value_text(&set.value)));
            }
            Command::Inc(inc) => self.line(&format!("inc {}", inc.variable)),
            Command::If(if_command) => {
                self.line(&format!("if {}", value_text(&if_command.condition)));
                self.nested(&if_command.then_commands);
                for elsif in &if_command.elsifs {
                    self.line(&format!("elsif {}", value_text(&elsif.condition)));
                    self.nested(&elsif.commands);
                }
                if let Some(else_commands) = &if_command.else_commands {
                    self.line("else");
                    self.nested(else_commands);
                }
                self.line("end");
            }
            Command::While(while_command) => {
                self.block(
                    &format!("while {}", value_text(&while_command.condition)),
                    &while_command.commands,
                );
            }
            Command::Break(_) => self.line("break"),
            Command::MethodCall(call) => {
                // Anonymous (recorded placeholder) calls have no textual form.
                if call.method.is_empty() {
                    return;
                }
                if call.arguments.is_empty() {
                    self.line(&call.method);
                } else {
                    let arguments: Vec<String> = call
                        .arguments
                        .iter()
                        .map(|(_, value)| value_text(value))
                        .collect();
                    self.line(&format!("{} {}", call.method, arguments.join(", ")));
                }
            }
            Command::MethodScript(method) => {
                // Native procedures are opaque leaves with no body to emit.
                let MethodBody::Script { commands, .. } = &method.body else {
                    return;
                };
                if method.name.is_empty() {
                    return;
                }
                let parameters: Vec<&str> = method
                    .parameters
                    .iter()
                    .map(|parameter| parameter.name.as_str())
                    .collect();
                self.block(
                    &format!("def {}({})", method.name, parameters.join(", ")),
                    commands,
                );
            }
        }
    }
}

fn value_text(value: &ValueCommand) -> String {
    match value {
        ValueCommand::Literal { value, .. } => value.to_dsl_literal(),
        ValueCommand::VarRef { name, .. } => name.clone(),
        ValueCommand::Expression { expression, .. } => expression.clone(),
    }
}

/// Emits a top-level command list as textual DSL. Deterministic: the same
/// tree always produces byte-identical output.
pub fn serialize_commands(commands: &[Command]) -> String {
    let mut writer = DslWriter::new();
    for command in commands {
        writer.command(command);
    }
    writer.out
}

/// Emits a whole suite, including the `suite` and `test_case` lines the
/// textual front end accepts. Suite-level declarations come out between the
/// `suite` line and the first `test_case`, where both front ends accept them.
pub fn serialize_suite(suite: &TestSuite) -> String {
    let mut writer = DslWriter::new();
    writer.line(&format!("suite {}", quote(&suite.name)));
    for command in &suite.commands {
        writer.command(command);
    }
    for case in &suite.test_cases {
        writer.line(&format!("test_case {}", quote(&case.name)));
        for command in case.context.commands() {
            writer.command(command);
        }
    }
    writer.out
}
