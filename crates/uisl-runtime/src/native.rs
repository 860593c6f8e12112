use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bigdecimal::ToPrimitive;
use tracing::info;
use uisl_core::{
    CommandSymbol, ExecutionContext, MethodCommand, MethodParameter, NativeMethod, NativeOutcome,
    ScriptError, Type, Value,
};

fn argument<'a>(
    args: &'a BTreeMap<String, Value>,
    name: &str,
) -> Result<&'a Value, ScriptError> {
    args.get(name).ok_or_else(|| {
        ScriptError::new(
            "EXEC_ARG_MISSING",
            format!("Missing argument \"{}\".", name),
        )
    })
}

/// `assert expected, actual` — execution fault when the two display forms
/// differ.
pub struct AssertNative;

impl NativeMethod for AssertNative {
    fn call(
        &self,
        _context: &mut ExecutionContext,
        args: &BTreeMap<String, Value>,
    ) -> Result<NativeOutcome, ScriptError> {
        let expected = argument(args, "expected")?;
        let actual = argument(args, "actual")?;
        if expected != actual {
            return Err(ScriptError::new(
                "EXEC_ASSERT_FAILED",
                format!("Expected \"{}\", got \"{}\".", expected, actual),
            ));
        }
        Ok(NativeOutcome::Value(Value::Nil))
    }
}

/// `print value` — echoes through the log.
pub struct PrintNative;

impl NativeMethod for PrintNative {
    fn call(
        &self,
        context: &mut ExecutionContext,
        args: &BTreeMap<String, Value>,
    ) -> Result<NativeOutcome, ScriptError> {
        let value = argument(args, "value")?;
        info!(
            test_case = context.test_case.as_deref().unwrap_or("-"),
            "{}", value
        );
        Ok(NativeOutcome::Value(Value::Nil))
    }
}

/// `pause ms` — blocks the single execution worker for the given number of
/// milliseconds.
pub struct PauseNative;

impl NativeMethod for PauseNative {
    fn call(
        &self,
        _context: &mut ExecutionContext,
        args: &BTreeMap<String, Value>,
    ) -> Result<NativeOutcome, ScriptError> {
        let ms = argument(args, "ms")?;
        let millis = ms
            .as_number()
            .and_then(|number| number.to_u64())
            .ok_or_else(|| {
                ScriptError::new(
                    "EXEC_ARG_TYPE",
                    format!("pause expects a non-negative number of milliseconds, got \"{}\".", ms),
                )
            })?;
        thread::sleep(Duration::from_millis(millis));
        Ok(NativeOutcome::Value(Value::Nil))
    }
}

/// `exit` — aborts the whole suite via the EXIT flow signal.
pub struct ExitNative;

impl NativeMethod for ExitNative {
    fn call(
        &self,
        _context: &mut ExecutionContext,
        _args: &BTreeMap<String, Value>,
    ) -> Result<NativeOutcome, ScriptError> {
        Ok(NativeOutcome::Exit)
    }
}

/// Registers the built-in procedures into a prototype context, before
/// parsing, so scripts can call them like any user-defined procedure.
/// String-typed parameters accept any value (coerced to its display form
/// at the call site); `pause` declares a number so XML sources coerce it
/// correctly.
pub fn register_builtin_natives(context: &mut ExecutionContext) {
    let natives: [(&str, Vec<MethodParameter>, Arc<dyn NativeMethod>); 4] = [
        (
            "assert",
            vec![
                MethodParameter::typed("expected", Type::String),
                MethodParameter::typed("actual", Type::String),
            ],
            Arc::new(AssertNative),
        ),
        (
            "print",
            vec![MethodParameter::typed("value", Type::String)],
            Arc::new(PrintNative),
        ),
        (
            "pause",
            vec![MethodParameter::typed("ms", Type::Number)],
            Arc::new(PauseNative),
        ),
        ("exit", Vec::new(), Arc::new(ExitNative)),
    ];
    for (name, parameters, handler) in natives {
        context.add_symbol(CommandSymbol::Method(Arc::new(MethodCommand::native(
            name, parameters, handler,
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn builtins_register_as_native_methods() {
        let mut context = ExecutionContext::new();
        register_builtin_natives(&mut context);
        for name in ["assert", "print", "pause", "exit"] {
            let method = context.find_method(name).expect("builtin should register");
            assert!(method.is_native());
        }
    }

    #[test]
    fn assert_faults_on_mismatch_only() {
        let mut context = ExecutionContext::new();
        let ok = AssertNative.call(
            &mut context,
            &args(&[
                ("expected", Value::String("5".to_string())),
                ("actual", Value::String("5".to_string())),
            ]),
        );
        assert!(ok.is_ok());

        let error = AssertNative
            .call(
                &mut context,
                &args(&[
                    ("expected", Value::String("5".to_string())),
                    ("actual", Value::String("6".to_string())),
                ]),
            )
            .expect_err("mismatch should fault");
        assert_eq!(error.code, "EXEC_ASSERT_FAILED");
    }

    #[test]
    fn exit_signals_the_exit_flow() {
        let mut context = ExecutionContext::new();
        let outcome = ExitNative
            .call(&mut context, &BTreeMap::new())
            .expect("exit should not fault");
        assert_eq!(outcome, NativeOutcome::Exit);
    }

    #[test]
    fn pause_rejects_non_numeric_durations() {
        let mut context = ExecutionContext::new();
        let error = PauseNative
            .call(&mut context, &args(&[("ms", Value::Boolean(true))]))
            .expect_err("boolean duration should fault");
        assert_eq!(error.code, "EXEC_ARG_TYPE");
    }
}
