use std::collections::BTreeMap;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::NaiveDate;
use rhai::{Dynamic, Engine, ImmutableString, Scope, FLOAT, INT};
use uisl_core::{ExpressionEvaluator, ScriptError, Value, DATE_FORMAT};

/// Delegated expression evaluator backed by an embedded rhai engine.
///
/// Each evaluation runs in a fresh engine with strict variables: the only
/// names visible to the expression are the bindings pushed from the
/// ExecutionContext. The expression is wrapped in parentheses so statement
/// syntax cannot sneak in.
#[derive(Debug, Default)]
pub struct RhaiEvaluator;

impl RhaiEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(
        &self,
        bindings: &BTreeMap<String, Value>,
        expression: &str,
    ) -> Result<Value, ScriptError> {
        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_dynamic(name.clone(), value_to_dynamic(value)?);
        }

        let mut engine = Engine::new();
        engine.set_strict_variables(true);
        register_date_support(&mut engine);

        let source = format!("({})", expression);
        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, &source)
            .map_err(|error| {
                ScriptError::new(
                    "EVAL_ERROR",
                    format!("Expression \"{}\" failed: {}", expression, error),
                )
            })?;
        dynamic_to_value(result)
    }
}

/// Dates travel through rhai as an opaque custom type; the engine only
/// needs comparison operators and a display form for them.
fn register_date_support(engine: &mut Engine) {
    engine.register_fn("==", |a: NaiveDate, b: NaiveDate| a == b);
    engine.register_fn("!=", |a: NaiveDate, b: NaiveDate| a != b);
    engine.register_fn("<", |a: NaiveDate, b: NaiveDate| a < b);
    engine.register_fn("<=", |a: NaiveDate, b: NaiveDate| a <= b);
    engine.register_fn(">", |a: NaiveDate, b: NaiveDate| a > b);
    engine.register_fn(">=", |a: NaiveDate, b: NaiveDate| a >= b);
    engine.register_fn("to_string", |a: NaiveDate| {
        a.format(DATE_FORMAT).to_string()
    });
}

/// Pushes a Value into rhai. Integral Numbers become rhai integers so that
/// integer arithmetic and comparisons behave naturally; everything else
/// falls back to float.
pub(crate) fn value_to_dynamic(value: &Value) -> Result<Dynamic, ScriptError> {
    match value {
        Value::Boolean(value) => Ok(Dynamic::from_bool(*value)),
        Value::Number(number) => {
            if number.is_integer() {
                if let Some(int) = number.to_i64() {
                    return Ok(Dynamic::from_int(int as INT));
                }
            }
            let float = number.to_f64().ok_or_else(|| {
                ScriptError::new(
                    "EVAL_CONVERSION",
                    format!("Number {} cannot be passed to the evaluator.", number),
                )
            })?;
            Ok(Dynamic::from_float(float as FLOAT))
        }
        Value::String(value) => Ok(Dynamic::from(value.clone())),
        Value::Date(date) => Ok(Dynamic::from(*date)),
        Value::Nil => Ok(Dynamic::UNIT),
    }
}

/// Fixed total mapping from evaluator results back into Values; a result
/// outside the mapping is an unrecoverable conversion failure.
pub(crate) fn dynamic_to_value(value: Dynamic) -> Result<Value, ScriptError> {
    if value.is_unit() {
        return Ok(Value::Nil);
    }
    if value.is::<bool>() {
        return Ok(Value::Boolean(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(Value::Number(BigDecimal::from(value.cast::<INT>() as i64)));
    }
    if value.is::<FLOAT>() {
        let float = value.cast::<FLOAT>() as f64;
        let number = BigDecimal::from_f64(float).ok_or_else(|| {
            ScriptError::new(
                "EVAL_CONVERSION",
                format!("Evaluator returned a non-finite number ({}).", float),
            )
        })?;
        return Ok(Value::Number(number.normalized()));
    }
    if value.is::<ImmutableString>() {
        return Ok(Value::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<NaiveDate>() {
        return Ok(Value::Date(value.cast::<NaiveDate>()));
    }
    Err(ScriptError::new(
        "EVAL_CONVERSION",
        format!("Evaluator returned an unsupported {} value.", value.type_name()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(bindings: &BTreeMap<String, Value>, expression: &str) -> Result<Value, ScriptError> {
        RhaiEvaluator::new().evaluate(bindings, expression)
    }

    fn date(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, DATE_FORMAT).expect("test date should parse")
    }

    #[test]
    fn integer_arithmetic_yields_numbers() {
        let value = eval(&BTreeMap::new(), "1 + 2 * 3").expect("expression should evaluate");
        assert_eq!(value, Value::Number(BigDecimal::from(7)));
    }

    #[test]
    fn bindings_are_visible_to_the_expression() {
        let mut bindings = BTreeMap::new();
        bindings.insert("name".to_string(), Value::String("Ann".to_string()));
        let value = eval(&bindings, "\"hi \" + name").expect("expression should evaluate");
        assert_eq!(value, Value::String("hi Ann".to_string()));
    }

    #[test]
    fn unknown_variables_fail_under_strict_mode() {
        let error = eval(&BTreeMap::new(), "missing + 1").expect_err("unknown variable should fail");
        assert_eq!(error.code, "EVAL_ERROR");
    }

    #[test]
    fn comparisons_yield_booleans() {
        let mut bindings = BTreeMap::new();
        bindings.insert("n".to_string(), Value::Number(BigDecimal::from(5)));
        let value = eval(&bindings, "n < 10").expect("expression should evaluate");
        assert_eq!(value, Value::Boolean(true));
    }

    #[test]
    fn dates_compare_through_registered_operators() {
        let mut bindings = BTreeMap::new();
        bindings.insert("start".to_string(), Value::Date(date("2021-01-01")));
        bindings.insert("stop".to_string(), Value::Date(date("2021-12-31")));
        let value = eval(&bindings, "start < stop").expect("expression should evaluate");
        assert_eq!(value, Value::Boolean(true));
    }

    #[test]
    fn unit_results_map_to_nil() {
        let value = eval(&BTreeMap::new(), "()").expect("expression should evaluate");
        assert_eq!(value, Value::Nil);
    }

    #[test]
    fn number_round_trip_preserves_integral_values() {
        let mut bindings = BTreeMap::new();
        bindings.insert(
            "n".to_string(),
            Value::number_from_str("100").expect("number should parse"),
        );
        let value = eval(&bindings, "n").expect("expression should evaluate");
        assert_eq!(value, Value::Number(BigDecimal::from(100)));
    }
}
