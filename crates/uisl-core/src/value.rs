use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ScriptError;

/// Fixed textual format for date literals, used by both front ends, the
/// serializer and value display.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Declared type of a method parameter. Only the XML front end requires
/// these: attribute values are untyped strings and must be coerced
/// deterministically. The textual DSL infers types from literal syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    String,
    Number,
    Boolean,
    Date,
    Nil,
}

impl Type {
    pub fn parse(name: &str) -> Option<Type> {
        match name {
            "string" => Some(Type::String),
            "number" => Some(Type::Number),
            "boolean" => Some(Type::Boolean),
            "date" => Some(Type::Date),
            "nil" => Some(Type::Nil),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Type::String => "string",
            Type::Number => "number",
            Type::Boolean => "boolean",
            Type::Date => "date",
            Type::Nil => "nil",
        }
    }
}

/// Immutable runtime value. Numbers use arbitrary-precision decimals so that
/// literals round-trip through the serializer without floating point loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Number(BigDecimal),
    Boolean(bool),
    Date(NaiveDate),
    Nil,
}

impl Value {
    pub fn number_from_str(text: &str) -> Option<Value> {
        BigDecimal::from_str(text)
            .ok()
            .map(|number| Value::Number(number.normalized()))
    }

    pub fn type_of(&self) -> Type {
        match self {
            Value::String(_) => Type::String,
            Value::Number(_) => Type::Number,
            Value::Boolean(_) => Type::Boolean,
            Value::Date(_) => Type::Date,
            Value::Nil => Type::Nil,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&BigDecimal> {
        match self {
            Value::Number(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Textual DSL literal for this value. Strings are quoted; everything
    /// else uses the display form.
    pub fn to_dsl_literal(&self) -> String {
        match self {
            Value::String(value) => quote(value),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(value) => write!(f, "{}", value),
            Value::Number(value) => write!(f, "{}", value.normalized()),
            Value::Boolean(value) => write!(f, "{}", value),
            Value::Date(value) => write!(f, "{}", value.format(DATE_FORMAT)),
            Value::Nil => write!(f, "nil"),
        }
    }
}

/// Quotes a string for DSL emission, escaping backslashes and quotes.
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Coerces an untyped attribute string into a Value of the declared type.
pub fn coerce_literal(text: &str, ty: Type) -> Result<Value, ScriptError> {
    match ty {
        Type::String => Ok(Value::String(text.to_string())),
        Type::Number => Value::number_from_str(text).ok_or_else(|| {
            ScriptError::new(
                "PARSE_NUMBER_LITERAL",
                format!("Invalid number literal \"{}\".", text),
            )
        }),
        Type::Boolean => match text {
            "true" => Ok(Value::Boolean(true)),
            "false" => Ok(Value::Boolean(false)),
            _ => Err(ScriptError::new(
                "PARSE_BOOLEAN_LITERAL",
                format!("Invalid boolean literal \"{}\".", text),
            )),
        },
        Type::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|error| {
                ScriptError::new(
                    "PARSE_DATE_LITERAL",
                    format!("Invalid date literal \"{}\": {}", text, error),
                )
            }),
        Type::Nil => Ok(Value::Nil),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercing_the_same_text_respects_the_declared_type() {
        let number = coerce_literal("100", Type::Number).expect("number should coerce");
        assert_eq!(number, Value::Number(BigDecimal::from(100)));

        let string = coerce_literal("100", Type::String).expect("string should coerce");
        assert_eq!(string, Value::String("100".to_string()));
    }

    #[test]
    fn number_display_is_canonical() {
        let value = Value::number_from_str("1.50").expect("number should parse");
        assert_eq!(value.to_string(), "1.5");
        let value = Value::number_from_str("100").expect("number should parse");
        assert_eq!(value.to_string(), "100");
    }

    #[test]
    fn date_literals_use_the_fixed_format() {
        let value = coerce_literal("2021-02-28", Type::Date).expect("date should coerce");
        assert_eq!(value.to_string(), "2021-02-28");
        assert!(coerce_literal("28/02/2021", Type::Date).is_err());
    }

    #[test]
    fn invalid_typed_literals_are_errors() {
        assert!(coerce_literal("abc", Type::Number).is_err());
        assert!(coerce_literal("yes", Type::Boolean).is_err());
    }

    #[test]
    fn dsl_literal_quotes_strings_only() {
        assert_eq!(
            Value::String("say \"hi\"".to_string()).to_dsl_literal(),
            "\"say \\\"hi\\\"\""
        );
        assert_eq!(Value::Boolean(true).to_dsl_literal(), "true");
        assert_eq!(Value::Nil.to_dsl_literal(), "nil");
    }

    #[test]
    fn values_serialize_with_a_type_tag() {
        let encoded =
            serde_json::to_value(Value::Boolean(true)).expect("value should serialize");
        assert_eq!(encoded["type"], "boolean");
        assert_eq!(encoded["value"], true);

        let decoded: Value = serde_json::from_value(encoded).expect("value should deserialize");
        assert_eq!(decoded, Value::Boolean(true));
    }

    #[test]
    fn type_names_round_trip() {
        for ty in [Type::String, Type::Number, Type::Boolean, Type::Date, Type::Nil] {
            assert_eq!(Type::parse(ty.name()), Some(ty));
        }
        assert_eq!(Type::parse("decimal"), None);
    }
}
