use std::collections::BTreeMap;

use crate::error::ScriptError;
use crate::value::Value;

/// Delegated general-purpose expression evaluation. The grammar of the
/// expression text is owned by the concrete evaluator, not by this core;
/// the core only fixes the binding and result conversion contract.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluates `expression` with the given visible variable bindings.
    /// The result must already be converted into a `Value` via the fixed
    /// total mapping; a result outside that mapping is an error.
    fn evaluate(
        &self,
        bindings: &BTreeMap<String, Value>,
        expression: &str,
    ) -> Result<Value, ScriptError>;
}
