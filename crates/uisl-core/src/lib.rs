pub mod command;
pub mod context;
pub mod error;
pub mod eval;
pub mod location;
pub mod value;

pub use command::*;
pub use context::*;
pub use error::{ParseError, ScriptError, Severity};
pub use eval::ExpressionEvaluator;
pub use location::Location;
pub use value::*;
