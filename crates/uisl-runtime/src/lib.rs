pub mod eval;
pub mod native;
pub mod player;

pub use eval::RhaiEvaluator;
pub use native::register_builtin_natives;
pub use player::{CommandObserver, Player, PlayerError, DEFAULT_COMMAND_INTERVAL};
