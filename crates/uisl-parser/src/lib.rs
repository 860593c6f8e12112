mod block;
pub mod loader;
pub mod script;
pub mod serializer;
pub mod xml;
mod xml_tree;

pub use loader::{FsResourceLoader, MapResourceLoader, ResourceLoader};
pub use script::ScriptParser;
pub use serializer::{serialize_commands, serialize_suite};
pub use xml::XmlParser;
