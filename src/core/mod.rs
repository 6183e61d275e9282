mod engine;
mod parser;
mod generator;
mod formatter;

// Ruby front end
mod languages;
mod extractor;
mod macros;

// Type lookups and declaration synthesis
mod env;
mod method_resolver;
mod mixin;
mod declaration;
mod namespace;

pub use namespace::Namespace;

// Export the main engine
pub use engine::{Engine, GenerateOptions};
