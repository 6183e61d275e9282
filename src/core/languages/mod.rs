//! Language front-ends
//!
//! Only Ruby sources carry the macros the generator understands.

mod ruby;

pub use ruby::RubyParser;
