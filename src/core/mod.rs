// Core engine: mapping descriptions, output model, identity cache, and the interpreter.
pub mod class;
pub mod error;
pub mod identity;
pub mod interpret;
pub mod mapped;
pub mod mapping;
pub mod resolver;
