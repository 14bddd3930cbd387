//! Definition Loading
//!
//! Reads record and enum definitions from disk (following imports),
//! loads static size tables and binds the compiled native library whose
//! `<TypeName>_size` accessors are the authoritative layout sizes.

pub mod errors;
pub mod native;
pub mod resolver;
pub mod sizes;

pub use errors::LoaderError;
pub use native::NativeLibrary;
pub use resolver::{load_definitions, DefinitionLoader};
pub use sizes::load_size_table;

// Re-export the definition types for convenience
pub use cstruct_types;
