//! Record Definitions
//!
//! Pure data structures describing C-compatible records, their fields and
//! the enumerations they reference. Layout and marshalling live elsewhere.

pub mod types;

pub use types::*;
