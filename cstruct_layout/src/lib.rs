/* Record Layout Library
 *
 * Turns declarative field tables into concrete, byte-exact record layouts
 * and checks those layouts against the sizes reported by the native library.
 */

pub mod errors;
pub mod probe;
pub mod resolved;

pub use errors::{AbiSkewError, ConfigError};
pub use probe::{
  authoritative_size, check_rationality, probe_or_default, size_symbol, NoProbe, SizeProbe, SizeTable,
  DEFAULT_PROBE_SIZE,
};
pub use resolved::*;
