/* Record Reflection Library
 *
 * Runtime instances of resolved record types: host values are coerced into
 * a byte-exact C image, fields are decoded back through the rule chosen at
 * resolution time, and any instance can be printed or emitted as C source.
 */

mod coerce;
pub mod context;
mod decode;
pub mod emit;
pub mod errors;
pub mod formatter;
pub mod iter;
pub mod record;
pub mod value;

pub use context::Context;
pub use emit::{CEmitter, NameRegistry};
pub use errors::{CoercionError, ReflectError, ReflectResult};
pub use formatter::{format_record, format_record_with_options, FormatOptions, FormattedRecord};
pub use iter::{FieldEntry, Fields, TypeInfo};
pub use record::{Record, RecordArray, RecordView};
pub use value::{EnumValue, FieldValue, HostValue, Pointee};
