/* Human readable and JSON renderings of decoded records */

use crate::iter::FieldEntry;
use crate::record::{Record, RecordView};
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;

const INDENT: &str = "  ";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatOptions {
    #[serde(default, rename = "includeByteOffsets")]
    pub include_byte_offsets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedRecord {
    #[serde(rename = "typeName")]
    pub type_name: String,
    pub value: JsonValue,
    #[serde(rename = "byteRange", skip_serializing_if = "Option::is_none")]
    pub byte_range: Option<ByteRange>,
}

pub fn format_record(view: &RecordView<'_>) -> FormattedRecord {
    format_record_with_options(view, &FormatOptions::default())
}

pub fn format_record_with_options(view: &RecordView<'_>, options: &FormatOptions) -> FormattedRecord {
    FormattedRecord {
        type_name: view.type_name().to_string(),
        value: format_view(view, options),
        byte_range: options.include_byte_offsets.then(|| ByteRange {
            offset: 0,
            size: view.layout().size,
        }),
    }
}

fn format_view(view: &RecordView<'_>, options: &FormatOptions) -> JsonValue {
    let mut fields = Map::new();
    for entry in view.fields() {
        let value = format_value(&entry.value, options);
        let value = if options.include_byte_offsets {
            json!({
                "value": value,
                "byteRange": { "offset": entry.info.field.offset, "size": entry.info.field.size },
            })
        } else {
            value
        };
        fields.insert(entry.name.to_string(), value);
    }
    JsonValue::Object(fields)
}

fn hex_string(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn format_value(value: &FieldValue<'_>, options: &FormatOptions) -> JsonValue {
    match value {
        FieldValue::Null => JsonValue::Null,
        FieldValue::Bool(b) => json!(b),
        FieldValue::Int(v) => json!(v),
        FieldValue::UInt(v) => json!(v),
        FieldValue::Float(v) => json!(v),
        FieldValue::Char(c) => json!((*c as char).to_string()),
        FieldValue::Enum(e) => json!(e.variant),
        FieldValue::Text(text) => json!(text),
        FieldValue::Bytes(bytes) => json!(hex_string(bytes)),
        FieldValue::List(items) => JsonValue::Array(items.iter().map(|item| format_value(item, options)).collect()),
        FieldValue::Record(view) => format_view(view, options),
        FieldValue::Address(address) => json!(format!("0x{:x}", address)),
    }
}

/* Scalar rendering shared by the tree printer */
impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("NULL"),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::UInt(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{:?}", v),
            FieldValue::Char(c) => write!(f, "{:?}", *c as char),
            FieldValue::Enum(e) => write!(f, "{}", e),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::Bytes(bytes) => f.write_str(&hex_string(bytes)),
            FieldValue::Address(address) => write!(f, "0x{:x}", address),
            FieldValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            FieldValue::Record(view) => write_fields(f, view, 1),
        }
    }
}

fn write_fields(f: &mut fmt::Formatter<'_>, view: &RecordView<'_>, level: usize) -> fmt::Result {
    for FieldEntry { name, value, .. } in view.fields() {
        write!(f, "\n{}{} = ", INDENT.repeat(level), name)?;
        write_value(f, &value, level + 1)?;
    }
    Ok(())
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &FieldValue<'_>, level: usize) -> fmt::Result {
    match value {
        FieldValue::Record(view) => write_fields(f, view, level),
        FieldValue::List(items) if items.iter().any(|item| item.as_record().is_some()) => {
            for item in items {
                write!(f, "\n{}", INDENT.repeat(level))?;
                match item {
                    FieldValue::Record(view) => {
                        write!(f, "{} = ", view.type_name())?;
                        write_fields(f, view, level + 1)?;
                    }
                    other => write!(f, "{}", other)?,
                }
            }
            Ok(())
        }
        other => write!(f, "{}", other),
    }
}

impl fmt::Display for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.type_name())?;
        write_fields(f, self, 1)
    }
}

impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.view(), f)
    }
}
