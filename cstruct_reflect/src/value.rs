use crate::record::{Record, RecordArray, RecordView};
use indexmap::IndexMap;
use std::fmt;

/// A named member of an enumeration together with its integer value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub enum_name: String,
    pub variant: String,
    pub value: i64,
}

impl EnumValue {
    pub fn new(enum_name: impl Into<String>, variant: impl Into<String>, value: i64) -> Self {
        Self {
            enum_name: enum_name.into(),
            variant: variant.into(),
            value,
        }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.variant)
    }
}

/// Target of a pointer field. Always borrowed: the record holding the pointer
/// never extends the pointee's lifetime, the borrow checker does.
#[derive(Debug, Clone, Copy)]
pub enum Pointee<'a> {
    Bytes(&'a [u8]),
    Record(&'a Record<'a>),
    Records(&'a RecordArray<'a>),
}

impl<'a> Pointee<'a> {
    /// Address written into the pointer slot.
    pub fn address(&self) -> u64 {
        match self {
            Pointee::Bytes(bytes) => bytes.as_ptr() as usize as u64,
            Pointee::Record(record) => record.as_bytes().as_ptr() as usize as u64,
            Pointee::Records(records) => records.as_bytes().as_ptr() as usize as u64,
        }
    }

    pub fn byte_len(&self) -> u64 {
        match self {
            Pointee::Bytes(bytes) => bytes.len() as u64,
            Pointee::Record(record) => record.as_bytes().len() as u64,
            Pointee::Records(records) => records.as_bytes().len() as u64,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Pointee::Bytes(_) => "pointer to bytes",
            Pointee::Record(_) => "pointer to record",
            Pointee::Records(_) => "pointer to record array",
        }
    }
}

impl<'a> From<&'a [u8]> for Pointee<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Pointee::Bytes(bytes)
    }
}

impl<'a> From<&'a Record<'a>> for Pointee<'a> {
    fn from(record: &'a Record<'a>) -> Self {
        Pointee::Record(record)
    }
}

impl<'a> From<&'a RecordArray<'a>> for Pointee<'a> {
    fn from(records: &'a RecordArray<'a>) -> Self {
        Pointee::Records(records)
    }
}

/// A value supplied by the caller when building or updating a record.
#[derive(Debug, Clone)]
pub enum HostValue<'a> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Enum(EnumValue),
    List(Vec<HostValue<'a>>),
    Map(IndexMap<String, HostValue<'a>>),
    Record(Record<'a>),
    Pointer(Pointee<'a>),
}

impl<'a> HostValue<'a> {
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, HostValue<'a>)>) -> Self {
        HostValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn list(items: impl IntoIterator<Item = HostValue<'a>>) -> Self {
        HostValue::List(items.into_iter().collect())
    }

    pub fn pointer(pointee: impl Into<Pointee<'a>>) -> Self {
        HostValue::Pointer(pointee.into())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::UInt(_) => "uint",
            HostValue::Float(_) => "float",
            HostValue::Text(_) => "text",
            HostValue::Bytes(_) => "bytes",
            HostValue::Enum(_) => "enum",
            HostValue::List(_) => "list",
            HostValue::Map(_) => "map",
            HostValue::Record(_) => "record",
            HostValue::Pointer(pointee) => pointee.kind_name(),
        }
    }
}

macro_rules! host_value_from_int {
    ($variant:ident, $target:ty, $($t:ty),*) => {
        $(
            impl<'a> From<$t> for HostValue<'a> {
                fn from(value: $t) -> Self {
                    HostValue::$variant(value as $target)
                }
            }
        )*
    };
}

host_value_from_int!(Int, i64, i8, i16, i32, i64);
host_value_from_int!(UInt, u64, u8, u16, u32, u64, usize);

impl<'a> From<bool> for HostValue<'a> {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl<'a> From<f32> for HostValue<'a> {
    fn from(value: f32) -> Self {
        HostValue::Float(value as f64)
    }
}

impl<'a> From<f64> for HostValue<'a> {
    fn from(value: f64) -> Self {
        HostValue::Float(value)
    }
}

impl<'a> From<&str> for HostValue<'a> {
    fn from(value: &str) -> Self {
        HostValue::Text(value.to_string())
    }
}

impl<'a> From<String> for HostValue<'a> {
    fn from(value: String) -> Self {
        HostValue::Text(value)
    }
}

impl<'a> From<Vec<u8>> for HostValue<'a> {
    fn from(value: Vec<u8>) -> Self {
        HostValue::Bytes(value)
    }
}

impl<'a> From<Vec<HostValue<'a>>> for HostValue<'a> {
    fn from(value: Vec<HostValue<'a>>) -> Self {
        HostValue::List(value)
    }
}

impl<'a> From<IndexMap<String, HostValue<'a>>> for HostValue<'a> {
    fn from(value: IndexMap<String, HostValue<'a>>) -> Self {
        HostValue::Map(value)
    }
}

impl<'a> From<EnumValue> for HostValue<'a> {
    fn from(value: EnumValue) -> Self {
        HostValue::Enum(value)
    }
}

impl<'a> From<Record<'a>> for HostValue<'a> {
    fn from(value: Record<'a>) -> Self {
        HostValue::Record(value)
    }
}

impl<'a> From<Pointee<'a>> for HostValue<'a> {
    fn from(value: Pointee<'a>) -> Self {
        HostValue::Pointer(value)
    }
}

impl<'a, T: Into<HostValue<'a>>> From<Option<T>> for HostValue<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Null, Into::into)
    }
}

/// Read-only projection of a field as seen through its decode rule.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'r> {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Char(u8),
    Enum(EnumValue),
    Text(String),
    Bytes(&'r [u8]),
    List(Vec<FieldValue<'r>>),
    Record(RecordView<'r>),
    /// A non-null pointer whose target is not known to this process.
    Address(u64),
}

impl<'r> FieldValue<'r> {
    /// Integer view of scalar values, including enums.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            FieldValue::Bool(b) => Some(*b as i128),
            FieldValue::Int(v) => Some(*v as i128),
            FieldValue::UInt(v) => Some(*v as i128),
            FieldValue::Char(c) => Some(*c as i128),
            FieldValue::Enum(e) => Some(e.value as i128),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordView<'r>> {
        match self {
            FieldValue::Record(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue<'r>]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'r [u8]> {
        match self {
            FieldValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}
