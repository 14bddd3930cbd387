use indexmap::IndexMap;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum IntegralType {
    #[serde(alias = "uint8_t")]
    U8,
    #[serde(alias = "uint16_t")]
    U16,
    #[serde(alias = "uint32_t")]
    U32,
    #[serde(alias = "uint64_t")]
    U64,
    #[serde(alias = "int8_t")]
    I8,
    #[serde(alias = "int16_t")]
    I16,
    #[serde(alias = "int32_t")]
    I32,
    #[serde(alias = "int64_t")]
    I64,
}

impl IntegralType {
    pub fn size(self) -> u64 {
        match self {
            IntegralType::U8 | IntegralType::I8 => 1,
            IntegralType::U16 | IntegralType::I16 => 2,
            IntegralType::U32 | IntegralType::I32 => 4,
            IntegralType::U64 | IntegralType::I64 => 8,
        }
    }

    pub fn bits(self) -> u32 {
        (self.size() * 8) as u32
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntegralType::I8 | IntegralType::I16 | IntegralType::I32 | IntegralType::I64
        )
    }

    /* Unsigned type of the given byte width, used for probe-sized enums */
    pub fn unsigned_of_size(size: u64) -> Option<Self> {
        match size {
            1 => Some(IntegralType::U8),
            2 => Some(IntegralType::U16),
            4 => Some(IntegralType::U32),
            8 => Some(IntegralType::U64),
            _ => None,
        }
    }

    /* Inclusive value range representable by a field of `bits` width of this type */
    pub fn range(self, bits: u32) -> (i128, i128) {
        if self.is_signed() {
            let half = 1i128 << (bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    pub fn c_name(self) -> &'static str {
        match self {
            IntegralType::U8 => "uint8_t",
            IntegralType::U16 => "uint16_t",
            IntegralType::U32 => "uint32_t",
            IntegralType::U64 => "uint64_t",
            IntegralType::I8 => "int8_t",
            IntegralType::I16 => "int16_t",
            IntegralType::I32 => "int32_t",
            IntegralType::I64 => "int64_t",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FloatingPointType {
    F32,
    F64,
}

impl FloatingPointType {
    pub fn size(self) -> u64 {
        match self {
            FloatingPointType::F32 => 4,
            FloatingPointType::F64 => 8,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PrimitiveType {
    Integral(IntegralType),
    FloatingPoint(FloatingPointType),
    Char,
    Bool,
}

impl PrimitiveType {
    /* Look up a primitive by its table name or one of its C spellings */
    pub fn from_name(name: &str) -> Option<Self> {
        use IntegralType::*;
        let prim = match name {
            "u8" | "uint8" | "uint8_t" | "unsigned char" | "byte" => PrimitiveType::Integral(U8),
            "u16" | "uint16" | "uint16_t" | "unsigned short" => PrimitiveType::Integral(U16),
            "u32" | "uint32" | "uint32_t" | "unsigned int" | "uint" => PrimitiveType::Integral(U32),
            "u64" | "uint64" | "uint64_t" | "unsigned long long" => PrimitiveType::Integral(U64),
            "i8" | "int8" | "int8_t" | "signed char" => PrimitiveType::Integral(I8),
            "i16" | "int16" | "int16_t" | "short" => PrimitiveType::Integral(I16),
            "i32" | "int32" | "int32_t" | "int" => PrimitiveType::Integral(I32),
            "i64" | "int64" | "int64_t" | "long long" => PrimitiveType::Integral(I64),
            "f32" | "float" => PrimitiveType::FloatingPoint(FloatingPointType::F32),
            "f64" | "double" => PrimitiveType::FloatingPoint(FloatingPointType::F64),
            "char" => PrimitiveType::Char,
            "bool" | "_Bool" => PrimitiveType::Bool,
            _ => return None,
        };
        Some(prim)
    }

    pub fn size(self) -> u64 {
        match self {
            PrimitiveType::Integral(int_type) => int_type.size(),
            PrimitiveType::FloatingPoint(float_type) => float_type.size(),
            PrimitiveType::Char | PrimitiveType::Bool => 1,
        }
    }

    pub fn alignment(self) -> u64 {
        self.size()
    }

    pub fn c_name(self) -> &'static str {
        match self {
            PrimitiveType::Integral(int_type) => int_type.c_name(),
            PrimitiveType::FloatingPoint(FloatingPointType::F32) => "float",
            PrimitiveType::FloatingPoint(FloatingPointType::F64) => "double",
            PrimitiveType::Char => "char",
            PrimitiveType::Bool => "bool",
        }
    }

    pub fn is_byte(self) -> bool {
        matches!(
            self,
            PrimitiveType::Integral(IntegralType::U8) | PrimitiveType::Integral(IntegralType::I8)
        )
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Integral(IntegralType::U8) => "u8",
            PrimitiveType::Integral(IntegralType::U16) => "u16",
            PrimitiveType::Integral(IntegralType::U32) => "u32",
            PrimitiveType::Integral(IntegralType::U64) => "u64",
            PrimitiveType::Integral(IntegralType::I8) => "i8",
            PrimitiveType::Integral(IntegralType::I16) => "i16",
            PrimitiveType::Integral(IntegralType::I32) => "i32",
            PrimitiveType::Integral(IntegralType::I64) => "i64",
            PrimitiveType::FloatingPoint(FloatingPointType::F32) => "f32",
            PrimitiveType::FloatingPoint(FloatingPointType::F64) => "f64",
            PrimitiveType::Char => "char",
            PrimitiveType::Bool => "bool",
        };
        f.write_str(name)
    }
}

impl FromStr for PrimitiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrimitiveType::from_name(s).ok_or_else(|| format!("'{}' is not a primitive type", s))
    }
}

/* Type tag of a field: a name (primitive, enum or record) or a pointer to one */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum FieldType {
    Pointer { pointer: Box<FieldType> },
    Named(String),
}

impl FieldType {
    pub fn named(name: impl Into<String>) -> Self {
        FieldType::Named(name.into())
    }

    pub fn pointer_to(name: impl Into<String>) -> Self {
        FieldType::Pointer {
            pointer: Box::new(FieldType::Named(name.into())),
        }
    }
}

/* Optional length-or-tag of a field */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum LengthSpec {
    Count(u64),
    Reference(String),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<LengthSpec>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_mapping: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            length: None,
            enum_mapping: None,
            bits: None,
        }
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.length = Some(LengthSpec::Count(count));
        self
    }

    pub fn with_length_ref(mut self, reference: impl Into<String>) -> Self {
        self.length = Some(LengthSpec::Reference(reference.into()));
        self
    }

    pub fn with_enum(mut self, enum_name: impl Into<String>) -> Self {
        self.enum_mapping = Some(enum_name.into());
        self
    }

    pub fn with_bits(mut self, bits: u32) -> Self {
        self.bits = Some(bits);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    #[default]
    Struct,
    Union,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ContainerAttributes {
    #[serde(default)]
    pub packed: bool,
    #[serde(default)]
    pub aligned: u64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct TaggedSelector {
    /* Field of the enclosing record whose value picks the member */
    pub selector: String,
    pub cases: BTreeMap<i64, String>,
}

/* Routing rule for a union-typed field, declared on the enclosing record */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub enum UnionSelector {
    Fixed(String),
    Tagged(TaggedSelector),
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RecordDef {
    pub name: String,
    #[serde(default)]
    pub kind: RecordKind,
    #[serde(flatten)]
    pub container_attributes: ContainerAttributes,
    #[serde(default)]
    pub fields: Option<Vec<FieldDef>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub anonymous: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "IndexMap::is_empty",
        with = "serde_yml::with::singleton_map_recursive"
    )]
    pub selectors: IndexMap<String, UnionSelector>,
    /* Authoritative size; takes priority over the native probe */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_name: Option<String>,
}

impl RecordDef {
    pub fn structure(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self::with_kind(name, RecordKind::Struct, fields)
    }

    pub fn union(name: impl Into<String>, fields: Vec<FieldDef>) -> Self {
        Self::with_kind(name, RecordKind::Union, fields)
    }

    fn with_kind(name: impl Into<String>, kind: RecordKind, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            kind,
            container_attributes: ContainerAttributes::default(),
            fields: Some(fields),
            anonymous: Vec::new(),
            selectors: IndexMap::new(),
            size: None,
            c_name: None,
        }
    }

    pub fn packed(mut self) -> Self {
        self.container_attributes.packed = true;
        self
    }

    pub fn with_anonymous(mut self, field: impl Into<String>) -> Self {
        self.anonymous.push(field.into());
        self
    }

    pub fn with_selector(mut self, field: impl Into<String>, selector: UnionSelector) -> Self {
        self.selectors.insert(field.into(), selector);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct EnumDef {
    pub name: String,
    /* Storage width; when absent it is probed from the native library */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repr: Option<IntegralType>,
    pub variants: IndexMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl EnumDef {
    pub fn new<N: Into<String>>(name: impl Into<String>, variants: impl IntoIterator<Item = (N, i64)>) -> Self {
        Self {
            name: name.into(),
            repr: None,
            variants: variants.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            comment: None,
        }
    }

    pub fn with_repr(mut self, repr: IntegralType) -> Self {
        self.repr = Some(repr);
        self
    }

    /* Number of distinct values; aliases do not count */
    pub fn cardinality(&self) -> u64 {
        self.variants.values().collect::<BTreeSet<_>>().len() as u64
    }

    /* Canonical (first declared) variant name for a value */
    pub fn variant_name(&self, value: i64) -> Option<&str> {
        self.variants
            .iter()
            .find(|(_, v)| **v == value)
            .map(|(name, _)| name.as_str())
    }

    pub fn value_of(&self, variant: &str) -> Option<i64> {
        self.variants.get(variant).copied()
    }
}

/* One definition file as stored on disk */
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct DefinitionFile {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enums: Vec<EnumDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<RecordDef>,
}

impl DefinitionFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }
}
