use crate::errors::ConfigError;
use crate::probe::{probe_or_default, SizeProbe};
use cstruct_types::{
  DefinitionFile, EnumDef, FieldDef, FieldType, IntegralType, LengthSpec, PrimitiveType, RecordDef, RecordKind,
  UnionSelector,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Width of a pointer slot on the host.
pub const POINTER_SIZE: u64 = std::mem::size_of::<usize>() as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalarKind {
  pub prim: PrimitiveType,
  pub enum_name: Option<String>,
}

impl ScalarKind {
  pub fn integral(&self) -> Option<IntegralType> {
    match self.prim {
      PrimitiveType::Integral(int_type) => Some(int_type),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementKind {
  Scalar(ScalarKind),
  Record(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerTarget {
  Opaque,
  Scalar(ScalarKind),
  Record(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerLength {
  Fixed(u64),
  /// Bounded by the runtime value of a sibling field.
  Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
  Scalar(ScalarKind),
  Array { element: ElementKind, len: u64 },
  Pointer { target: PointerTarget, length: Option<PointerLength> },
  Nested { record: String },
}

/// How a field is projected when read, chosen once at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRule {
  Scalar,
  EnumScalar,
  Text,
  ScalarList,
  Record,
  RecordList,
  BoundedPointer,
  DerefPointer,
  OpaquePointer,
}

impl DecodeRule {
  fn for_kind(kind: &FieldKind) -> Self {
    match kind {
      FieldKind::Scalar(ScalarKind { enum_name: Some(_), .. }) => DecodeRule::EnumScalar,
      FieldKind::Scalar(_) => DecodeRule::Scalar,
      FieldKind::Array { element: ElementKind::Scalar(ScalarKind { prim: PrimitiveType::Char, .. }), .. } => DecodeRule::Text,
      FieldKind::Array { element: ElementKind::Scalar(_), .. } => DecodeRule::ScalarList,
      FieldKind::Array { element: ElementKind::Record(_), .. } => DecodeRule::RecordList,
      FieldKind::Nested { .. } => DecodeRule::Record,
      FieldKind::Pointer { target: PointerTarget::Opaque, length: None } => DecodeRule::OpaquePointer,
      FieldKind::Pointer { length: Some(_), .. } => DecodeRule::BoundedPointer,
      FieldKind::Pointer { .. } => DecodeRule::DerefPointer,
    }
  }
}

impl fmt::Display for DecodeRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      DecodeRule::Scalar => "scalar",
      DecodeRule::EnumScalar => "enum",
      DecodeRule::Text => "text",
      DecodeRule::ScalarList => "list",
      DecodeRule::Record => "record",
      DecodeRule::RecordList => "record-list",
      DecodeRule::BoundedPointer => "bounded-pointer",
      DecodeRule::DerefPointer => "deref-pointer",
      DecodeRule::OpaquePointer => "opaque-pointer",
    };
    f.write_str(name)
  }
}

/// Position of a bitfield inside its storage unit, least significant bit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSlot {
  pub offset: u32,
  pub width: u32,
}

impl BitSlot {
  pub fn mask(&self) -> u64 {
    if self.width >= 64 {
      u64::MAX
    } else {
      (1u64 << self.width) - 1
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
  pub name: String,
  pub kind: FieldKind,
  pub offset: u64,
  /// Bytes covered by the field; for bitfields the whole storage unit.
  pub size: u64,
  pub alignment: u64,
  pub bits: Option<BitSlot>,
  /// Enum whose variants name the array indices, when the length came from one.
  pub index_names: Option<String>,
  pub transparent: bool,
  pub decode: DecodeRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRecord {
  pub name: String,
  pub c_name: String,
  pub kind: RecordKind,
  pub size: u64,
  pub alignment: u64,
  pub packed: bool,
  pub comment: Option<String>,
  pub size_override: Option<u64>,
  pub fields: Vec<ResolvedField>,
  pub selectors: IndexMap<String, UnionSelector>,
}

impl ResolvedRecord {
  pub fn is_union(&self) -> bool {
    self.kind == RecordKind::Union
  }

  pub fn field(&self, name: &str) -> Option<&ResolvedField> {
    self.fields.iter().find(|field| field.name == name)
  }

  pub fn selector(&self, field: &str) -> Option<&UnionSelector> {
    self.selectors.get(field)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEnum {
  pub def: EnumDef,
  pub repr: IntegralType,
}

#[derive(Debug, Clone, Copy)]
struct BitUnit {
  offset: u64,
  size: u64,
  used: u32,
}

struct FieldShape {
  kind: FieldKind,
  size: u64,
  alignment: u64,
  index_names: Option<String>,
}

#[derive(Debug, Default)]
pub struct TypeResolver {
  pub records: IndexMap<String, ResolvedRecord>,
  pub enums: IndexMap<String, ResolvedEnum>,
  pub record_defs: IndexMap<String, RecordDef>,
  pub enum_defs: IndexMap<String, EnumDef>,
  pub resolution_order: Vec<String>,
}

impl TypeResolver {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_unique(&self, name: &str) -> Result<(), ConfigError> {
    if self.record_defs.contains_key(name) || self.enum_defs.contains_key(name) || PrimitiveType::from_name(name).is_some() {
      return Err(ConfigError::DuplicateDefinition { name: name.to_string() });
    }
    Ok(())
  }

  pub fn add_record(&mut self, def: RecordDef) -> Result<(), ConfigError> {
    self.ensure_unique(&def.name)?;
    self.record_defs.insert(def.name.clone(), def);
    Ok(())
  }

  pub fn add_enum(&mut self, def: EnumDef) -> Result<(), ConfigError> {
    self.ensure_unique(&def.name)?;
    self.enum_defs.insert(def.name.clone(), def);
    Ok(())
  }

  pub fn add_definitions(&mut self, file: DefinitionFile) -> Result<(), ConfigError> {
    for def in file.enums {
      self.add_enum(def)?;
    }
    for def in file.records {
      self.add_record(def)?;
    }
    Ok(())
  }

  /// Registers a layout resolved elsewhere. Adding the same layout again is a no-op.
  pub fn add_resolved(&mut self, record: ResolvedRecord) -> Result<(), ConfigError> {
    match self.records.get(&record.name) {
      Some(existing) if *existing == record => Ok(()),
      Some(_) => Err(ConfigError::DuplicateDefinition { name: record.name }),
      None => {
        self.resolution_order.push(record.name.clone());
        self.records.insert(record.name.clone(), record);
        Ok(())
      }
    }
  }

  pub fn resolve_all(&mut self, probe: &dyn SizeProbe) -> Result<(), ConfigError> {
    self.resolve_enums(probe)?;

    let type_names: Vec<String> = self.record_defs.keys().filter(|name| !self.records.contains_key(*name)).cloned().collect();

    let mut resolved_count = 0;
    let total_types = type_names.len();
    let mut missing_types: HashSet<String> = HashSet::new();

    while resolved_count < total_types {
      let previous_count = resolved_count;
      missing_types.clear();

      for type_name in &type_names {
        if self.records.contains_key(type_name) {
          continue;
        }
        match self.try_resolve_record(type_name) {
          Ok(resolved) => {
            debug!(
              type_name = %resolved.name,
              size = resolved.size,
              alignment = resolved.alignment,
              fields = resolved.fields.len(),
              "resolved record layout"
            );
            self.records.insert(type_name.clone(), resolved);
            self.resolution_order.push(type_name.clone());
            resolved_count += 1;
          }
          Err(ConfigError::UnknownType { type_name: missing }) => {
            // Defined but not resolved yet is fine; it may resolve on a later pass
            if !self.record_defs.contains_key(&missing) {
              missing_types.insert(missing);
            }
          }
          Err(e) => return Err(e),
        }
      }

      if resolved_count == previous_count {
        if !missing_types.is_empty() {
          let mut names: Vec<String> = missing_types.into_iter().collect();
          names.sort();
          return Err(ConfigError::MissingTypes { names });
        }

        let names: Vec<String> = type_names.iter().filter(|name| !self.records.contains_key(*name)).cloned().collect();
        return Err(ConfigError::CircularDependency { names });
      }
    }

    Ok(())
  }

  fn resolve_enums(&mut self, probe: &dyn SizeProbe) -> Result<(), ConfigError> {
    for (name, def) in &self.enum_defs {
      if self.enums.contains_key(name) {
        continue;
      }
      let repr = match def.repr {
        Some(repr) => repr,
        None => {
          let size = probe_or_default(probe, name);
          IntegralType::unsigned_of_size(size).ok_or_else(|| ConfigError::UnsupportedEnumWidth { enum_name: name.clone(), size })?
        }
      };
      debug!(enum_name = %name, repr = repr.c_name(), "resolved enum width");
      self.enums.insert(name.clone(), ResolvedEnum { def: def.clone(), repr });
    }
    Ok(())
  }

  fn try_resolve_record(&self, type_name: &str) -> Result<ResolvedRecord, ConfigError> {
    let def = self.record_defs.get(type_name).ok_or_else(|| ConfigError::UnknownType { type_name: type_name.to_string() })?;
    let field_defs = def.fields.as_ref().ok_or_else(|| ConfigError::MissingFieldTable { record: def.name.clone() })?;

    let mut seen: HashSet<&str> = HashSet::new();
    for field in field_defs {
      if !seen.insert(field.name.as_str()) {
        return Err(ConfigError::DuplicateField { record: def.name.clone(), field: field.name.clone() });
      }
    }

    let packed = def.container_attributes.packed;
    let is_union = def.kind == RecordKind::Union;
    let mut fields = Vec::with_capacity(field_defs.len());
    let mut current_offset = 0u64;
    let mut max_size = 0u64;
    let mut max_alignment = 1u64;
    let mut open_unit: Option<BitUnit> = None;

    for field in field_defs {
      let shape = self.resolve_field_shape(def, field)?;

      let (offset, size, bits) = match field.bits {
        Some(width) => {
          let unit_size = self.check_bitfield(def, field, &shape, width)?;
          if is_union {
            (0, unit_size, Some(BitSlot { offset: 0, width }))
          } else {
            let mut unit = match open_unit {
              Some(unit) if unit.size == unit_size && unit.used + width <= (unit_size * 8) as u32 => unit,
              _ => {
                if !packed {
                  current_offset = align_up(current_offset, unit_size);
                }
                let unit = BitUnit { offset: current_offset, size: unit_size, used: 0 };
                current_offset += unit_size;
                unit
              }
            };
            let slot = BitSlot { offset: unit.used, width };
            unit.used += width;
            open_unit = Some(unit);
            (unit.offset, unit_size, Some(slot))
          }
        }
        None => {
          open_unit = None;
          if is_union {
            (0, shape.size, None)
          } else {
            if !packed {
              current_offset = align_up(current_offset, shape.alignment);
            }
            let offset = current_offset;
            current_offset += shape.size;
            (offset, shape.size, None)
          }
        }
      };

      max_size = max_size.max(size);
      if !packed {
        max_alignment = max_alignment.max(shape.alignment);
      }

      fields.push(ResolvedField {
        name: field.name.clone(),
        decode: DecodeRule::for_kind(&shape.kind),
        kind: shape.kind,
        offset,
        size,
        alignment: shape.alignment,
        bits,
        index_names: shape.index_names,
        transparent: def.anonymous.contains(&field.name),
      });
    }

    if def.container_attributes.aligned > 0 {
      max_alignment = def.container_attributes.aligned;
    }

    let unpadded = if is_union { max_size } else { current_offset };
    let size = if packed { unpadded } else { align_up(unpadded, max_alignment) };

    self.validate_pointer_lengths(def, &fields)?;
    self.validate_anonymous(def, &fields)?;
    self.validate_selectors(def, &fields)?;

    Ok(ResolvedRecord {
      name: def.name.clone(),
      c_name: def.c_name.clone().unwrap_or_else(|| def.name.clone()),
      kind: def.kind,
      size,
      alignment: max_alignment,
      packed,
      comment: def.container_attributes.comment.clone(),
      size_override: def.size,
      fields,
      selectors: def.selectors.clone(),
    })
  }

  fn resolve_field_shape(&self, def: &RecordDef, field: &FieldDef) -> Result<FieldShape, ConfigError> {
    match &field.field_type {
      FieldType::Pointer { pointer } => {
        let target = self.resolve_pointer_target(def, field, pointer)?;
        let mut index_names = None;
        let length = match &field.length {
          None => None,
          Some(LengthSpec::Count(count)) => Some(PointerLength::Fixed(*count)),
          Some(LengthSpec::Reference(reference)) => match self.enums.get(reference) {
            Some(resolved) => {
              index_names = Some(reference.clone());
              Some(PointerLength::Fixed(resolved.def.cardinality()))
            }
            None => Some(PointerLength::Field(reference.clone())),
          },
        };
        Ok(FieldShape { kind: FieldKind::Pointer { target, length }, size: POINTER_SIZE, alignment: POINTER_SIZE, index_names })
      }
      FieldType::Named(name) => {
        let (element, element_size, alignment) = self.resolve_element(def, field, name)?;
        let mut index_names = None;
        let count = match &field.length {
          None => None,
          Some(LengthSpec::Count(count)) => Some(*count),
          Some(LengthSpec::Reference(reference)) => match self.enums.get(reference) {
            Some(resolved) => {
              index_names = Some(reference.clone());
              Some(resolved.def.cardinality())
            }
            None => {
              return Err(ConfigError::InvalidLength {
                record: def.name.clone(),
                field: field.name.clone(),
                reason: format!("'{}' is not an enum; only pointers may be bounded by a sibling field", reference),
              })
            }
          },
        };

        let (kind, size) = match (element, count) {
          (ElementKind::Scalar(scalar), None) => (FieldKind::Scalar(scalar), element_size),
          (ElementKind::Record(record), None) => (FieldKind::Nested { record }, element_size),
          (element, Some(len)) => (FieldKind::Array { element, len }, element_size * len),
        };
        Ok(FieldShape { kind, size, alignment, index_names })
      }
    }
  }

  fn resolve_scalar(&self, def: &RecordDef, field: &FieldDef, name: &str) -> Result<Option<ScalarKind>, ConfigError> {
    if let Some(prim) = PrimitiveType::from_name(name) {
      let enum_name = match &field.enum_mapping {
        None => None,
        Some(mapping) => {
          if !matches!(prim, PrimitiveType::Integral(_)) {
            return Err(ConfigError::InvalidEnumMapping {
              record: def.name.clone(),
              field: field.name.clone(),
              reason: format!("'{}' is not an integer type", name),
            });
          }
          if !self.enums.contains_key(mapping) {
            return Err(ConfigError::UnknownType { type_name: mapping.clone() });
          }
          Some(mapping.clone())
        }
      };
      return Ok(Some(ScalarKind { prim, enum_name }));
    }

    if let Some(resolved) = self.enums.get(name) {
      if let Some(mapping) = field.enum_mapping.as_ref().filter(|mapping| *mapping != name) {
        return Err(ConfigError::InvalidEnumMapping {
          record: def.name.clone(),
          field: field.name.clone(),
          reason: format!("field already has enum type '{}', cannot also map to '{}'", name, mapping),
        });
      }
      return Ok(Some(ScalarKind { prim: PrimitiveType::Integral(resolved.repr), enum_name: Some(name.to_string()) }));
    }

    Ok(None)
  }

  fn resolve_element(&self, def: &RecordDef, field: &FieldDef, name: &str) -> Result<(ElementKind, u64, u64), ConfigError> {
    if let Some(scalar) = self.resolve_scalar(def, field, name)? {
      let size = scalar.prim.size();
      return Ok((ElementKind::Scalar(scalar), size, size));
    }

    if field.enum_mapping.is_some() {
      return Err(ConfigError::InvalidEnumMapping {
        record: def.name.clone(),
        field: field.name.clone(),
        reason: format!("'{}' is not an integer type", name),
      });
    }

    match self.records.get(name) {
      Some(record) => Ok((ElementKind::Record(name.to_string()), record.size, record.alignment)),
      None => Err(ConfigError::UnknownType { type_name: name.to_string() }),
    }
  }

  fn resolve_pointer_target(&self, def: &RecordDef, field: &FieldDef, target: &FieldType) -> Result<PointerTarget, ConfigError> {
    let name = match target {
      FieldType::Named(name) => name,
      FieldType::Pointer { .. } => return Ok(PointerTarget::Opaque),
    };
    if name == "void" {
      return Ok(PointerTarget::Opaque);
    }
    if let Some(scalar) = self.resolve_scalar(def, field, name)? {
      return Ok(PointerTarget::Scalar(scalar));
    }
    // Pointees only need to exist, so records may point at themselves
    if self.record_defs.contains_key(name) || self.records.contains_key(name) {
      return Ok(PointerTarget::Record(name.clone()));
    }
    Err(ConfigError::UnknownType { type_name: name.clone() })
  }

  fn check_bitfield(&self, def: &RecordDef, field: &FieldDef, shape: &FieldShape, width: u32) -> Result<u64, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBitfield { record: def.name.clone(), field: field.name.clone(), reason };

    let int_type = match &shape.kind {
      FieldKind::Scalar(scalar) => scalar.integral(),
      _ => None,
    }
    .ok_or_else(|| invalid("bitfields must have a scalar integer type".to_string()))?;

    if width == 0 || width > int_type.bits() {
      return Err(invalid(format!("width {} does not fit in {}", width, int_type.c_name())));
    }
    Ok(int_type.size())
  }

  fn validate_pointer_lengths(&self, def: &RecordDef, fields: &[ResolvedField]) -> Result<(), ConfigError> {
    for field in fields {
      if let FieldKind::Pointer { length: Some(PointerLength::Field(sibling)), .. } = &field.kind {
        let valid = fields.iter().any(|other| &other.name == sibling && matches!(&other.kind, FieldKind::Scalar(scalar) if scalar.integral().is_some()));
        if !valid {
          return Err(ConfigError::InvalidLength {
            record: def.name.clone(),
            field: field.name.clone(),
            reason: format!("'{}' is neither an enum nor an integer field of this record", sibling),
          });
        }
      }
    }
    Ok(())
  }

  fn validate_anonymous(&self, def: &RecordDef, fields: &[ResolvedField]) -> Result<(), ConfigError> {
    for name in &def.anonymous {
      let valid = fields.iter().any(|field| &field.name == name && matches!(field.kind, FieldKind::Nested { .. }));
      if !valid {
        return Err(ConfigError::InvalidAnonymous {
          record: def.name.clone(),
          field: name.clone(),
          reason: "anonymous members must be embedded records".to_string(),
        });
      }
    }
    Ok(())
  }

  fn validate_selectors(&self, def: &RecordDef, fields: &[ResolvedField]) -> Result<(), ConfigError> {
    for (field_name, selector) in &def.selectors {
      let invalid = |reason: String| ConfigError::InvalidSelector { record: def.name.clone(), field: field_name.clone(), reason };

      let union = fields
        .iter()
        .find(|field| &field.name == field_name)
        .and_then(|field| match &field.kind {
          FieldKind::Nested { record } => self.records.get(record),
          _ => None,
        })
        .filter(|record| record.is_union())
        .ok_or_else(|| invalid("selectors apply to embedded union fields only".to_string()))?;

      let members: Vec<&String> = match selector {
        UnionSelector::Fixed(member) => vec![member],
        UnionSelector::Tagged(tagged) => {
          let selector_ok = fields.iter().any(|field| field.name == tagged.selector && matches!(&field.kind, FieldKind::Scalar(scalar) if scalar.integral().is_some()));
          if !selector_ok {
            return Err(invalid(format!("selector '{}' is not an integer field of this record", tagged.selector)));
          }
          tagged.cases.values().collect()
        }
      };

      for member in members {
        if union.field(member).is_none() {
          return Err(invalid(format!("union '{}' has no member '{}'", union.name, member)));
        }
      }
    }
    Ok(())
  }

  pub fn get_record(&self, name: &str) -> Option<&ResolvedRecord> {
    self.records.get(name)
  }

  pub fn get_enum(&self, name: &str) -> Option<&ResolvedEnum> {
    self.enums.get(name)
  }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
  if alignment <= 1 {
    return value;
  }
  (value + alignment - 1) & !(alignment - 1)
}
