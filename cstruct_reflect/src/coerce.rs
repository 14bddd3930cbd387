/* Coercion of host values into raw record storage */

use crate::decode::read_unsigned;
use crate::errors::CoercionError;
use crate::record::find_field;
use crate::value::{HostValue, Pointee};
use cstruct_layout::{
    BitSlot, ElementKind, FieldKind, PointerLength, PointerTarget, ResolvedField, ResolvedRecord, ScalarKind, TypeResolver,
    POINTER_SIZE,
};
use cstruct_types::{FloatingPointType, PrimitiveType};
use std::collections::BTreeMap;
use tracing::trace;

type CoerceResult<T> = Result<T, CoercionError>;

/// Writes host values into a storage buffer, keeping the pointee table in step
/// with every pointer slot it touches.
pub(crate) struct Writer<'w, 'a> {
    types: &'a TypeResolver,
    storage: &'w mut [u8],
    pointees: &'w mut BTreeMap<u64, Pointee<'a>>,
}

fn mismatch(field: &str, expected: impl Into<String>, value: &HostValue<'_>) -> CoercionError {
    CoercionError::TypeMismatch {
        field: field.to_string(),
        expected: expected.into(),
        actual: value.kind_name(),
    }
}

fn scalar_name(scalar: &ScalarKind) -> String {
    match &scalar.enum_name {
        Some(enum_name) => format!("enum {}", enum_name),
        None => scalar.prim.to_string(),
    }
}

fn element_name(element: &ElementKind) -> String {
    match element {
        ElementKind::Scalar(scalar) => scalar_name(scalar),
        ElementKind::Record(record) => record.clone(),
    }
}

fn target_name(target: &PointerTarget) -> String {
    match target {
        PointerTarget::Opaque => "void".to_string(),
        PointerTarget::Scalar(scalar) => scalar_name(scalar),
        PointerTarget::Record(record) => record.clone(),
    }
}

impl<'w, 'a> Writer<'w, 'a> {
    pub fn new(types: &'a TypeResolver, storage: &'w mut [u8], pointees: &'w mut BTreeMap<u64, Pointee<'a>>) -> Self {
        Self { types, storage, pointees }
    }

    fn put_unsigned(&mut self, offset: u64, size: u64, value: u64) {
        let start = offset as usize;
        let Some(slot) = self.storage.get_mut(start..start + size as usize) else {
            return;
        };
        match size {
            1 => slot.copy_from_slice(&[value as u8]),
            2 => slot.copy_from_slice(&(value as u16).to_ne_bytes()),
            4 => slot.copy_from_slice(&(value as u32).to_ne_bytes()),
            8 => slot.copy_from_slice(&value.to_ne_bytes()),
            _ => {}
        }
    }

    /* Zero a region and forget every pointee whose slot lies inside it */
    fn clear(&mut self, base: u64, size: u64) {
        let start = base as usize;
        let end = (start + size as usize).min(self.storage.len());
        if let Some(region) = self.storage.get_mut(start..end) {
            region.fill(0);
        }
        self.pointees.retain(|offset, _| *offset < base || *offset >= base + size);
    }

    /// Write a whole record image at `base`.
    pub fn write_record(&mut self, layout: &ResolvedRecord, base: u64, value: HostValue<'a>, label: &str) -> CoerceResult<()> {
        match value {
            HostValue::Record(record) if record.type_name() == layout.name => {
                self.clear(base, layout.size);
                let start = base as usize;
                let bytes = record.as_bytes();
                if let Some(region) = self.storage.get_mut(start..start + bytes.len()) {
                    region.copy_from_slice(bytes);
                }
                for (offset, pointee) in record.pointees() {
                    self.pointees.insert(base + offset, *pointee);
                }
                Ok(())
            }
            HostValue::Map(entries) => {
                self.clear(base, layout.size);
                for (key, value) in entries {
                    let (owner, field, owner_base) =
                        find_field(self.types, layout, &key, base).ok_or_else(|| CoercionError::UnknownField {
                            record: layout.name.clone(),
                            field: key.clone(),
                        })?;
                    self.write_field(owner, field, owner_base, value)?;
                }
                Ok(())
            }
            HostValue::Int(_) | HostValue::UInt(_) | HostValue::Enum(_) => {
                // Records up to eight bytes take the low-order bytes of an integer image
                if layout.size == 0 || layout.size > 8 {
                    return Err(mismatch(label, format!("record {}", layout.name), &value));
                }
                let raw = match &value {
                    HostValue::Int(v) => *v as i128,
                    HostValue::UInt(v) => *v as i128,
                    HostValue::Enum(e) => e.value as i128,
                    _ => 0,
                };
                let bits = layout.size * 8;
                let min = -(1i128 << (bits - 1));
                let max = (1i128 << bits) - 1;
                if raw < min || raw > max {
                    return Err(CoercionError::OutOfRange {
                        field: label.to_string(),
                        value: raw,
                        min,
                        max,
                    });
                }
                self.clear(base, layout.size);
                let size = layout.size as usize;
                let image = (raw as u64).to_ne_bytes();
                let low = if cfg!(target_endian = "big") { &image[8 - size..] } else { &image[..size] };
                let start = base as usize;
                if let Some(region) = self.storage.get_mut(start..start + size) {
                    region.copy_from_slice(low);
                }
                Ok(())
            }
            other => Err(mismatch(label, format!("record {}", layout.name), &other)),
        }
    }

    /// Write `value` into `field` of the record `owner` stored at `base`.
    pub fn write_field(&mut self, owner: &ResolvedRecord, field: &ResolvedField, base: u64, value: HostValue<'a>) -> CoerceResult<()> {
        let offset = base + field.offset;
        let label = format!("{}.{}", owner.name, field.name);
        trace!(field = %label, offset, value = value.kind_name(), "coercing field");

        match &field.kind {
            FieldKind::Scalar(scalar) => self.write_scalar(scalar, field.bits, offset, value, &label),
            FieldKind::Array { element, len } => self.write_array(element, *len, offset, value, &label),
            FieldKind::Nested { record } => match self.types.get_record(record) {
                Some(layout) => self.write_record(layout, offset, value, &label),
                None => Err(mismatch(&label, format!("record {}", record), &value)),
            },
            FieldKind::Pointer { target, length } => self.write_pointer(target, length.as_ref(), offset, value, &label),
        }
    }

    fn integer_for(&self, scalar: &ScalarKind, value: HostValue<'a>, label: &str) -> CoerceResult<i128> {
        match value {
            HostValue::Int(v) => Ok(v as i128),
            HostValue::UInt(v) => Ok(v as i128),
            HostValue::Bool(b) => Ok(b as i128),
            HostValue::Enum(e) => match &scalar.enum_name {
                Some(expected) if *expected != e.enum_name => Err(CoercionError::TypeMismatch {
                    field: label.to_string(),
                    expected: format!("enum {}", expected),
                    actual: "enum",
                }),
                _ => Ok(e.value as i128),
            },
            HostValue::Text(variant) => match &scalar.enum_name {
                Some(enum_name) => self
                    .types
                    .get_enum(enum_name)
                    .and_then(|e| e.def.value_of(&variant))
                    .map(i128::from)
                    .ok_or_else(|| CoercionError::UnknownVariant {
                        field: label.to_string(),
                        enum_name: enum_name.clone(),
                        variant,
                    }),
                None => Err(CoercionError::TypeMismatch {
                    field: label.to_string(),
                    expected: scalar_name(scalar),
                    actual: "text",
                }),
            },
            other => Err(mismatch(label, scalar_name(scalar), &other)),
        }
    }

    fn write_scalar(&mut self, scalar: &ScalarKind, bits: Option<BitSlot>, offset: u64, value: HostValue<'a>, label: &str) -> CoerceResult<()> {
        match scalar.prim {
            PrimitiveType::Integral(int_type) => {
                let raw = self.integer_for(scalar, value, label)?;
                let width = bits.map_or(int_type.bits(), |slot| slot.width);
                let (min, max) = int_type.range(width);
                if raw < min || raw > max {
                    return Err(CoercionError::OutOfRange {
                        field: label.to_string(),
                        value: raw,
                        min,
                        max,
                    });
                }
                match bits {
                    Some(slot) => {
                        let unit = read_unsigned(&*self.storage, offset, int_type.size());
                        let mask = slot.mask() << slot.offset;
                        let field_bits = ((raw as u64) & slot.mask()) << slot.offset;
                        self.put_unsigned(offset, int_type.size(), (unit & !mask) | field_bits);
                    }
                    None => self.put_unsigned(offset, int_type.size(), raw as u64),
                }
                Ok(())
            }
            PrimitiveType::FloatingPoint(float_type) => {
                let number = match value {
                    HostValue::Float(v) => v,
                    HostValue::Int(v) => v as f64,
                    HostValue::UInt(v) => v as f64,
                    other => return Err(mismatch(label, scalar_name(scalar), &other)),
                };
                match float_type {
                    FloatingPointType::F32 => self.put_unsigned(offset, 4, (number as f32).to_bits() as u64),
                    FloatingPointType::F64 => self.put_unsigned(offset, 8, number.to_bits()),
                }
                Ok(())
            }
            PrimitiveType::Char => {
                let byte = match value {
                    HostValue::Text(text) => {
                        if !text.is_ascii() {
                            return Err(CoercionError::NonAscii { field: label.to_string() });
                        }
                        if text.len() != 1 {
                            return Err(CoercionError::LengthMismatch {
                                field: label.to_string(),
                                expected: 1,
                                actual: text.len() as u64,
                            });
                        }
                        text.as_bytes()[0]
                    }
                    HostValue::Int(_) | HostValue::UInt(_) => {
                        let raw = match value {
                            HostValue::Int(v) => v as i128,
                            HostValue::UInt(v) => v as i128,
                            _ => 0,
                        };
                        u8::try_from(raw).map_err(|_| CoercionError::OutOfRange {
                            field: label.to_string(),
                            value: raw,
                            min: 0,
                            max: 255,
                        })?
                    }
                    other => return Err(mismatch(label, "char", &other)),
                };
                self.put_unsigned(offset, 1, byte as u64);
                Ok(())
            }
            PrimitiveType::Bool => {
                let flag = match value {
                    HostValue::Bool(b) => b,
                    HostValue::Int(v) if v == 0 || v == 1 => v == 1,
                    HostValue::UInt(v) if v <= 1 => v == 1,
                    HostValue::Int(v) => {
                        return Err(CoercionError::OutOfRange {
                            field: label.to_string(),
                            value: v as i128,
                            min: 0,
                            max: 1,
                        })
                    }
                    HostValue::UInt(v) => {
                        return Err(CoercionError::OutOfRange {
                            field: label.to_string(),
                            value: v as i128,
                            min: 0,
                            max: 1,
                        })
                    }
                    other => return Err(mismatch(label, "bool", &other)),
                };
                self.put_unsigned(offset, 1, flag as u64);
                Ok(())
            }
        }
    }

    /* Text into a char array: truncated to fit, remainder NUL filled */
    fn write_padded(&mut self, offset: u64, len: u64, data: &[u8]) {
        let start = offset as usize;
        let Some(region) = self.storage.get_mut(start..start + len as usize) else {
            return;
        };
        region.fill(0);
        let copied = data.len().min(region.len());
        region[..copied].copy_from_slice(&data[..copied]);
    }

    fn write_array(&mut self, element: &ElementKind, len: u64, offset: u64, value: HostValue<'a>, label: &str) -> CoerceResult<()> {
        let expected_len = |actual: usize| -> CoerceResult<()> {
            if actual as u64 != len {
                return Err(CoercionError::LengthMismatch {
                    field: label.to_string(),
                    expected: len,
                    actual: actual as u64,
                });
            }
            Ok(())
        };

        match (element, value) {
            (ElementKind::Scalar(scalar), HostValue::Text(text)) if scalar.prim == PrimitiveType::Char => {
                if !text.is_ascii() {
                    return Err(CoercionError::NonAscii { field: label.to_string() });
                }
                self.write_padded(offset, len, text.as_bytes());
                Ok(())
            }
            (ElementKind::Scalar(scalar), HostValue::Bytes(bytes)) if scalar.prim == PrimitiveType::Char => {
                self.write_padded(offset, len, &bytes);
                Ok(())
            }
            (ElementKind::Scalar(scalar), HostValue::Bytes(bytes)) if scalar.prim.is_byte() && scalar.enum_name.is_none() => {
                expected_len(bytes.len())?;
                self.write_padded(offset, len, &bytes);
                Ok(())
            }
            (ElementKind::Scalar(scalar), HostValue::List(items)) => {
                expected_len(items.len())?;
                let step = scalar.prim.size();
                for (index, item) in items.into_iter().enumerate() {
                    let element_label = format!("{}[{}]", label, index);
                    self.write_scalar(scalar, None, offset + index as u64 * step, item, &element_label)?;
                }
                Ok(())
            }
            (ElementKind::Record(record), HostValue::List(items)) => {
                expected_len(items.len())?;
                let Some(layout) = self.types.get_record(record) else {
                    return Err(CoercionError::TypeMismatch {
                        field: label.to_string(),
                        expected: format!("record {}", record),
                        actual: "list",
                    });
                };
                for (index, item) in items.into_iter().enumerate() {
                    let element_label = format!("{}[{}]", label, index);
                    self.write_record(layout, offset + index as u64 * layout.size, item, &element_label)?;
                }
                Ok(())
            }
            (element, other) => Err(mismatch(label, format!("array of {} {}", len, element_name(element)), &other)),
        }
    }

    fn write_pointer(
        &mut self,
        target: &PointerTarget,
        length: Option<&PointerLength>,
        offset: u64,
        value: HostValue<'a>,
        label: &str,
    ) -> CoerceResult<()> {
        let pointee = match value {
            HostValue::Null => {
                self.pointees.remove(&offset);
                self.put_unsigned(offset, POINTER_SIZE, 0);
                return Ok(());
            }
            HostValue::Int(_) | HostValue::UInt(_) if *target == PointerTarget::Opaque => {
                // A raw handle; nothing is known about what it points at
                let address = match value {
                    HostValue::Int(v) => v as u64,
                    HostValue::UInt(v) => v,
                    _ => 0,
                };
                self.pointees.remove(&offset);
                self.put_unsigned(offset, POINTER_SIZE, address);
                return Ok(());
            }
            HostValue::Pointer(pointee) => pointee,
            other => return Err(mismatch(label, format!("pointer to {}", target_name(target)), &other)),
        };

        let fixed = match length {
            Some(PointerLength::Fixed(count)) => Some(*count),
            _ => None,
        };
        let short = |actual: u64, expected: u64| CoercionError::LengthMismatch {
            field: label.to_string(),
            expected,
            actual,
        };

        match (target, &pointee) {
            (PointerTarget::Opaque, _) => {}
            (PointerTarget::Scalar(scalar), Pointee::Bytes(bytes)) => {
                let step = scalar.prim.size();
                if let Some(count) = fixed {
                    let available = bytes.len() as u64 / step;
                    if available < count {
                        return Err(short(available, count));
                    }
                }
            }
            (PointerTarget::Record(record), Pointee::Record(pointed)) if pointed.type_name() == record.as_str() => {
                if let Some(count) = fixed.filter(|count| *count > 1) {
                    return Err(short(1, count));
                }
            }
            (PointerTarget::Record(record), Pointee::Records(pointed)) if pointed.type_name() == record.as_str() => {
                if let Some(count) = fixed.filter(|count| *count > pointed.len() as u64) {
                    return Err(short(pointed.len() as u64, count));
                }
            }
            (target, pointee) => {
                return Err(CoercionError::TypeMismatch {
                    field: label.to_string(),
                    expected: format!("pointer to {}", target_name(target)),
                    actual: pointee.kind_name(),
                })
            }
        }

        self.pointees.insert(offset, pointee);
        self.put_unsigned(offset, POINTER_SIZE, pointee.address());
        Ok(())
    }
}
