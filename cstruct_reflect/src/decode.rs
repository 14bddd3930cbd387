/* Read-only projection of raw storage into field values */

use crate::record::RecordView;
use crate::value::{EnumValue, FieldValue, Pointee};
use cstruct_layout::{
    BitSlot, DecodeRule, ElementKind, FieldKind, PointerLength, PointerTarget, ResolvedField, ScalarKind, TypeResolver,
    POINTER_SIZE,
};
use cstruct_types::{FloatingPointType, IntegralType, PrimitiveType, UnionSelector};
use tracing::{debug, trace};

/* Native-endian unsigned read of a 1, 2, 4 or 8 byte unit */
pub(crate) fn read_unsigned(bytes: &[u8], offset: u64, size: u64) -> u64 {
    let start = offset as usize;
    let end = start + size as usize;
    let Some(slice) = bytes.get(start..end) else {
        return 0;
    };
    match size {
        1 => slice[0] as u64,
        2 => u16::from_ne_bytes([slice[0], slice[1]]) as u64,
        4 => u32::from_ne_bytes([slice[0], slice[1], slice[2], slice[3]]) as u64,
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(slice);
            u64::from_ne_bytes(raw)
        }
        _ => 0,
    }
}

pub(crate) fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/* Raw integer stored in a scalar integer field, honouring bitfield slots and signedness */
pub(crate) fn read_integer(bytes: &[u8], offset: u64, int_type: IntegralType, bits: Option<BitSlot>) -> i128 {
    let unit = read_unsigned(bytes, offset, int_type.size());
    let (raw, width) = match bits {
        Some(slot) => ((unit >> slot.offset) & slot.mask(), slot.width),
        None => (unit, int_type.bits()),
    };
    if int_type.is_signed() {
        sign_extend(raw, width) as i128
    } else {
        raw as i128
    }
}

pub(crate) fn read_pointer(bytes: &[u8], offset: u64) -> u64 {
    read_unsigned(bytes, offset, POINTER_SIZE)
}

fn enum_or_raw<'r>(types: &TypeResolver, enum_name: &str, raw: i128, signed: bool) -> FieldValue<'r> {
    if let Some(variant) = types.get_enum(enum_name).and_then(|e| e.def.variant_name(raw as i64)) {
        return FieldValue::Enum(EnumValue::new(enum_name, variant, raw as i64));
    }
    // Values outside the declared set are legitimate on the wire
    trace!(enum_name, raw = %raw, "value is not a declared variant, returning raw integer");
    integer_value(raw, signed)
}

fn integer_value<'r>(raw: i128, signed: bool) -> FieldValue<'r> {
    if signed {
        FieldValue::Int(raw as i64)
    } else {
        FieldValue::UInt(raw as u64)
    }
}

/* Decode one scalar element at `offset` */
pub(crate) fn decode_scalar<'r>(types: &TypeResolver, bytes: &'r [u8], offset: u64, scalar: &ScalarKind, bits: Option<BitSlot>) -> FieldValue<'r> {
    match scalar.prim {
        PrimitiveType::Integral(int_type) => {
            let raw = read_integer(bytes, offset, int_type, bits);
            match &scalar.enum_name {
                Some(enum_name) => enum_or_raw(types, enum_name, raw, int_type.is_signed()),
                None => integer_value(raw, int_type.is_signed()),
            }
        }
        PrimitiveType::FloatingPoint(FloatingPointType::F32) => {
            FieldValue::Float(f32::from_bits(read_unsigned(bytes, offset, 4) as u32) as f64)
        }
        PrimitiveType::FloatingPoint(FloatingPointType::F64) => FieldValue::Float(f64::from_bits(read_unsigned(bytes, offset, 8))),
        PrimitiveType::Char => FieldValue::Char(read_unsigned(bytes, offset, 1) as u8),
        PrimitiveType::Bool => FieldValue::Bool(read_unsigned(bytes, offset, 1) != 0),
    }
}

/* Character data up to the first NUL */
pub(crate) fn decode_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn slice(bytes: &[u8], offset: u64, len: u64) -> &[u8] {
    let start = (offset as usize).min(bytes.len());
    let end = (start + len as usize).min(bytes.len());
    &bytes[start..end]
}

/* Index of the union member selected for `field` of `parent`, read from the parent's current state */
pub(crate) fn active_member(parent: &RecordView<'_>, field: &ResolvedField) -> Option<usize> {
    let FieldKind::Nested { record } = &field.kind else {
        return None;
    };
    let union = parent.types().get_record(record).filter(|r| r.is_union())?;
    let member = match parent.layout().selector(&field.name)? {
        UnionSelector::Fixed(member) => member.as_str(),
        UnionSelector::Tagged(tagged) => {
            let selector = parent.layout().field(&tagged.selector)?;
            let value = parent.raw_integer(selector)?;
            tagged.cases.get(&(value as i64))?.as_str()
        }
    };
    union.fields.iter().position(|f| f.name == member)
}

/* Decode `field` of `view` according to the rule chosen at resolution time */
pub(crate) fn decode_field<'r>(view: &RecordView<'r>, field: &ResolvedField) -> FieldValue<'r> {
    let types = view.types();
    let bytes = view.storage();
    let offset = view.base() + field.offset;

    match (&field.decode, &field.kind) {
        (DecodeRule::Scalar | DecodeRule::EnumScalar, FieldKind::Scalar(scalar)) => decode_scalar(types, bytes, offset, scalar, field.bits),
        (DecodeRule::Text, FieldKind::Array { len, .. }) => FieldValue::Text(decode_text(slice(bytes, offset, *len))),
        (DecodeRule::ScalarList, FieldKind::Array { element: ElementKind::Scalar(scalar), len }) => {
            let step = scalar.prim.size();
            FieldValue::List((0..*len).map(|i| decode_scalar(types, bytes, offset + i * step, scalar, None)).collect())
        }
        (DecodeRule::Record, FieldKind::Nested { record }) => match types.get_record(record) {
            Some(layout) => FieldValue::Record(view.child(layout, offset, active_member(view, field))),
            None => FieldValue::Null,
        },
        (DecodeRule::RecordList, FieldKind::Array { element: ElementKind::Record(record), len }) => match types.get_record(record) {
            Some(layout) => FieldValue::List((0..*len).map(|i| FieldValue::Record(view.child(layout, offset + i * layout.size, None))).collect()),
            None => FieldValue::Null,
        },
        (DecodeRule::BoundedPointer | DecodeRule::DerefPointer | DecodeRule::OpaquePointer, FieldKind::Pointer { target, length }) => {
            let address = read_pointer(bytes, offset);
            if address == 0 {
                return FieldValue::Null;
            }
            let Some(pointee) = view.pointee_at(offset).filter(|p| p.address() == address) else {
                return FieldValue::Address(address);
            };
            match length {
                Some(length) => decode_bounded(types, pointee, target, pointer_bound(view, length)),
                None => decode_deref(types, pointee, target),
            }
        }
        (rule, kind) => {
            debug!(field = %field.name, %rule, ?kind, "decode rule does not match field kind");
            FieldValue::Null
        }
    }
}

/* Element count a bounded pointer currently declares */
pub(crate) fn pointer_bound(view: &RecordView<'_>, length: &PointerLength) -> u64 {
    match length {
        PointerLength::Fixed(count) => *count,
        PointerLength::Field(sibling) => sibling_length(view, sibling),
    }
}

/* Bytes per element behind a pointer into a byte pointee */
pub(crate) fn element_step(target: &PointerTarget) -> u64 {
    match target {
        PointerTarget::Scalar(scalar) => scalar.prim.size(),
        PointerTarget::Opaque | PointerTarget::Record(_) => 1,
    }
}

fn sibling_length(view: &RecordView<'_>, sibling: &str) -> u64 {
    let Some(field) = view.layout().field(sibling) else {
        return 0;
    };
    let FieldKind::Scalar(scalar) = &field.kind else {
        return 0;
    };
    let Some(int_type) = scalar.integral() else {
        return 0;
    };
    read_integer(view.storage(), view.base() + field.offset, int_type, field.bits).max(0) as u64
}

fn decode_bounded<'r>(types: &TypeResolver, pointee: Pointee<'r>, target: &PointerTarget, count: u64) -> FieldValue<'r> {
    match (pointee, target) {
        (Pointee::Bytes(bytes), PointerTarget::Opaque) => FieldValue::Bytes(clamp(bytes, count, 1)),
        (Pointee::Bytes(bytes), PointerTarget::Scalar(scalar)) => {
            let step = element_step(target);
            let bounded = clamp(bytes, count, step);
            match scalar.prim {
                PrimitiveType::Char => FieldValue::Text(String::from_utf8_lossy(bounded).into_owned()),
                prim if prim.is_byte() && scalar.enum_name.is_none() => FieldValue::Bytes(bounded),
                _ => FieldValue::List((0..bounded.len() as u64 / step).map(|i| decode_scalar(types, bounded, i * step, scalar, None)).collect()),
            }
        }
        (Pointee::Record(record), _) => FieldValue::List(std::iter::once(record.view()).take(count.min(1) as usize).map(FieldValue::Record).collect()),
        (Pointee::Records(records), _) => FieldValue::List(records.views().take(count as usize).map(FieldValue::Record).collect()),
        (Pointee::Bytes(bytes), PointerTarget::Record(_)) => FieldValue::Bytes(clamp(bytes, count, 1)),
    }
}

fn decode_deref<'r>(types: &TypeResolver, pointee: Pointee<'r>, target: &PointerTarget) -> FieldValue<'r> {
    match (pointee, target) {
        (Pointee::Record(record), _) => FieldValue::Record(record.view()),
        (Pointee::Records(records), _) => records.views().next().map_or(FieldValue::Null, FieldValue::Record),
        (Pointee::Bytes(bytes), PointerTarget::Scalar(scalar)) if bytes.len() as u64 >= scalar.prim.size() => decode_scalar(types, bytes, 0, scalar, None),
        (Pointee::Bytes(bytes), _) => FieldValue::Bytes(bytes),
    }
}

/* Never read past the borrowed pointee, whatever the length field claims */
pub(crate) fn clamp(bytes: &[u8], count: u64, step: u64) -> &[u8] {
    let wanted = count.saturating_mul(step) as usize;
    if wanted > bytes.len() {
        debug!(wanted, available = bytes.len(), "pointer length exceeds pointee, clamping");
    }
    &bytes[..wanted.min(bytes.len())]
}
