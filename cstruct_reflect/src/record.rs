use crate::coerce::Writer;
use crate::decode::{active_member, decode_field, read_integer, read_pointer};
use crate::emit::{CEmitter, NameRegistry};
use crate::errors::{CoercionError, ReflectError, ReflectResult};
use crate::iter::Fields;
use crate::value::{FieldValue, HostValue, Pointee};
use cstruct_layout::{ElementKind, FieldKind, ResolvedField, ResolvedRecord, TypeResolver};
use std::collections::BTreeMap;
use std::fmt;

/// An instance of a record type. Owns its scalar and array storage; pointer
/// fields borrow their targets for `'a`.
#[derive(Clone)]
pub struct Record<'a> {
    types: &'a TypeResolver,
    layout: &'a ResolvedRecord,
    storage: Vec<u8>,
    /* Pointer targets keyed by the absolute offset of their slot */
    pointees: BTreeMap<u64, Pointee<'a>>,
}

impl<'a> Record<'a> {
    pub(crate) fn zeroed(types: &'a TypeResolver, layout: &'a ResolvedRecord) -> Self {
        Self {
            types,
            layout,
            storage: vec![0u8; layout.size as usize],
            pointees: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &'a str {
        &self.layout.name
    }

    pub fn layout(&self) -> &'a ResolvedRecord {
        self.layout
    }

    pub fn types(&self) -> &'a TypeResolver {
        self.types
    }

    /// The C image of this record.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn pointees(&self) -> &BTreeMap<u64, Pointee<'a>> {
        &self.pointees
    }

    pub fn view(&self) -> RecordView<'_> {
        RecordView {
            types: self.types,
            layout: self.layout,
            storage: &self.storage,
            base: 0,
            pointees: &self.pointees,
            active: None,
        }
    }

    pub fn get(&self, name: &str) -> ReflectResult<FieldValue<'_>> {
        self.view().get(name)
    }

    pub fn fields(&self) -> Fields<'_> {
        self.view().fields()
    }

    pub(crate) fn writer(&mut self) -> Writer<'_, 'a> {
        Writer::new(self.types, &mut self.storage, &mut self.pointees)
    }

    /// Coerce `value` into the field at `path`. Paths are dotted and may walk
    /// into embedded records, anonymous members and record array elements.
    pub fn set(&mut self, path: &str, value: impl Into<HostValue<'a>>) -> ReflectResult<()> {
        let target = locate(self.types, self.layout, path)?;
        let value = value.into();
        let mut writer = self.writer();
        match target {
            Target::Field { owner, field, base } => writer.write_field(owner, field, base, value)?,
            Target::Element { layout, base, label } => writer.write_record(layout, base, value, &label)?,
        }
        Ok(())
    }

    /// Overwrite the storage with raw bytes, e.g. a buffer returned by the native library.
    /// Pointer targets survive only where the new image still holds their address.
    pub fn update_from_buffer(&mut self, buffer: &[u8]) -> ReflectResult<()> {
        let size = self.storage.len();
        if buffer.len() < size {
            return Err(ReflectError::BufferTooSmall {
                type_name: self.layout.name.clone(),
                required: size as u64,
                available: buffer.len() as u64,
            });
        }
        self.storage.copy_from_slice(&buffer[..size]);
        let storage = &self.storage;
        self.pointees.retain(|offset, pointee| read_pointer(storage, *offset) == pointee.address());
        Ok(())
    }

    /// Render this record as C source declaring `name`, hoisting pointer targets.
    pub fn to_c_code(&self, name: &str, names: &mut NameRegistry) -> String {
        CEmitter::new(names).emit_record(&self.view(), name)
    }
}

impl fmt::Debug for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type_name", &self.layout.name)
            .field("storage", &hex::encode(&self.storage))
            .field("pointees", &self.pointees.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A contiguous C array of records, usable as the target of a bounded pointer.
#[derive(Clone)]
pub struct RecordArray<'a> {
    types: &'a TypeResolver,
    layout: &'a ResolvedRecord,
    len: usize,
    storage: Vec<u8>,
    pointees: BTreeMap<u64, Pointee<'a>>,
}

impl<'a> RecordArray<'a> {
    pub(crate) fn zeroed(types: &'a TypeResolver, layout: &'a ResolvedRecord, len: usize) -> Self {
        Self {
            types,
            layout,
            len,
            storage: vec![0u8; layout.size as usize * len],
            pointees: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &'a str {
        &self.layout.name
    }

    pub fn layout(&self) -> &'a ResolvedRecord {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.storage
    }

    pub(crate) fn writer(&mut self) -> Writer<'_, 'a> {
        Writer::new(self.types, &mut self.storage, &mut self.pointees)
    }

    pub fn get(&self, index: usize) -> Option<RecordView<'_>> {
        (index < self.len).then(|| RecordView {
            types: self.types,
            layout: self.layout,
            storage: &self.storage,
            base: index as u64 * self.layout.size,
            pointees: &self.pointees,
            active: None,
        })
    }

    pub fn views(&self) -> impl Iterator<Item = RecordView<'_>> + '_ {
        (0..self.len).filter_map(move |index| self.get(index))
    }

    pub fn to_c_code(&self, name: &str, names: &mut NameRegistry) -> String {
        CEmitter::new(names).emit_records(self.views(), self.layout, name)
    }
}

impl fmt::Debug for RecordArray<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordArray")
            .field("type_name", &self.layout.name)
            .field("len", &self.len)
            .finish()
    }
}

/// Borrowed, read-only window onto a record stored somewhere inside an instance.
#[derive(Clone, Copy)]
pub struct RecordView<'r> {
    types: &'r TypeResolver,
    layout: &'r ResolvedRecord,
    storage: &'r [u8],
    base: u64,
    pointees: &'r BTreeMap<u64, Pointee<'r>>,
    /* Union member chosen by the enclosing record's selector when the view was taken */
    active: Option<usize>,
}

impl<'r> RecordView<'r> {
    pub fn type_name(&self) -> &'r str {
        &self.layout.name
    }

    pub fn layout(&self) -> &'r ResolvedRecord {
        self.layout
    }

    pub fn types(&self) -> &'r TypeResolver {
        self.types
    }

    pub fn is_union(&self) -> bool {
        self.layout.is_union()
    }

    pub(crate) fn storage(&self) -> &'r [u8] {
        self.storage
    }

    pub(crate) fn base(&self) -> u64 {
        self.base
    }

    /// The bytes covered by this record.
    pub fn bytes(&self) -> &'r [u8] {
        let start = (self.base as usize).min(self.storage.len());
        let end = (start + self.layout.size as usize).min(self.storage.len());
        &self.storage[start..end]
    }

    pub(crate) fn field_bytes(&self, field: &ResolvedField, len: u64) -> &'r [u8] {
        let start = ((self.base + field.offset) as usize).min(self.storage.len());
        let end = (start + len as usize).min(self.storage.len());
        &self.storage[start..end]
    }

    pub(crate) fn child(&self, layout: &'r ResolvedRecord, offset: u64, active: Option<usize>) -> RecordView<'r> {
        RecordView {
            types: self.types,
            layout,
            storage: self.storage,
            base: offset,
            pointees: self.pointees,
            active,
        }
    }

    pub(crate) fn pointee_at(&self, offset: u64) -> Option<Pointee<'r>> {
        self.pointees.get(&offset).copied()
    }

    pub(crate) fn raw_integer(&self, field: &ResolvedField) -> Option<i128> {
        match &field.kind {
            FieldKind::Scalar(scalar) => {
                let int_type = scalar.integral()?;
                Some(read_integer(self.storage, self.base + field.offset, int_type, field.bits))
            }
            _ => None,
        }
    }

    /// For a union reached through a selector, the member that selector currently names.
    pub fn active(&self) -> Option<&'r ResolvedField> {
        self.active.and_then(|index| self.layout.fields.get(index))
    }

    pub fn active_value(&self) -> Option<FieldValue<'r>> {
        self.active().map(|field| decode_field(self, field))
    }

    /// View of an embedded record field, with its union selection resolved now.
    pub fn nested(&self, field: &ResolvedField) -> Option<RecordView<'r>> {
        match &field.kind {
            FieldKind::Nested { record } => {
                let layout = self.types.get_record(record)?;
                Some(self.child(layout, self.base + field.offset, active_member(self, field)))
            }
            _ => None,
        }
    }

    pub fn get(&self, name: &str) -> ReflectResult<FieldValue<'r>> {
        if let Some(field) = self.layout.field(name) {
            return Ok(decode_field(self, field));
        }
        for field in self.layout.fields.iter().filter(|f| f.transparent) {
            if let Some(member) = self.nested(field) {
                if let Some(inner) = member.layout.field(name) {
                    return Ok(decode_field(&member, inner));
                }
            }
        }
        Err(ReflectError::UnknownField {
            record: self.layout.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn fields(&self) -> Fields<'r> {
        Fields::new(*self, true)
    }
}

impl PartialEq for RecordView<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.layout.name == other.layout.name && self.bytes() == other.bytes()
    }
}

impl fmt::Debug for RecordView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordView")
            .field("type_name", &self.layout.name)
            .field("base", &self.base)
            .field("bytes", &hex::encode(self.bytes()))
            .finish()
    }
}

/* Field lookup that also sees one level into anonymous members */
pub(crate) fn find_field<'t>(
    types: &'t TypeResolver,
    layout: &'t ResolvedRecord,
    name: &str,
    base: u64,
) -> Option<(&'t ResolvedRecord, &'t ResolvedField, u64)> {
    if let Some(field) = layout.field(name) {
        return Some((layout, field, base));
    }
    layout.fields.iter().filter(|f| f.transparent).find_map(|member| {
        let FieldKind::Nested { record } = &member.kind else {
            return None;
        };
        let member_layout = types.get_record(record)?;
        member_layout
            .field(name)
            .map(|field| (member_layout, field, base + member.offset))
    })
}

pub(crate) enum Target<'t> {
    Field {
        owner: &'t ResolvedRecord,
        field: &'t ResolvedField,
        base: u64,
    },
    Element {
        layout: &'t ResolvedRecord,
        base: u64,
        label: String,
    },
}

pub(crate) fn locate<'t>(types: &'t TypeResolver, root: &'t ResolvedRecord, path: &str) -> Result<Target<'t>, CoercionError> {
    let mut segments = path.split('.').peekable();
    let mut layout = root;
    let mut base = 0u64;

    while let Some(segment) = segments.next() {
        let unknown = |record: &ResolvedRecord| CoercionError::UnknownField {
            record: record.name.clone(),
            field: segment.to_string(),
        };
        let (owner, field, owner_base) = find_field(types, layout, segment, base).ok_or_else(|| unknown(layout))?;

        if segments.peek().is_none() {
            return Ok(Target::Field { owner, field, base: owner_base });
        }

        match &field.kind {
            FieldKind::Nested { record } => {
                layout = types.get_record(record).ok_or_else(|| unknown(layout))?;
                base = owner_base + field.offset;
            }
            FieldKind::Array { element: ElementKind::Record(record), len } => {
                let element = types.get_record(record).ok_or_else(|| unknown(layout))?;
                let index_segment = segments.next().unwrap_or_default();
                let index = index_segment
                    .parse::<u64>()
                    .ok()
                    .filter(|index| index < len)
                    .ok_or_else(|| CoercionError::UnknownField {
                        record: owner.name.clone(),
                        field: format!("{}.{}", field.name, index_segment),
                    })?;
                layout = element;
                base = owner_base + field.offset + index * element.size;
                if segments.peek().is_none() {
                    return Ok(Target::Element {
                        layout,
                        base,
                        label: format!("{}.{}[{}]", owner.name, field.name, index),
                    });
                }
            }
            _ => {
                let next = segments.next().unwrap_or_default();
                return Err(CoercionError::UnknownField {
                    record: field.name.clone(),
                    field: next.to_string(),
                });
            }
        }
    }

    Err(CoercionError::UnknownField {
        record: root.name.clone(),
        field: path.to_string(),
    })
}
