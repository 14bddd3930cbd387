/* Lazy walk over the fields of a record view */

use crate::decode::decode_field;
use crate::record::RecordView;
use crate::value::FieldValue;
use cstruct_layout::{ElementKind, FieldKind, PointerLength, PointerTarget, ResolvedField, ResolvedRecord};

/// Metadata needed to render a field without going back to the layout.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo<'r> {
    pub field: &'r ResolvedField,
    /// Record the field is declared in; differs from the iterated record for anonymous members.
    pub owner: &'r ResolvedRecord,
    pub enum_name: Option<&'r str>,
    /// Array length, or the pointee length when it is known.
    pub length: Option<u64>,
    pub index_names: Option<&'r str>,
}

impl<'r> TypeInfo<'r> {
    /// C spelling of the element type.
    pub fn element_type(&self) -> String {
        match &self.field.kind {
            FieldKind::Scalar(scalar) => scalar.enum_name.clone().unwrap_or_else(|| scalar.prim.c_name().to_string()),
            FieldKind::Array { element: ElementKind::Scalar(scalar), .. } => {
                scalar.enum_name.clone().unwrap_or_else(|| scalar.prim.c_name().to_string())
            }
            FieldKind::Array { element: ElementKind::Record(record), .. } => record.clone(),
            FieldKind::Nested { record } => record.clone(),
            FieldKind::Pointer { target: PointerTarget::Opaque, .. } => "void".to_string(),
            FieldKind::Pointer { target: PointerTarget::Scalar(scalar), .. } => scalar.prim.c_name().to_string(),
            FieldKind::Pointer { target: PointerTarget::Record(record), .. } => record.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldEntry<'r> {
    pub name: &'r str,
    pub value: FieldValue<'r>,
    pub info: TypeInfo<'r>,
}

/// Iterator over `(name, value, type info)` for each field of a view.
///
/// Anonymous members are flattened one level. A union reached through a
/// selector yields only its active member.
#[derive(Debug, Clone)]
pub struct Fields<'r> {
    view: RecordView<'r>,
    index: usize,
    flatten: bool,
    inner: Option<Box<Fields<'r>>>,
}

impl<'r> Fields<'r> {
    pub(crate) fn new(view: RecordView<'r>, flatten: bool) -> Self {
        Self {
            view,
            index: 0,
            flatten,
            inner: None,
        }
    }

    /* Start again from the first field */
    pub fn restart(&mut self) {
        self.index = 0;
        self.inner = None;
    }

    fn members(&self) -> &'r [ResolvedField] {
        let fields = &self.view.layout().fields;
        match self.view.active() {
            Some(active) => std::slice::from_ref(active),
            None => fields,
        }
    }

    fn entry(&self, field: &'r ResolvedField) -> FieldEntry<'r> {
        let value = decode_field(&self.view, field);
        let length = match &field.kind {
            FieldKind::Array { len, .. } => Some(*len),
            FieldKind::Pointer { length: Some(PointerLength::Fixed(count)), .. } => Some(*count),
            FieldKind::Pointer { length: Some(PointerLength::Field(sibling)), .. } => self
                .view
                .layout()
                .field(sibling)
                .and_then(|f| self.view.raw_integer(f))
                .map(|count| count.max(0) as u64),
            _ => None,
        };
        let enum_name = match &field.kind {
            FieldKind::Scalar(scalar) | FieldKind::Array { element: ElementKind::Scalar(scalar), .. } => scalar.enum_name.as_deref(),
            _ => None,
        };
        FieldEntry {
            name: &field.name,
            value,
            info: TypeInfo {
                field,
                owner: self.view.layout(),
                enum_name,
                length,
                index_names: field.index_names.as_deref(),
            },
        }
    }
}

impl<'r> Iterator for Fields<'r> {
    type Item = FieldEntry<'r>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                if let Some(entry) = inner.next() {
                    return Some(entry);
                }
                self.inner = None;
            }

            let field = self.members().get(self.index)?;
            self.index += 1;

            if field.transparent && self.flatten {
                if let Some(member) = self.view.nested(field) {
                    self.inner = Some(Box::new(Fields::new(member, false)));
                    continue;
                }
            }
            return Some(self.entry(field));
        }
    }
}
