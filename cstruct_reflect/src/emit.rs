/* C source emission for record instances
 *
 * Pointer targets are never rendered inline. Each distinct target becomes
 * its own top-level declaration placed ahead of the record that refers to it,
 * and the pointer site takes its address. Bounded pointers declare only the
 * elements their length currently covers.
 *
 * A union initializer names a single member: the one its selector picks, or
 * for an untagged union the largest member, which spans the whole storage.
 * The other members alias the same bytes and are not repeated.
 */

use crate::decode::{clamp, decode_field, decode_scalar, element_step, pointer_bound, read_pointer};
use crate::record::RecordView;
use crate::value::{FieldValue, Pointee};
use cstruct_layout::{ElementKind, FieldKind, PointerTarget, ResolvedField, ResolvedRecord, ScalarKind, TypeResolver};
use cstruct_types::PrimitiveType;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const INDENT: &str = "    ";
const BYTES_PER_LINE: usize = 16;

/// Names handed out to hoisted declarations.
///
/// Callers may map synthetic names (`<parent>_<field>`) to names of their own
/// choosing; any clash is resolved with a numeric suffix.
#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    renames: HashMap<String, String>,
    used: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rename(mut self, synthetic: impl Into<String>, chosen: impl Into<String>) -> Self {
        self.rename(synthetic, chosen);
        self
    }

    pub fn rename(&mut self, synthetic: impl Into<String>, chosen: impl Into<String>) {
        self.renames.insert(synthetic.into(), chosen.into());
    }

    /// Mark `name` as taken without going through the rename table.
    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn is_used(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    /// Final, unique name for a synthetic one.
    pub fn claim(&mut self, synthetic: &str) -> String {
        let base = self.renames.get(synthetic).cloned().unwrap_or_else(|| synthetic.to_string());
        if self.used.insert(base.clone()) {
            return base;
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}_{}", base, suffix);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }
}

/* Prefix every non-empty line */
fn indent(text: &str) -> String {
    text.lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{}{}", INDENT, line) })
        .collect::<Vec<_>>()
        .join("\n")
}

fn braced(entries: &[String]) -> String {
    if entries.is_empty() {
        return "{0}".to_string();
    }
    format!("{{\n{}\n}}", indent(&entries.join("\n")))
}

fn escape_byte(byte: u8, quote: char) -> String {
    match byte {
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        b'\t' => "\\t".to_string(),
        b'\\' => "\\\\".to_string(),
        b if b as char == quote => format!("\\{}", quote),
        0x20..=0x7e => (byte as char).to_string(),
        _ => format!("\\x{:02x}", byte),
    }
}

fn string_literal(bytes: &[u8]) -> String {
    let body: String = bytes.iter().map(|b| escape_byte(*b, '"')).collect();
    format!("\"{}\"", body)
}

fn byte_block(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "{0}".to_string();
    }
    let lines: Vec<String> = bytes
        .chunks(BYTES_PER_LINE)
        .map(|chunk| chunk.iter().map(|b| format!("0x{:02x},", b)).collect::<Vec<_>>().join(" "))
        .collect();
    format!("{{\n{}\n}}", indent(&lines.join("\n")))
}

fn scalar_literal(value: &FieldValue<'_>) -> String {
    match value {
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Int(v) => v.to_string(),
        FieldValue::UInt(v) => v.to_string(),
        FieldValue::Float(v) => format!("{:?}", v),
        FieldValue::Char(c) => format!("'{}'", escape_byte(*c, '\'')),
        FieldValue::Enum(e) => e.variant.clone(),
        FieldValue::Null => "0".to_string(),
        FieldValue::Address(address) => format!("(void *)0x{:x}", address),
        FieldValue::Text(text) => string_literal(text.as_bytes()),
        FieldValue::Bytes(bytes) => byte_block(bytes),
        FieldValue::List(items) => format!("{{{}}}", items.iter().map(scalar_literal).collect::<Vec<_>>().join(", ")),
        FieldValue::Record(view) => format!("/* {} */ {{0}}", view.type_name()),
    }
}

fn scalar_c_type(scalar: &ScalarKind) -> String {
    scalar.enum_name.clone().unwrap_or_else(|| scalar.prim.c_name().to_string())
}

fn record_c_type(types: &TypeResolver, record: &str) -> String {
    types.get_record(record).map_or_else(|| record.to_string(), |layout| layout.c_name.clone())
}

/* The member an initializer for a union should name, if any */
fn union_member<'r>(view: &RecordView<'r>) -> Option<&'r ResolvedField> {
    if let Some(active) = view.active() {
        return Some(active);
    }
    // Largest member so the initializer covers the whole storage; first one on ties
    let fields = &view.layout().fields;
    let largest = fields.iter().map(|f| f.size).max()?;
    fields.iter().find(|f| f.size == largest)
}

pub struct CEmitter<'n> {
    names: &'n mut NameRegistry,
    /* (address, bounded length) of every hoisted pointee and the expression that
     * refers to it. Two sites sharing a buffer under different bounds get
     * separate declarations. */
    emitted: HashMap<(u64, u64), String>,
    /* Hoisted declarations, dependencies first */
    hoisted: Vec<String>,
}

impl<'n> CEmitter<'n> {
    pub fn new(names: &'n mut NameRegistry) -> Self {
        Self {
            names,
            emitted: HashMap::new(),
            hoisted: Vec::new(),
        }
    }

    /// Declarations for every pointee followed by `const <type> <name> = {...};`.
    pub fn emit_record(mut self, view: &RecordView<'_>, name: &str) -> String {
        self.names.reserve(name);
        let init = self.record_init(view, name);
        let declaration = format!("const {} {} = {};", view.layout().c_name, name, init);
        let mut sections = std::mem::take(&mut self.hoisted);
        sections.push(declaration);
        sections.join("\n\n")
    }

    /// Same as [`CEmitter::emit_record`] for a contiguous array of records.
    pub fn emit_records<'v>(mut self, views: impl IntoIterator<Item = RecordView<'v>>, layout: &ResolvedRecord, name: &str) -> String {
        self.names.reserve(name);
        let elements: Vec<String> = views
            .into_iter()
            .enumerate()
            .map(|(index, view)| format!("{},", self.record_init(&view, &format!("{}_{}", name, index))))
            .collect();
        let declaration = format!("const {} {}[{}] = {};", layout.c_name, name, elements.len(), braced(&elements));
        let mut sections = std::mem::take(&mut self.hoisted);
        sections.push(declaration);
        sections.join("\n\n")
    }

    fn record_init(&mut self, view: &RecordView<'_>, path: &str) -> String {
        let mut entries = Vec::new();
        if view.is_union() {
            if let Some(member) = union_member(view) {
                let value = self.field_init(view, member, path);
                entries.push(format!(".{} = {},", member.name, value));
            }
            return braced(&entries);
        }

        for field in &view.layout().fields {
            self.field_entries(view, field, path, &mut entries);
        }
        braced(&entries)
    }

    /* Designated initializers contributed by one field of a structure */
    fn field_entries(&mut self, view: &RecordView<'_>, field: &ResolvedField, path: &str, entries: &mut Vec<String>) {
        let Some(member_view) = view.nested(field) else {
            let value = self.field_init(view, field, path);
            entries.push(format!(".{} = {},", field.name, value));
            return;
        };

        match (field.transparent, member_view.is_union()) {
            (true, true) => {
                if let Some(member) = union_member(&member_view) {
                    let value = self.field_init(&member_view, member, path);
                    entries.push(format!(".{} = {},", member.name, value));
                }
            }
            (true, false) => {
                for inner in &member_view.layout().fields {
                    self.field_entries(&member_view, inner, path, entries);
                }
            }
            (false, true) => {
                if let Some(member) = union_member(&member_view) {
                    let value = self.field_init(&member_view, member, &format!("{}_{}", path, field.name));
                    entries.push(format!(".{}.{} = {},", field.name, member.name, value));
                }
            }
            (false, false) => {
                let value = self.record_init(&member_view, &format!("{}_{}", path, field.name));
                entries.push(format!(".{} = {},", field.name, value));
            }
        }
    }

    /* Bare initializer for `field` of `view` */
    fn field_init(&mut self, view: &RecordView<'_>, field: &ResolvedField, path: &str) -> String {
        match &field.kind {
            FieldKind::Pointer { target, .. } => self.pointer_init(view, field, target, path),
            FieldKind::Nested { .. } => match view.nested(field) {
                Some(member) => self.record_init(&member, &format!("{}_{}", path, field.name)),
                None => "{0}".to_string(),
            },
            FieldKind::Array { element: ElementKind::Record(_), .. } => {
                let elements = match decode_field(view, field) {
                    FieldValue::List(items) => items,
                    _ => Vec::new(),
                };
                let index_names = field.index_names.as_deref().and_then(|name| view.types().get_enum(name));
                let rendered: Vec<String> = elements
                    .iter()
                    .enumerate()
                    .filter_map(|(index, item)| item.as_record().map(|element| (index, *element)))
                    .map(|(index, element)| {
                        let init = self.record_init(&element, &format!("{}_{}_{}", path, field.name, index));
                        match index_names.and_then(|e| e.def.variant_name(index as i64)) {
                            Some(label) => format!("{}, // {}", init, label),
                            None => format!("{},", init),
                        }
                    })
                    .collect();
                braced(&rendered)
            }
            FieldKind::Array { element: ElementKind::Scalar(scalar), len } if scalar.prim.is_byte() && scalar.enum_name.is_none() && scalar.prim != PrimitiveType::Char => {
                byte_block(view.field_bytes(field, *len))
            }
            _ => scalar_literal(&decode_field(view, field)),
        }
    }

    fn pointer_init(&mut self, view: &RecordView<'_>, field: &ResolvedField, target: &PointerTarget, path: &str) -> String {
        let slot = view.base() + field.offset;
        let address = read_pointer(view.storage(), slot);
        if address == 0 {
            return "NULL".to_string();
        }
        let Some(pointee) = view.pointee_at(slot).filter(|p| p.address() == address) else {
            return format!("(void *)0x{:x}", address);
        };

        // Render what a read of the field reports, not the whole borrowed buffer
        let bound = match &field.kind {
            FieldKind::Pointer { length: Some(length), .. } => Some(pointer_bound(view, length)),
            _ => None,
        };
        let (pointee, record_count) = match (pointee, bound) {
            (Pointee::Bytes(bytes), Some(count)) => (Pointee::Bytes(clamp(bytes, count, element_step(target))), 0),
            (Pointee::Records(records), Some(count)) => (pointee, count.min(records.len() as u64) as usize),
            (Pointee::Records(records), None) => (pointee, records.len()),
            (pointee, _) => (pointee, 0),
        };
        let bounded_len = match pointee {
            Pointee::Records(records) => record_count as u64 * records.layout().size,
            other => other.byte_len(),
        };

        let key = (address, bounded_len);
        if let Some(reference) = self.emitted.get(&key) {
            debug!(field = %field.name, reference = %reference, "pointee already hoisted");
            return reference.clone();
        }

        let name = self.names.claim(&format!("{}_{}", path, field.name));
        let (declaration, reference) = match pointee {
            Pointee::Record(record) => {
                let init = self.record_init(&record.view(), &name);
                (format!("const {} {} = {};", record.layout().c_name, name, init), format!("&{}", name))
            }
            Pointee::Records(records) => {
                let elements: Vec<String> = records
                    .views()
                    .take(record_count)
                    .enumerate()
                    .map(|(index, element)| format!("{},", self.record_init(&element, &format!("{}_{}", name, index))))
                    .collect();
                let declaration = format!("const {} {}[{}] = {};", records.layout().c_name, name, elements.len(), braced(&elements));
                (declaration, format!("&{}[0]", name))
            }
            Pointee::Bytes(bytes) => (self.bytes_declaration(view.types(), target, &name, bytes), format!("&{}[0]", name)),
        };

        self.hoisted.push(declaration);
        self.emitted.insert(key, reference.clone());
        reference
    }

    fn bytes_declaration(&self, types: &TypeResolver, target: &PointerTarget, name: &str, bytes: &[u8]) -> String {
        match target {
            PointerTarget::Scalar(scalar) if scalar.prim == PrimitiveType::Char => {
                format!("const char {}[{}] = {};", name, bytes.len(), string_literal(bytes))
            }
            PointerTarget::Scalar(scalar) if !scalar.prim.is_byte() || scalar.enum_name.is_some() => {
                let step = scalar.prim.size();
                let count = bytes.len() as u64 / step;
                let values: Vec<String> = (0..count).map(|i| scalar_literal(&decode_scalar(types, bytes, i * step, scalar, None))).collect();
                format!("const {} {}[{}] = {{{}}};", scalar_c_type(scalar), name, count, values.join(", "))
            }
            PointerTarget::Scalar(scalar) => format!("const {} {}[{}] = {};", scalar_c_type(scalar), name, bytes.len(), byte_block(bytes)),
            PointerTarget::Record(record) => {
                format!("/* raw bytes for {} */\nconst uint8_t {}[{}] = {};", record_c_type(types, record), name, bytes.len(), byte_block(bytes))
            }
            PointerTarget::Opaque => format!("const uint8_t {}[{}] = {};", name, bytes.len(), byte_block(bytes)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_suffixes_collisions() {
        let mut names = NameRegistry::new();
        assert_eq!(names.claim("cfg_data"), "cfg_data");
        assert_eq!(names.claim("cfg_data"), "cfg_data_2");
        assert_eq!(names.claim("cfg_data"), "cfg_data_3");
    }

    #[test]
    fn registry_applies_renames() {
        let mut names = NameRegistry::new().with_rename("cfg_cfg_data", "i2c_params");
        names.reserve("i2c_params");
        assert_eq!(names.claim("cfg_cfg_data"), "i2c_params_2");
        assert_eq!(names.claim("other"), "other");
    }

    #[test]
    fn byte_blocks_wrap_at_sixteen() {
        let bytes: Vec<u8> = (0..18).collect();
        let block = byte_block(&bytes);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("    0x00, 0x01,"));
        assert_eq!(lines[2], "    0x10, 0x11,");
    }

    #[test]
    fn literals_escape_quotes_and_controls() {
        assert_eq!(string_literal(b"a\"b\n"), "\"a\\\"b\\n\"");
        assert_eq!(scalar_literal(&FieldValue::Char(b'\'')), "'\\''");
        assert_eq!(scalar_literal(&FieldValue::Float(2.0)), "2.0");
        assert_eq!(scalar_literal(&FieldValue::Bool(true)), "true");
    }
}
