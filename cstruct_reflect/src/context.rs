/* Entry point for building record instances against a resolved type set */

use crate::errors::{ReflectError, ReflectResult};
use crate::record::{Record, RecordArray};
use crate::value::{EnumValue, HostValue};
use cstruct_layout::{check_rationality, AbiSkewError, FieldKind, ResolvedRecord, SizeProbe, TypeResolver};
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::debug;

/* Resolved types plus the size probe they are checked against */
pub struct Context {
    types: TypeResolver,
    probe: Box<dyn SizeProbe + Send + Sync>,
    /* Record names whose size already matched the probe */
    verified: RwLock<HashSet<String>>,
}

impl Context {
    /* `types` must already be resolved */
    pub fn new(types: TypeResolver, probe: impl SizeProbe + Send + Sync + 'static) -> Self {
        Self {
            types,
            probe: Box::new(probe),
            verified: RwLock::new(HashSet::new()),
        }
    }

    pub fn types(&self) -> &TypeResolver {
        &self.types
    }

    pub fn probe(&self) -> &dyn SizeProbe {
        self.probe.as_ref()
    }

    pub fn layout(&self, type_name: &str) -> ReflectResult<&ResolvedRecord> {
        self.types.get_record(type_name).ok_or_else(|| ReflectError::UnknownType {
            type_name: type_name.to_string(),
        })
    }

    fn is_verified(&self, type_name: &str) -> bool {
        self.verified.read().map(|set| set.contains(type_name)).unwrap_or(false)
    }

    fn mark_verified(&self, type_name: &str) {
        if let Ok(mut set) = self.verified.write() {
            set.insert(type_name.to_string());
        }
    }

    /* Check `type_name` and every record embedded in it, once per process */
    pub fn verify(&self, type_name: &str) -> ReflectResult<()> {
        if self.is_verified(type_name) {
            return Ok(());
        }
        let layout = self.layout(type_name)?;
        check_rationality(layout, self.probe())?;

        for field in &layout.fields {
            let embedded = match &field.kind {
                FieldKind::Nested { record } => Some(record),
                FieldKind::Array { element: cstruct_layout::ElementKind::Record(record), .. } => Some(record),
                _ => None,
            };
            if let Some(record) = embedded {
                self.verify(record)?;
            }
        }

        debug!(type_name, size = layout.size, "record size verified");
        self.mark_verified(type_name);
        Ok(())
    }

    /* Rationality results for every resolved record, in resolution order */
    pub fn check_all(&self) -> Vec<(String, Result<u64, AbiSkewError>)> {
        self.types
            .records
            .values()
            .map(|record| (record.name.clone(), check_rationality(record, self.probe())))
            .collect()
    }

    pub fn zeroed(&self, type_name: &str) -> ReflectResult<Record<'_>> {
        self.verify(type_name)?;
        let layout = self.layout(type_name)?;
        Ok(Record::zeroed(&self.types, layout))
    }

    /* Build an instance from field/value pairs; unnamed fields stay zero */
    pub fn record<'a, K, V>(&'a self, type_name: &str, fields: impl IntoIterator<Item = (K, V)>) -> ReflectResult<Record<'a>>
    where
        K: AsRef<str>,
        V: Into<HostValue<'a>>,
    {
        let mut record = self.zeroed(type_name)?;
        for (name, value) in fields {
            record.set(name.as_ref(), value)?;
        }
        Ok(record)
    }

    /* Contiguous array of records, each built from a host value like a nested field */
    pub fn record_array<'a>(&'a self, type_name: &str, items: Vec<HostValue<'a>>) -> ReflectResult<RecordArray<'a>> {
        self.verify(type_name)?;
        let layout = self.layout(type_name)?;
        let mut array = RecordArray::zeroed(&self.types, layout, items.len());
        let mut writer = array.writer();
        for (index, item) in items.into_iter().enumerate() {
            let label = format!("{}[{}]", type_name, index);
            writer.write_record(layout, index as u64 * layout.size, item, &label)?;
        }
        drop(writer);
        Ok(array)
    }

    pub fn enum_value(&self, enum_name: &str, variant: &str) -> ReflectResult<EnumValue> {
        let resolved = self.types.get_enum(enum_name).ok_or_else(|| ReflectError::UnknownType {
            type_name: enum_name.to_string(),
        })?;
        let value = resolved.def.value_of(variant).ok_or_else(|| ReflectError::UnknownField {
            record: enum_name.to_string(),
            field: variant.to_string(),
        })?;
        Ok(EnumValue::new(enum_name, variant, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstruct_layout::{NoProbe, SizeTable};
    use cstruct_types::{FieldDef, FieldType, RecordDef};

    fn resolved(records: Vec<RecordDef>) -> TypeResolver {
        let mut types = TypeResolver::new();
        for record in records {
            types.add_record(record).expect("add record");
        }
        types.resolve_all(&NoProbe).expect("resolve");
        types
    }

    fn pair() -> RecordDef {
        RecordDef::structure(
            "Pair",
            vec![FieldDef::new("a", FieldType::named("u16")), FieldDef::new("b", FieldType::named("u16"))],
        )
    }

    #[test]
    fn verification_is_cached() {
        let probe: SizeTable = [("Pair", 4u64)].into_iter().collect();
        let context = Context::new(resolved(vec![pair()]), probe);
        assert!(!context.is_verified("Pair"));
        context.zeroed("Pair").expect("sizes agree");
        assert!(context.is_verified("Pair"));
    }

    #[test]
    fn mismatched_size_refuses_instantiation() {
        let probe: SizeTable = [("Pair", 8u64)].into_iter().collect();
        let context = Context::new(resolved(vec![pair()]), probe);
        let err = context.zeroed("Pair").expect_err("size mismatch");
        assert!(matches!(err, ReflectError::AbiSkew(AbiSkewError::SizeMismatch { local: 4, native: 8, .. })));
        assert!(!context.is_verified("Pair"));
    }

    #[test]
    fn embedded_records_are_checked_too() {
        let outer = RecordDef::structure("Outer", vec![FieldDef::new("inner", FieldType::named("Pair"))]);
        let probe: SizeTable = [("Outer", 4u64), ("Pair", 2u64)].into_iter().collect();
        let context = Context::new(resolved(vec![pair(), outer]), probe);
        let err = context.zeroed("Outer").expect_err("inner mismatch");
        match err {
            ReflectError::AbiSkew(AbiSkewError::SizeMismatch { type_name, .. }) => assert_eq!(type_name, "Pair"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let context = Context::new(resolved(vec![pair()]), NoProbe);
        assert!(matches!(context.zeroed("Nope"), Err(ReflectError::UnknownType { .. })));
    }
}
