/* Construction, coercion and decoding of record instances */

use cstruct_layout::{AbiSkewError, NoProbe, SizeTable, POINTER_SIZE};
use cstruct_loader::load_definitions;
use cstruct_reflect::{CoercionError, Context, FieldValue, HostValue, ReflectError};
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

/* Context whose probe reports exactly the locally resolved sizes */
fn context(name: &str) -> Context {
    let mut types = load_definitions(&[fixture(name)], &[]).expect("load definitions");
    types.resolve_all(&NoProbe).expect("resolve definitions");
    let sizes: SizeTable = types.records.values().map(|r| (r.name.clone(), r.size)).collect();
    Context::new(types, sizes)
}

#[test]
fn scalar_fields_round_trip() {
    let ctx = context("samples.yaml");
    let mut mixed = ctx.zeroed("Mixed").expect("zeroed");

    mixed.set("ratio", 1.5f32).expect("ratio");
    mixed.set("scale", -2.25f64).expect("scale");
    mixed.set("grade", "A").expect("grade");
    mixed.set("ok", true).expect("ok");
    mixed.set("temp", -1234i16).expect("temp");
    mixed.set("mode", 5u8).expect("mode");
    mixed.set("level", -3i8).expect("level");

    assert_eq!(mixed.get("ratio").expect("ratio"), FieldValue::Float(1.5));
    assert_eq!(mixed.get("scale").expect("scale"), FieldValue::Float(-2.25));
    assert_eq!(mixed.get("grade").expect("grade"), FieldValue::Char(b'A'));
    assert_eq!(mixed.get("ok").expect("ok"), FieldValue::Bool(true));
    assert_eq!(mixed.get("temp").expect("temp"), FieldValue::Int(-1234));
    assert_eq!(mixed.get("mode").expect("mode"), FieldValue::UInt(5));
    assert_eq!(mixed.get("level").expect("level"), FieldValue::Int(-3));
}

#[test]
fn bitfields_do_not_clobber_neighbours() {
    let ctx = context("samples.yaml");
    let mut mixed = ctx.zeroed("Mixed").expect("zeroed");

    mixed.set("mode", 7u8).expect("mode");
    mixed.set("level", -8i8).expect("level");
    mixed.set("mode", 2u8).expect("mode again");

    assert_eq!(mixed.get("mode").expect("mode"), FieldValue::UInt(2));
    assert_eq!(mixed.get("level").expect("level"), FieldValue::Int(-8));
}

#[test]
fn out_of_range_values_are_rejected() {
    let ctx = context("samples.yaml");
    let mut mixed = ctx.zeroed("Mixed").expect("zeroed");

    match mixed.set("mode", 8u8) {
        Err(ReflectError::Coercion(CoercionError::OutOfRange { field, value, min, max })) => {
            assert_eq!(field, "Mixed.mode");
            assert_eq!((value, min, max), (8, 0, 7));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(matches!(
        mixed.set("temp", 40000u32),
        Err(ReflectError::Coercion(CoercionError::OutOfRange { .. }))
    ));
    assert!(matches!(
        mixed.set("ok", 2u8),
        Err(ReflectError::Coercion(CoercionError::OutOfRange { .. }))
    ));
    assert!(matches!(
        mixed.set("ratio", "fast"),
        Err(ReflectError::Coercion(CoercionError::TypeMismatch { actual: "text", .. }))
    ));
    assert_eq!(mixed.get("mode").expect("mode"), FieldValue::UInt(0), "failed writes leave the field untouched");
}

#[test]
fn enum_fields_accept_values_and_variant_names() {
    let ctx = context("iface.yaml");
    let mut cfg = ctx.zeroed("ATCAIfaceCfg").expect("zeroed");

    let swi = ctx.enum_value("ATCAIfaceType", "ATCA_SWI_IFACE").expect("variant");
    cfg.set("iface_type", swi).expect("enum value");
    cfg.set("devtype", "ATECC608B").expect("variant name");

    match cfg.get("iface_type").expect("iface_type") {
        FieldValue::Enum(value) => assert_eq!((value.variant.as_str(), value.value), ("ATCA_SWI_IFACE", 1)),
        other => panic!("unexpected value: {other:?}"),
    }
    match cfg.get("devtype").expect("devtype") {
        FieldValue::Enum(value) => {
            assert_eq!(value.value, 3);
            assert_eq!(value.variant, "ATECC608A", "aliases decode to the first declared name");
        }
        other => panic!("unexpected value: {other:?}"),
    }

    assert!(matches!(
        cfg.set("devtype", "ATECC999"),
        Err(ReflectError::Coercion(CoercionError::UnknownVariant { .. }))
    ));
    let kit = ctx.enum_value("ATCAKitType", "ATCA_KIT_I2C_IFACE").expect("kit variant");
    assert!(matches!(
        cfg.set("devtype", kit),
        Err(ReflectError::Coercion(CoercionError::TypeMismatch { .. }))
    ));
}

#[test]
fn undeclared_enum_values_decode_as_raw_integers() {
    let ctx = context("iface.yaml");
    let mut cfg = ctx.zeroed("ATCAIfaceCfg").expect("zeroed");

    cfg.set("devtype", 17u32).expect("raw value");
    assert_eq!(cfg.get("devtype").expect("devtype"), FieldValue::UInt(17));
}

#[test]
fn every_record_passes_rationality_against_matching_sizes() {
    let ctx = context("iface.yaml");
    let results = ctx.check_all();
    assert!(!results.is_empty());
    for (name, result) in results {
        assert!(result.is_ok(), "{name} should match");
    }
}

#[test]
fn mismatched_native_size_is_fatal() {
    let mut types = load_definitions(&[fixture("samples.yaml")], &[]).expect("load definitions");
    types.resolve_all(&NoProbe).expect("resolve definitions");
    let sizes: SizeTable = [("Sample", 2 * POINTER_SIZE + 1)].into_iter().collect();
    let ctx = Context::new(types, sizes);

    let err = ctx.zeroed("Sample").expect_err("size mismatch");
    match &err {
        ReflectError::AbiSkew(AbiSkewError::SizeMismatch { type_name, local, native }) => {
            assert_eq!(type_name, "Sample");
            assert_eq!(*local, 2 * POINTER_SIZE);
            assert_eq!(*native, 2 * POINTER_SIZE + 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("STRUCTURE RATIONALITY CHECK FAILED!"));
}

#[test]
fn tagged_union_follows_selector_without_rebuilding() {
    let ctx = context("iface.yaml");
    let mut cfg = ctx.zeroed("ATCAIfaceCfg").expect("zeroed");

    cfg.set("iface_type", "ATCA_I2C_IFACE").expect("iface_type");
    cfg.set(
        "cfg",
        HostValue::map([(
            "atcai2c",
            HostValue::map([
                ("slave_address", HostValue::from(0xC0u8)),
                ("bus", HostValue::from(1u8)),
                ("baud", HostValue::from(100_000u32)),
            ]),
        )]),
    )
    .expect("cfg");

    let params = cfg.get("cfg").expect("cfg");
    let union = params.as_record().expect("union view");
    assert_eq!(union.active().map(|f| f.name.as_str()), Some("atcai2c"));
    let i2c = union.active_value().expect("active value");
    assert_eq!(i2c.as_record().expect("i2c").get("baud").expect("baud"), FieldValue::UInt(100_000));

    cfg.set("iface_type", "ATCA_SWI_IFACE").expect("switch interface");

    let params = cfg.get("cfg").expect("cfg");
    let union = params.as_record().expect("union view");
    assert_eq!(union.active().map(|f| f.name.as_str()), Some("atcaswi"));
    let swi = union.active_value().expect("active value");
    assert_eq!(swi.as_record().expect("swi").get("bus").expect("bus"), FieldValue::UInt(0xC0));

    cfg.set("iface_type", "ATCA_SPI_IFACE").expect("unmapped interface");
    let params = cfg.get("cfg").expect("cfg");
    assert!(params.as_record().expect("union view").active().is_none());
}

#[test]
fn dotted_paths_reach_nested_fields() {
    let ctx = context("iface.yaml");
    let mut cfg = ctx.zeroed("ATCAIfaceCfg").expect("zeroed");

    cfg.set("cfg.atcahid.vid", 0x03EBu32).expect("vid");
    cfg.set("cfg.atcahid.dev_interface", "ATCA_KIT_I2C_IFACE").expect("dev_interface");

    let params = cfg.get("cfg").expect("cfg");
    let hid = params.as_record().expect("union").get("atcahid").expect("hid");
    let hid = hid.as_record().expect("hid view");
    assert_eq!(hid.get("vid").expect("vid"), FieldValue::UInt(0x03EB));
    assert!(matches!(
        cfg.set("cfg.atcahid.serial", 1u8),
        Err(ReflectError::Coercion(CoercionError::UnknownField { .. }))
    ));
}

#[test]
fn anonymous_union_members_read_through_the_parent() {
    let ctx = context("samples.yaml");
    let mut packet = ctx.zeroed("Packet").expect("zeroed");

    packet.set("kind", 0u8).expect("kind");
    packet.set("word", 0x0102_0304u32).expect("word through anonymous member");
    assert_eq!(packet.get("word").expect("word"), FieldValue::UInt(0x0102_0304));

    let names: Vec<&str> = packet.fields().map(|entry| entry.name).collect();
    assert_eq!(names, vec!["kind", "word"]);

    packet.set("kind", 1u8).expect("kind");
    let entries: Vec<_> = packet.fields().collect();
    assert_eq!(entries.iter().map(|e| e.name).collect::<Vec<_>>(), vec!["kind", "raw"]);
    let expected: Vec<FieldValue> = 0x0102_0304u32.to_ne_bytes().iter().map(|b| FieldValue::UInt(*b as u64)).collect();
    assert_eq!(entries[1].value.as_list().expect("raw list"), expected.as_slice());
    assert_eq!(entries[1].info.owner.name, "Body");
}

#[test]
fn unions_take_the_raw_image_of_an_integer() {
    let ctx = context("samples.yaml");
    let mut packet = ctx.zeroed("Packet").expect("zeroed");

    packet.set("body", 0x0403_0201u32).expect("integer into union");
    packet.set("kind", 0u8).expect("kind");
    assert_eq!(packet.get("word").expect("word"), FieldValue::UInt(0x0403_0201));

    packet.set("kind", 1u8).expect("kind");
    let expected: Vec<FieldValue> = 0x0403_0201u32.to_ne_bytes().iter().map(|b| FieldValue::UInt(*b as u64)).collect();
    assert_eq!(packet.get("raw").expect("raw").as_list().expect("raw list"), expected.as_slice());

    assert!(matches!(
        packet.set("body", 1u64 << 32),
        Err(ReflectError::Coercion(CoercionError::OutOfRange { .. }))
    ));
    assert_eq!(packet.get("word").expect("word"), FieldValue::UInt(0x0403_0201), "rejected write leaves storage alone");
}

#[test]
fn odd_sized_records_take_the_low_bytes_of_an_integer() {
    let ctx = context("samples.yaml");
    let mut holder = ctx.zeroed("TriHolder").expect("zeroed");

    holder.set("t", 0x0003_0201u32).expect("integer into three byte record");
    let image = 0x0003_0201u64.to_ne_bytes();
    let low = if cfg!(target_endian = "big") { &image[5..] } else { &image[..3] };
    let tri = holder.get("t").expect("t");
    let tri = tri.as_record().expect("tri view");
    assert_eq!(tri.bytes(), low);
    assert_eq!(tri.get("a").expect("a"), FieldValue::UInt(low[0] as u64));

    let otp = ctx.enum_value("SlotIndex", "SLOT_OTP").expect("enum value");
    holder.set("t", otp).expect("enum into record");
    let image = 2u64.to_ne_bytes();
    let low = if cfg!(target_endian = "big") { &image[5..] } else { &image[..3] };
    assert_eq!(holder.get("t").expect("t").as_record().expect("tri view").bytes(), low);

    assert!(matches!(
        holder.set("t", 0x0100_0000u32),
        Err(ReflectError::Coercion(CoercionError::OutOfRange { max: 0xFF_FFFF, .. }))
    ));
    assert!(matches!(
        holder.set("m", 5u8),
        Err(ReflectError::Coercion(CoercionError::TypeMismatch { .. }))
    ));
}

#[test]
fn field_iteration_is_restartable() {
    let ctx = context("samples.yaml");
    let table = ctx.zeroed("SlotTable").expect("zeroed");

    let mut fields = table.fields();
    let first: Vec<&str> = fields.by_ref().map(|entry| entry.name).collect();
    fields.restart();
    let second: Vec<&str> = fields.map(|entry| entry.name).collect();
    assert_eq!(first, vec!["label", "slots", "zone"]);
    assert_eq!(first, second);

    let slots = table.fields().find(|entry| entry.name == "slots").expect("slots");
    assert_eq!(slots.info.length, Some(3));
    assert_eq!(slots.info.index_names, Some("SlotIndex"));
    assert_eq!(slots.info.element_type(), "Slot");
    let zone = table.fields().find(|entry| entry.name == "zone").expect("zone");
    assert_eq!(zone.info.enum_name, Some("DeviceZone"));
}

#[test]
fn arrays_require_the_declared_length() {
    let ctx = context("samples.yaml");
    let mut table = ctx.zeroed("SlotTable").expect("zeroed");

    let slot = |key: u16, locked: bool| HostValue::map([("key", HostValue::from(key)), ("locked", HostValue::from(locked))]);
    table.set("slots", vec![slot(1, false), slot(2, true), slot(3, false)]).expect("three slots");

    let slots = table.get("slots").expect("slots");
    let keys: Vec<FieldValue> = slots
        .as_list()
        .expect("list")
        .iter()
        .map(|s| s.as_record().expect("slot").get("key").expect("key"))
        .collect();
    assert_eq!(keys, vec![FieldValue::UInt(1), FieldValue::UInt(2), FieldValue::UInt(3)]);

    match table.set("slots", vec![slot(1, false), slot(2, true)]) {
        Err(ReflectError::Coercion(CoercionError::LengthMismatch { expected, actual, .. })) => {
            assert_eq!((expected, actual), (3, 2));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    table.set("slots.1.key", 42u16).expect("element path");
    let slots = table.get("slots").expect("slots");
    let second = slots.as_list().expect("list")[1].as_record().expect("slot").get("key").expect("key");
    assert_eq!(second, FieldValue::UInt(42));
}

#[test]
fn char_arrays_take_ascii_text() {
    let ctx = context("samples.yaml");
    let mut table = ctx.zeroed("SlotTable").expect("zeroed");

    table.set("label", "ECC608").expect("label");
    assert_eq!(table.get("label").expect("label"), FieldValue::Text("ECC608".to_string()));

    table.set("label", "much-too-long-label").expect("truncated label");
    assert_eq!(table.get("label").expect("label"), FieldValue::Text("much-too".to_string()));

    assert!(matches!(
        table.set("label", "caf\u{e9}"),
        Err(ReflectError::Coercion(CoercionError::NonAscii { .. }))
    ));
}

#[test]
fn id_flags_data_record_round_trips() {
    let ctx = context("samples.yaml");
    let data = [0x01u8, 0x02, 0x03, 0x04];
    let record = ctx
        .record(
            "Sample",
            [
                ("id", HostValue::from(5u8)),
                ("flags", HostValue::from(1u8)),
                ("data", HostValue::pointer(&data[..])),
            ],
        )
        .expect("construct sample");

    assert_eq!(record.as_bytes().len() as u64, 2 * POINTER_SIZE);
    assert_eq!(record.get("id").expect("id"), FieldValue::UInt(5));
    assert_eq!(record.get("flags").expect("flags"), FieldValue::UInt(1));
    assert_eq!(record.get("data").expect("data").as_bytes(), Some(&data[..]));

    let short = [0u8; 3];
    let mut other = ctx.zeroed("Sample").expect("zeroed");
    assert!(matches!(
        other.set("data", HostValue::pointer(&short[..])),
        Err(ReflectError::Coercion(CoercionError::LengthMismatch { expected: 4, actual: 3, .. }))
    ));
}

#[test]
fn pointer_length_follows_sibling_field() {
    let ctx = context("samples.yaml");
    let items = [9u8, 8, 7, 6, 5];
    let mut blob = ctx
        .record("Blob", [("count", HostValue::from(3u8)), ("items", HostValue::pointer(&items[..]))])
        .expect("construct blob");

    assert_eq!(blob.get("items").expect("items").as_bytes(), Some(&items[..3]));

    blob.set("count", 200u8).expect("count");
    assert_eq!(blob.get("items").expect("items").as_bytes(), Some(&items[..]), "never reads past the pointee");

    blob.set("items", HostValue::Null).expect("null");
    assert!(blob.get("items").expect("items").is_null());
}

#[test]
fn record_pointers_dereference_to_views() {
    let ctx = context("samples.yaml");
    let mut table = ctx.zeroed("SlotTable").expect("zeroed");
    table.set("zone", "ZONE_DATA").expect("zone");

    let holder = ctx
        .record("Holder", [("table", HostValue::pointer(&table)), ("handle", HostValue::from(0x1000u64))])
        .expect("construct holder");

    let target = holder.get("table").expect("table");
    let target = target.as_record().expect("record view");
    assert_eq!(target.type_name(), "SlotTable");
    match target.get("zone").expect("zone") {
        FieldValue::Enum(zone) => assert_eq!(zone.variant, "ZONE_DATA"),
        other => panic!("unexpected value: {other:?}"),
    }
    assert_eq!(holder.get("handle").expect("handle"), FieldValue::Address(0x1000));

    let mut wrong = ctx.zeroed("Holder").expect("zeroed");
    let slot = ctx.zeroed("Slot").expect("slot");
    assert!(matches!(
        wrong.set("table", HostValue::pointer(&slot)),
        Err(ReflectError::Coercion(CoercionError::TypeMismatch { .. }))
    ));
}

#[test]
fn update_from_buffer_replaces_contents() {
    let ctx = context("samples.yaml");
    let data = [1u8, 2, 3, 4];
    let mut record = ctx
        .record("Sample", [("id", HostValue::from(1u8)), ("data", HostValue::pointer(&data[..]))])
        .expect("construct sample");

    let mut image = record.as_bytes().to_vec();
    image[0] = 77;
    record.update_from_buffer(&image).expect("same size buffer");
    assert_eq!(record.get("id").expect("id"), FieldValue::UInt(77));
    assert_eq!(record.get("data").expect("data").as_bytes(), Some(&data[..]), "pointer slot unchanged");

    let zeroed = vec![0u8; image.len() + 4];
    record.update_from_buffer(&zeroed).expect("longer buffer");
    assert!(record.get("data").expect("data").is_null());

    match record.update_from_buffer(&image[..2]) {
        Err(ReflectError::BufferTooSmall { required, available, .. }) => {
            assert_eq!((required, available), (2 * POINTER_SIZE, 2));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn unknown_fields_are_usage_errors() {
    let ctx = context("samples.yaml");
    let mut sample = ctx.zeroed("Sample").expect("zeroed");

    assert!(matches!(sample.get("nope"), Err(ReflectError::UnknownField { .. })));
    assert!(matches!(
        sample.set("nope", 1u8),
        Err(ReflectError::Coercion(CoercionError::UnknownField { .. }))
    ));
    assert!(matches!(
        ctx.record("Sample", [("bogus", HostValue::from(1u8))]),
        Err(ReflectError::Coercion(CoercionError::UnknownField { .. }))
    ));
}

#[test]
fn records_print_as_indented_trees() {
    let ctx = context("samples.yaml");
    let data = [0xAAu8, 0xBB, 0xCC, 0xDD];
    let record = ctx
        .record("Sample", [("id", HostValue::from(5u8)), ("data", HostValue::pointer(&data[..]))])
        .expect("construct sample");

    let printed = record.to_string();
    assert!(printed.starts_with("Sample = "));
    assert!(printed.contains("\n  id = 5"));
    assert!(printed.contains("\n  data = 0xaabbccdd"));

    let json = cstruct_reflect::format_record(&record.view());
    assert_eq!(json.type_name, "Sample");
    assert_eq!(json.value["data"], serde_json::json!("0xaabbccdd"));
}
