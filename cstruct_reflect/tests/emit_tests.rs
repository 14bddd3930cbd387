/* C source emission */

use cstruct_layout::{NoProbe, SizeTable};
use cstruct_loader::load_definitions;
use cstruct_reflect::{Context, HostValue, NameRegistry};
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn context(name: &str) -> Context {
    let mut types = load_definitions(&[fixture(name)], &[]).expect("load definitions");
    types.resolve_all(&NoProbe).expect("resolve definitions");
    let sizes: SizeTable = types.records.values().map(|r| (r.name.clone(), r.size)).collect();
    Context::new(types, sizes)
}

#[test]
fn pointee_is_hoisted_ahead_of_the_record() {
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

    let code = record.to_c_code("rec", &mut NameRegistry::new());
    let expected = "\
const uint8_t rec_data[4] = {
    0x01, 0x02, 0x03, 0x04,
};

const Sample rec = {
    .id = 5,
    .flags = 1,
    .data = &rec_data[0],
};";
    assert_eq!(code, expected);
}

#[test]
fn shared_pointee_is_declared_once() {
    let ctx = context("samples.yaml");
    let data = [0xdeu8, 0xad, 0xbe, 0xef];
    let twin = ctx
        .record(
            "Twin",
            [("first", HostValue::pointer(&data[..])), ("second", HostValue::pointer(&data[..]))],
        )
        .expect("construct twin");

    let code = twin.to_c_code("twin", &mut NameRegistry::new());
    assert_eq!(code.matches("const uint8_t").count(), 1);
    assert!(code.contains(".first = &twin_first[0],"));
    assert!(code.contains(".second = &twin_first[0],"));
}

#[test]
fn nested_pointees_come_first() {
    let ctx = context("samples.yaml");
    let mut table = ctx.zeroed("SlotTable").expect("zeroed");
    table.set("label", "keys").expect("label");
    table.set("zone", "ZONE_OTP").expect("zone");
    let holder = ctx
        .record("Holder", [("table", HostValue::pointer(&table))])
        .expect("construct holder");

    let code = holder.to_c_code("holder", &mut NameRegistry::new());
    let table_at = code.find("const SlotTable holder_table = {").expect("hoisted table");
    let holder_at = code.find("const Holder holder = {").expect("holder");
    assert!(table_at < holder_at);
    assert!(code.contains(".label = \"keys\","));
    assert!(code.contains(".zone = ZONE_OTP,"));
    assert!(code.contains(".table = &holder_table,"));
    assert!(code.contains(".handle = NULL,"));
}

#[test]
fn enum_indexed_arrays_are_annotated() {
    let ctx = context("samples.yaml");
    let table = ctx.zeroed("SlotTable").expect("zeroed");

    let code = table.to_c_code("table", &mut NameRegistry::new());
    assert!(code.contains("}, // SLOT_CONFIG"));
    assert!(code.contains("}, // SLOT_DATA"));
    assert!(code.contains("}, // SLOT_OTP"));
    assert!(code.contains(".locked = false,"));
}

#[test]
fn tagged_union_renders_only_the_active_member() {
    let ctx = context("iface.yaml");
    let mut cfg = ctx.zeroed("ATCAIfaceCfg").expect("zeroed");
    cfg.set("iface_type", "ATCA_I2C_IFACE").expect("iface_type");
    cfg.set("devtype", "ATECC608A").expect("devtype");
    cfg.set("cfg.atcai2c.slave_address", 0xC0u8).expect("address");
    cfg.set("cfg.atcai2c.baud", 400_000u32).expect("baud");

    let code = cfg.to_c_code("cfg_ateccx08a_i2c_default", &mut NameRegistry::new());
    assert!(code.starts_with("const ATCAIfaceCfg cfg_ateccx08a_i2c_default = {"));
    assert!(code.contains(".iface_type = ATCA_I2C_IFACE,"));
    assert!(code.contains(".cfg.atcai2c = {"));
    assert!(code.contains(".slave_address = 192,"));
    assert!(code.contains(".baud = 400000,"));
    assert!(!code.contains("atcaswi"));
    assert!(code.contains(".cfg_data = NULL,"));
    assert!(code.ends_with("};"));
}

#[test]
fn anonymous_union_renders_without_prefix() {
    let ctx = context("samples.yaml");
    let packet = ctx
        .record("Packet", [("kind", HostValue::from(0u8)), ("word", HostValue::from(7u32))])
        .expect("construct packet");

    let code = packet.to_c_code("packet", &mut NameRegistry::new());
    assert!(code.contains(".kind = 0,"));
    assert!(code.contains(".word = 7,"));
    assert!(!code.contains(".body"));
}

#[test]
fn registry_renames_and_deduplicates_names() {
    let ctx = context("samples.yaml");
    let data = [1u8, 2, 3, 4];
    let sample = ctx
        .record("Sample", [("data", HostValue::pointer(&data[..]))])
        .expect("construct sample");

    let mut names = NameRegistry::new().with_rename("rec_data", "payload");
    let first = sample.to_c_code("rec", &mut names);
    assert!(first.contains("const uint8_t payload[4]"));
    assert!(first.contains(".data = &payload[0],"));

    let second = sample.to_c_code("rec_copy", &mut names);
    assert!(second.contains("const uint8_t rec_copy_data[4]"));

    let third = sample.to_c_code("rec", &mut names);
    assert!(third.contains("const uint8_t payload_2[4]"));
}

#[test]
fn record_arrays_emit_as_c_arrays() {
    let ctx = context("samples.yaml");
    let slot = |key: u16| HostValue::map([("key", HostValue::from(key))]);
    let slots = ctx.record_array("Slot", vec![slot(1), slot(2)]).expect("slot array");

    let code = slots.to_c_code("slots", &mut NameRegistry::new());
    assert!(code.starts_with("const Slot slots[2] = {"));
    assert!(code.contains(".key = 1,"));
    assert!(code.contains(".key = 2,"));
}

#[test]
fn bounded_pointees_declare_only_the_counted_elements() {
    let ctx = context("samples.yaml");
    let buffer = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let blob = ctx
        .record("Blob", [("count", HostValue::from(2u8)), ("items", HostValue::pointer(&buffer[..]))])
        .expect("construct blob");
    assert_eq!(blob.get("items").expect("items").as_bytes(), Some(&buffer[..2]));

    let code = blob.to_c_code("blob", &mut NameRegistry::new());
    assert!(code.contains("const uint8_t blob_items[2] = {\n    0x01, 0x02,\n};"));
    assert!(!code.contains("0x03"));
}

#[test]
fn bounded_record_arrays_declare_only_the_counted_records() {
    let ctx = context("samples.yaml");
    let slot = |key: u16| HostValue::map([("key", HostValue::from(key))]);
    let slots = ctx.record_array("Slot", vec![slot(1), slot(2), slot(3)]).expect("slot array");
    let list = ctx
        .record("SlotList", [("count", HostValue::from(2u8)), ("slots", HostValue::pointer(&slots))])
        .expect("construct slot list");

    let code = list.to_c_code("list", &mut NameRegistry::new());
    assert!(code.contains("const Slot list_slots[2] = {"));
    assert!(code.contains(".key = 2,"));
    assert!(!code.contains(".key = 3,"));
    assert!(code.contains(".slots = &list_slots[0],"));
}

#[test]
fn shared_buffer_under_different_bounds_is_declared_per_bound() {
    let ctx = context("samples.yaml");
    let buffer = [1u8, 2, 3, 4, 5, 6];
    let short = ctx
        .record("Blob", [("count", HostValue::from(2u8)), ("items", HostValue::pointer(&buffer[..]))])
        .expect("short blob");
    let long = ctx
        .record("Blob", [("count", HostValue::from(4u8)), ("items", HostValue::pointer(&buffer[..]))])
        .expect("long blob");
    let pair = ctx
        .record_array("Blob", vec![HostValue::Record(short), HostValue::Record(long)])
        .expect("blob pair");

    let code = pair.to_c_code("pair", &mut NameRegistry::new());
    assert_eq!(code.matches("const uint8_t").count(), 2);
    assert!(code.contains("const uint8_t pair_0_items[2] = {"));
    assert!(code.contains("const uint8_t pair_1_items[4] = {"));
}
