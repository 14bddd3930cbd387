use cstruct_layout::{check_rationality, SizeProbe};
use cstruct_loader::{load_definitions, load_size_table, DefinitionLoader, LoaderError};
use std::fs;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn imports_load_before_importer() {
    let mut loader = DefinitionLoader::new(Vec::new());
    loader
        .load_file_with_imports(&fixture("hid.yaml"))
        .expect("load hid definitions");

    let names: Vec<String> = loader
        .files()
        .map(|(path, _)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["common.yaml", "hid.yaml"]);
    assert_eq!(loader.loaded_file_count(), 2);
}

#[test]
fn loaded_definitions_resolve_and_match_size_table() {
    let mut resolver = load_definitions(&[fixture("hid.yaml")], &[]).expect("load definitions");
    let sizes = load_size_table(&fixture("sizes.yaml")).expect("load sizes");
    resolver.resolve_all(&sizes).expect("resolve");

    assert_eq!(sizes.probe_size("ATCAHID"), Some(24));
    let hid = resolver.get_record("ATCAHID").expect("hid record");
    assert_eq!(check_rationality(hid, &sizes).expect("sizes agree"), 24);
}

#[test]
fn imports_fall_back_to_include_dirs() {
    let include = tempfile::tempdir().expect("include dir");
    let work = tempfile::tempdir().expect("work dir");
    fs::copy(fixture("common.yaml"), include.path().join("common.yaml")).expect("copy common");
    let root = work.path().join("root.yaml");
    fs::write(
        &root,
        "imports: [common.yaml]\nrecords:\n  - name: Kit\n    fields:\n      - { name: kind, type: ATCAKitType }\n",
    )
    .expect("write root");

    let missing = load_definitions(&[root.clone()], &[]).expect_err("common.yaml is not next to root");
    assert!(matches!(missing, LoaderError::ImportNotFound { .. }));

    let mut resolver =
        load_definitions(&[root], &[include.path().to_path_buf()]).expect("load through include dir");
    resolver.resolve_all(&cstruct_layout::NoProbe).expect("resolve");
    assert_eq!(resolver.get_record("Kit").expect("kit").size, 4);
}

#[test]
fn circular_imports_terminate() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("a.yaml"),
        "imports: [b.yaml]\nrecords:\n  - name: A\n    fields:\n      - { name: x, type: u8 }\n",
    )
    .expect("write a");
    fs::write(
        dir.path().join("b.yaml"),
        "imports: [a.yaml]\nrecords:\n  - name: B\n    fields:\n      - { name: a, type: A }\n",
    )
    .expect("write b");

    let mut resolver = load_definitions(&[dir.path().join("a.yaml")], &[]).expect("load");
    resolver.resolve_all(&cstruct_layout::NoProbe).expect("resolve");
    assert_eq!(resolver.get_record("B").expect("b").size, 1);
}

#[test]
fn duplicate_definitions_across_files_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first.yaml");
    let second = dir.path().join("second.yaml");
    fs::write(&first, "records:\n  - name: Dup\n    fields:\n      - { name: x, type: u8 }\n").expect("write");
    fs::write(&second, "records:\n  - name: Dup\n    fields:\n      - { name: y, type: u8 }\n").expect("write");

    let err = load_definitions(&[first, second], &[]).expect_err("duplicate");
    assert!(matches!(err, LoaderError::Config(_)));
}

#[test]
fn malformed_yaml_names_the_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let bad = dir.path().join("bad.yaml");
    fs::write(&bad, "records: [ { name: X, fields: ").expect("write");

    let err = load_definitions(&[bad], &[]).expect_err("malformed");
    match err {
        LoaderError::Yaml { path, .. } => assert!(path.ends_with("bad.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}
