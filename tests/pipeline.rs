use std::{collections::HashMap, fs, path::Path};

use rstest::rstest;
use xdrgen::{
    ast::{File, FieldShape, Size},
    batch::{merge_all, parse_all, plan_imports},
    merger::Merger,
    resolver::{DependencyGraph, DependencyResolver, PrefixNaming, ResolverConfig, TypeNaming},
};

fn read_sources(names: &[&str]) -> Vec<(String, String)> {
    names
        .iter()
        .map(|name| {
            let path = Path::new("tests/data").join(name);
            match fs::read_to_string(&path) {
                Ok(text) => (name.to_string(), text),
                Err(e) => panic!("{}: {e}", path.display()),
            }
        })
        .collect()
}

// Every type goes to a Dart file named after the XDR file defining it.
fn assign_by_source(files: &[File]) -> HashMap<String, String> {
    let naming = PrefixNaming::default();
    let mut assignment = HashMap::new();
    for file in files {
        let dart = format!("{}.dart", file.filename.trim_end_matches(".x"));
        for def in file.definitions.iter().filter(|d| d.is_type()) {
            assignment.insert(naming.class_name(def.name()), dart.clone());
        }
    }
    assignment
}

fn build_graph(files: &[File]) -> DependencyGraph {
    DependencyResolver::new(PrefixNaming::default(), ResolverConfig::default())
        .build_graph(files, &assign_by_source(files))
}

#[test]
fn parse_fixtures() {
    let batch = parse_all(&read_sources(&["types.x", "ledger.x"]));
    if !batch.report.is_success() {
        panic!("{}", batch.report);
    }
    assert!(batch.unresolved.is_empty());

    let types = &batch.files[0];
    assert_eq!(types.namespace.as_deref(), Some("stellar"));
    let counts = types.counts();
    assert_eq!(
        (counts.constants, counts.typedefs, counts.enums, counts.structs, counts.unions),
        (1, 2, 1, 1, 1)
    );

    let ledger = &batch.files[1];
    let names: Vec<_> = ledger.definitions.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["LedgerEntryType", "Signer", "AccountEntryExt", "AccountEntry"]);

    let account = ledger.structs().find(|s| s.name == "AccountEntry").unwrap();
    let fields = &account.fields;
    assert!(fields[1].is_unbounded_array());
    assert_eq!(
        fields[2].shape,
        FieldShape::VariableArray(Some(Size::Named("MAX_SIGNERS".to_string())))
    );
    assert_eq!(fields[3].max_length(), Some(32));
    assert!(fields[4].is_optional());
    assert_eq!(fields[5].name, "ext");
    assert_eq!(fields[5].type_name(), "AccountEntryExt");
}

#[rstest]
#[case("ACCOUNT", Some(0))]
#[case("TRUSTLINE", Some(1))]
#[case("SIGNER_SLOT", Some(20))]
fn enum_values_resolve_across_files(#[case] value_name: &str, #[case] expected: Option<i64>) {
    let batch = parse_all(&read_sources(&["types.x", "ledger.x"]));
    let entry_type = batch.files[1].enums().next().unwrap();
    let value = entry_type.values.iter().find(|v| v.name == value_name).unwrap();
    assert_eq!(value.value(), expected);
}

#[test]
fn unknown_enum_reference_is_a_warning() {
    let mut sources = read_sources(&["types.x"]);
    sources.push(("broken.x".to_string(), "enum Broken { X = NOWHERE, Y = X };".to_string()));
    let batch = parse_all(&sources);

    assert!(batch.report.is_success());
    assert_eq!(batch.report.warnings, 2);
    let symbols: Vec<_> = batch.unresolved.iter().map(|u| u.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["NOWHERE", "X"]);
}

#[test]
fn dependency_graph_orders_files() {
    let batch = parse_all(&read_sources(&["types.x", "ledger.x"]));
    let graph = build_graph(&batch.files);

    assert!(graph.detect_cycles().is_empty());
    assert!(graph.validate().is_empty());
    assert!(graph.types.has_edge("XdrAccountEntry", "XdrAccountEntryExt"));
    assert!(graph.types.has_edge("XdrAccountEntryExt", "XdrUint64"));
    assert!(graph.types.has_edge("XdrAsset", "XdrAssetType"));
    assert!(!graph.types.has_edge("XdrAccountEntry", "XdrAccountEntry"));
    assert_eq!(graph.file_of("XdrSigner"), Some("ledger.dart"));

    assert_eq!(
        graph.topological_order().unwrap(),
        vec!["types.dart", "ledger.dart"]
    );
    assert_eq!(graph.import_set("ledger.dart"), vec!["types.dart", "xdr_data_io.dart"]);
    assert_eq!(graph.import_set("types.dart"), vec!["xdr_data_io.dart"]);

    let plan = plan_imports(&graph);
    assert!(plan.failed.is_empty());
    assert_eq!(plan.order, vec!["types.dart", "ledger.dart"]);
}

#[test]
fn cross_file_cycle_is_reported() {
    let mut sources = read_sources(&["types.x", "ledger.x"]);
    // A base type that points back at the ledger file.
    sources.push(("extra.x".to_string(), "struct Fee { Signer payer; };".to_string()));
    let batch = parse_all(&sources);
    let mut files = batch.files;
    files[2].filename = "types.x".to_string();
    let graph = build_graph(&files);

    assert_eq!(
        graph.detect_cycles(),
        vec![("ledger.dart".to_string(), "types.dart".to_string())]
    );
    assert!(graph.topological_order().is_err());

    let plan = plan_imports(&graph);
    assert!(plan.order.is_empty());
    assert_eq!(plan.failed.len(), 2);
}

#[test]
fn merge_keeps_custom_code_across_regeneration() {
    let dir = tempfile::tempdir().unwrap();
    let existing = "\
// Hand-tuned asset helpers.

import 'dart:convert';
import 'xdr_data_io.dart';

class XdrAsset {
  XdrAssetType type;

  XdrAsset(this.type);

  // CUSTOM_CODE_START
  String describe() => jsonEncode({'type': type.value});
  // CUSTOM_CODE_END
}

class AssetCache {
  final Map<String, Asset> _byCode = {};
}
";
    fs::write(dir.path().join("types.dart"), existing).unwrap();

    let generated = "\
import 'xdr_data_io.dart';

class XdrAsset {
  XdrAssetType type;

  XdrAsset(this.type);
}
";
    let merger = Merger::default();
    let batch = merge_all(
        &merger,
        &[
            ("types.dart".to_string(), generated.to_string()),
            ("ledger.dart".to_string(), "class XdrSigner {\n}\n".to_string()),
        ],
        dir.path(),
    );
    assert!(batch.report.is_success());

    let outputs: HashMap<_, _> = batch.outputs.into_iter().collect();
    let merged = &outputs["types.dart"];
    assert!(merged.text.starts_with("// Hand-tuned asset helpers.\n\nimport 'dart:convert';\n"));
    assert!(merged.text.contains("  String describe() => jsonEncode({'type': type.value});\n"));
    assert!(merged.text.contains("class XdrAssetCache {\n  final Map<String, XdrAsset> _byCode = {};\n}\n"));
    assert_eq!(merged.preserved_classes, vec!["AssetCache"]);
    assert_eq!(outputs["ledger.dart"].text, "class XdrSigner {\n}\n");

    let again = merger.merge(&merged.text, Some(existing)).unwrap();
    assert_eq!(again, merged.text);
}
