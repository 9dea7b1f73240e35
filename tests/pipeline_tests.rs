//! End-to-End Audit Tests
//!
//! Runs the full pipeline over the LookML and usage fixtures.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use lookml_audit::{analyze, run, AuditConfig, AuditError, DeprecationVerdict, EntityKind};

fn fixtures_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn config_for(root: &str, out_dir: &Path) -> AuditConfig {
    let mut config = AuditConfig::default();
    config.lookml.root = fixtures_path().join(root);
    config.output.verdicts = out_dir.join("verdicts.csv");
    config
}

fn with_history(mut config: AuditConfig) -> AuditConfig {
    config.usage.history_csv = Some(fixtures_path().join("usage/history.csv"));
    config
}

fn with_dashboards(mut config: AuditConfig) -> AuditConfig {
    config.usage.dashboard_csv = Some(fixtures_path().join("usage/dashboards.csv"));
    config
}

fn find<'a>(verdicts: &'a [DeprecationVerdict], kind: EntityKind, name: &str) -> &'a DeprecationVerdict {
    verdicts
        .iter()
        .find(|v| v.kind == kind && v.name == name)
        .unwrap_or_else(|| panic!("no {kind} named {name}"))
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn test_explore_resolves_table_and_is_deprecatable_without_usage() {
    let dir = tempfile::tempdir().unwrap();
    let audit = analyze(&config_for("minimal", dir.path())).unwrap();

    let explore = find(&audit.verdicts, EntityKind::Explore, "orders_explore");
    assert_eq!(explore.scope.as_deref(), Some("m"));
    assert_eq!(explore.physical_tables, set(&["analytics.orders"]));
    assert!(!explore.reachable);
    assert!(explore.safe_to_deprecate);

    let view = find(&audit.verdicts, EntityKind::View, "orders");
    assert_eq!(view.physical_tables, set(&["analytics.orders"]));
    assert!(view.safe_to_deprecate);
    assert!(view.used_via_lookml_reference);
}

#[test]
fn test_history_fields_root_views_and_their_explores() {
    let dir = tempfile::tempdir().unwrap();
    let audit = analyze(&with_history(config_for("shop", dir.path()))).unwrap();

    assert_eq!(audit.usage.rows_skipped, 1);
    for name in ["orders", "customers"] {
        let view = find(&audit.verdicts, EntityKind::View, name);
        assert!(view.reachable, "{name} should be reachable");
    }
    let explore = find(&audit.verdicts, EntityKind::Explore, "orders_explore");
    assert!(explore.reachable);
    assert_eq!(explore.last_used.map(|d| d.to_string()).as_deref(), Some("2024-03-04"));

    for name in ["legacy", "order_facts_explore"] {
        assert!(find(&audit.verdicts, EntityKind::Explore, name).safe_to_deprecate);
    }
    assert!(find(&audit.verdicts, EntityKind::View, "legacy_returns").safe_to_deprecate);
    assert!(find(&audit.verdicts, EntityKind::View, "order_facts").safe_to_deprecate);
}

#[test]
fn test_derived_table_sources_skip_column_references() {
    let dir = tempfile::tempdir().unwrap();
    let audit = analyze(&config_for("shop", dir.path())).unwrap();

    let facts = find(&audit.verdicts, EntityKind::View, "order_facts");
    assert_eq!(facts.derived_sources, set(&["analytics.customers", "analytics.orders"]));
    assert!(audit
        .verdicts
        .iter()
        .all(|v| !v.physical_tables.contains("o.created_at") && !v.derived_sources.contains("o.created_at")));

    let orders = find(&audit.verdicts, EntityKind::View, "orders");
    assert!(orders.used_via_table_reference);
    let legacy = find(&audit.verdicts, EntityKind::View, "legacy_returns");
    assert!(!legacy.used_via_table_reference);
    assert!(legacy.used_via_lookml_reference);
    assert!(legacy.safe_to_deprecate);
}

#[test]
fn test_dashboard_usage_reaches_from_and_join_targets() {
    let dir = tempfile::tempdir().unwrap();
    let audit = analyze(&with_dashboards(config_for("shop", dir.path()))).unwrap();

    let explore = find(&audit.verdicts, EntityKind::Explore, "order_facts_explore");
    assert!(explore.reachable);
    assert_eq!(explore.last_used.map(|d| d.to_string()).as_deref(), Some("2024-02-11"));
    assert!(find(&audit.verdicts, EntityKind::View, "order_facts").reachable);
    assert!(find(&audit.verdicts, EntityKind::View, "customers").reachable);
    assert!(find(&audit.verdicts, EntityKind::JoinAlias, "buyer").reachable);
    assert!(!find(&audit.verdicts, EntityKind::View, "orders").reachable);

    assert_eq!(audit.roots.unmatched_facts, 1);
}

#[test]
fn test_explore_name_is_never_assumed_to_be_a_view() {
    let dir = tempfile::tempdir().unwrap();
    let lookml = dir.path().join("lookml");
    fs::create_dir_all(&lookml).unwrap();
    fs::write(lookml.join("orders.view.lkml"), "view: orders { sql_table_name: analytics.orders ;; }\n").unwrap();
    fs::write(lookml.join("m.model.lkml"), "explore: orders {}\n").unwrap();
    fs::write(
        dir.path().join("dashboards.csv"),
        "Query Model,Query Explore\nm,orders\n",
    )
    .unwrap();

    let mut config = AuditConfig::default();
    config.lookml.root = lookml;
    config.usage.dashboard_csv = Some(dir.path().join("dashboards.csv"));
    let audit = analyze(&config).unwrap();

    let explore = find(&audit.verdicts, EntityKind::Explore, "orders");
    assert!(explore.reachable);
    assert!(explore.physical_tables.is_empty());

    let view = find(&audit.verdicts, EntityKind::View, "orders");
    assert!(!view.reachable);
    assert!(!view.used_via_lookml_reference);
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_runs_are_byte_identical() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();

    let configure = |out: &Path| {
        let mut config = with_dashboards(with_history(config_for("shop", out)));
        config.output.edges = Some(out.join("edges.csv"));
        config.output.lineage = Some(out.join("lineage.csv"));
        config
    };

    let a = run(&configure(first.path())).unwrap();
    let b = run(&configure(second.path())).unwrap();
    assert_eq!(a.fingerprint, b.fingerprint);

    for file in ["verdicts.csv", "edges.csv", "lineage.csv"] {
        let left = fs::read(first.path().join(file)).unwrap();
        let right = fs::read(second.path().join(file)).unwrap();
        assert_eq!(left, right, "{file} differs between runs");
    }
}

#[test]
fn test_generated_at_is_the_only_difference() {
    let plain_dir = tempfile::tempdir().unwrap();
    let stamped_dir = tempfile::tempdir().unwrap();

    run(&config_for("shop", plain_dir.path())).unwrap();
    let mut stamped = config_for("shop", stamped_dir.path());
    stamped.output.include_generated_at = true;
    run(&stamped).unwrap();

    let plain = fs::read_to_string(plain_dir.path().join("verdicts.csv")).unwrap();
    let stamped = fs::read_to_string(stamped_dir.path().join("verdicts.csv")).unwrap();
    let stripped: Vec<&str> = stamped
        .lines()
        .map(|line| line.rsplit_once(',').map(|(head, _)| head).unwrap_or(line))
        .collect();
    assert_eq!(plain.lines().collect::<Vec<_>>(), stripped);
    assert!(stamped.lines().next().unwrap().ends_with(",generated_at"));
}

#[test]
fn test_more_usage_never_shrinks_reachability() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.csv");
    fs::write(
        &history,
        "query_formatted_fields,history_created_time\n\"[\"\"customers.id\"\"]\",2024-01-01\n",
    )
    .unwrap();

    let mut config = config_for("shop", dir.path());
    config.usage.history_csv = Some(history.clone());
    let before = analyze(&config).unwrap();

    fs::write(
        &history,
        "query_formatted_fields,history_created_time\n\
         \"[\"\"customers.id\"\"]\",2024-01-01\n\
         \"[\"\"order_facts.order_id\"\"]\",2024-01-02\n",
    )
    .unwrap();
    let after = analyze(&config).unwrap();

    let reachable = |verdicts: &[DeprecationVerdict]| -> BTreeSet<(EntityKind, String, Option<String>)> {
        verdicts
            .iter()
            .filter(|v| v.reachable)
            .map(|v| (v.kind, v.name.clone(), v.scope.clone()))
            .collect()
    };
    let before = reachable(&before.verdicts);
    let after = reachable(&after.verdicts);
    assert!(before.is_subset(&after));
    assert!(after.len() > before.len());
}

// =============================================================================
// Reports and errors
// =============================================================================

#[test]
fn test_lineage_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = with_dashboards(config_for("shop", dir.path()));
    config.output.lineage = Some(dir.path().join("lineage.csv"));
    run(&config).unwrap();

    let content = fs::read_to_string(dir.path().join("lineage.csv")).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "dashboard_id,dashboard_title,model_name,explore_name,resolved,tables,\
             explore_safe_to_deprecate,views_safe_to_deprecate,has_unused_explores,\
             all_explores_unused,safe_to_deprecate_dashboard",
            "7,Order Facts,shop,order_facts_explore,true,\"analytics.customers, analytics.orders\",\
             false,false,false,false,false",
            "9,Retired,shop,gone_explore,false,,true,true,true,true,true",
        ]
    );
}

#[test]
fn test_usage_source_flags() {
    let dir = tempfile::tempdir().unwrap();
    let audit = analyze(&with_history(with_dashboards(config_for("shop", dir.path())))).unwrap();

    let facts = find(&audit.verdicts, EntityKind::View, "order_facts");
    assert!(facts.used_in_dashboard);
    assert!(!facts.used_in_look);
    assert!(facts.is_used_in_either);

    // Reached from history only
    let orders = find(&audit.verdicts, EntityKind::View, "orders");
    assert!(orders.reachable);
    assert!(!orders.is_used_in_either);
}

#[test]
fn test_refinement_join_is_reachable_from_history() {
    let dir = tempfile::tempdir().unwrap();
    let lookml = dir.path().join("lookml");
    fs::create_dir_all(&lookml).unwrap();
    fs::write(lookml.join("orders.view.lkml"), "view: orders { sql_table_name: analytics.orders ;; }\n").unwrap();
    fs::write(lookml.join("refunds.view.lkml"), "view: refunds { sql_table_name: analytics.refunds ;; }\n").unwrap();
    fs::write(
        lookml.join("shop.model.lkml"),
        "explore: e { view_name: orders }\n\
         explore: +e {\n  join: refunds { sql_on: ${orders.id} = ${refunds.order_id} ;; }\n}\n",
    )
    .unwrap();
    let history = dir.path().join("history.csv");
    fs::write(&history, "History Created Time,Query Formatted Fields\n2024-05-01 10:00:00,orders.id\n").unwrap();

    let mut config = config_for("unused", dir.path());
    config.lookml.root = lookml;
    config.usage.history_csv = Some(history);
    let audit = analyze(&config).unwrap();

    assert_eq!(audit.summary.ignored_definitions, 0);
    let refunds = find(&audit.verdicts, EntityKind::View, "refunds");
    assert!(refunds.reachable);
    assert!(!refunds.safe_to_deprecate);
    let explore = find(&audit.verdicts, EntityKind::Explore, "e");
    assert_eq!(explore.physical_tables, set(&["analytics.orders", "analytics.refunds"]));
}

#[test]
fn test_view_self_reference_leaves_no_orphan() {
    let dir = tempfile::tempdir().unwrap();
    let lookml = dir.path().join("lookml");
    fs::create_dir_all(&lookml).unwrap();
    fs::write(
        lookml.join("orders.view.lkml"),
        "view: orders {\n  dimension: amount {}\n  measure: total { sql: SUM(${orders.amount}) ;; }\n}\n",
    )
    .unwrap();

    let mut config = AuditConfig::default();
    config.lookml.root = lookml;
    let audit = analyze(&config).unwrap();

    assert!(!audit.verdicts.iter().any(|v| v.kind == EntityKind::FieldReference));
    assert_eq!(audit.summary.dangling_edges, 0);
}

#[test]
fn test_edge_report_keeps_dangling_references() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for("shop", dir.path());
    config.output.edges = Some(dir.path().join("edges.csv"));
    let summary = run(&config).unwrap();
    assert!(summary.dangling_edges > 0);

    let content = fs::read_to_string(dir.path().join("edges.csv")).unwrap();
    assert!(content.starts_with("from_kind,from_scope,from_name,edge_kind,to_name,resolved\n"));
    assert!(content.contains("explore,shop,orders_explore,base_view,orders,true"));
    assert!(content.contains("field_reference,models/shop.model.lkml,buyer,field_interpolation,buyer,false"));
}

#[test]
fn test_summary_counts() {
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&with_history(config_for("shop", dir.path()))).unwrap();
    assert_eq!(summary.files_scanned, 5);
    assert_eq!(summary.ignored_definitions, 1);
    assert_eq!(summary.collisions, 0);
    assert_eq!(summary.usage_rows_skipped, 1);
    assert_eq!(summary.outputs, vec![dir.path().join("verdicts.csv")]);
}

#[test]
fn test_missing_root_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AuditConfig::default();
    config.lookml.root = dir.path().join("does-not-exist");
    config.output.verdicts = dir.path().join("verdicts.csv");

    let err = run(&config).unwrap_err();
    assert!(matches!(err, AuditError::MissingInput(_)));
    assert!(!dir.path().join("verdicts.csv").exists());
}

#[test]
fn test_malformed_file_does_not_abort() {
    let dir = tempfile::tempdir().unwrap();
    let lookml = dir.path().join("lookml");
    fs::create_dir_all(&lookml).unwrap();
    fs::write(lookml.join("broken.view.lkml"), "view: broken {\n  dimension: x {\n    sql: ${TABLE}.x ;;\n").unwrap();
    fs::write(lookml.join("fine.view.lkml"), "}} view: fine { sql_table_name: analytics.fine ;; }\n").unwrap();

    let mut config = AuditConfig::default();
    config.lookml.root = lookml;
    let audit = analyze(&config).unwrap();

    assert!(audit.summary.parse_diagnostics > 0);
    let names: Vec<_> = audit.verdicts.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["broken", "fine"]);
}
