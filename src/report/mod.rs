//! Audit Reports
//!
//! CSV writers for verdicts, edges and dashboard lineage, and the run
//! summary printed at the end of a run. Row order is fully determined by
//! the inputs; `generated_at` is the only run-dependent value and is off
//! by default.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::graph::{DeprecationVerdict, Reachability, ReferenceGraph};
use crate::lookml::EntityKey;
use crate::usage::{UsageFact, UsageSource};

const VERDICT_HEADER: [&str; 14] = [
    "entity_name",
    "kind",
    "scope",
    "source_file",
    "physical_tables",
    "derived_sources",
    "reachable",
    "safe_to_deprecate",
    "used_via_lookml_reference",
    "used_via_table_reference",
    "used_in_dashboard",
    "used_in_look",
    "is_used_in_either",
    "last_used",
];

const LINEAGE_HEADER: [&str; 11] = [
    "dashboard_id",
    "dashboard_title",
    "model_name",
    "explore_name",
    "resolved",
    "tables",
    "explore_safe_to_deprecate",
    "views_safe_to_deprecate",
    "has_unused_explores",
    "all_explores_unused",
    "safe_to_deprecate_dashboard",
];

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

fn source_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write the verdict table. `generated_at` adds a trailing column.
pub fn write_verdicts(
    path: &Path,
    verdicts: &[DeprecationVerdict],
    generated_at: Option<DateTime<Utc>>,
) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = VERDICT_HEADER.to_vec();
    if generated_at.is_some() {
        header.push("generated_at");
    }
    writer.write_record(&header)?;

    let stamp = generated_at.map(|t| t.to_rfc3339());
    for v in verdicts {
        let mut row = vec![
            v.name.clone(),
            v.kind.to_string(),
            v.scope.clone().unwrap_or_default(),
            source_path(&v.source_file),
            join_set(&v.physical_tables),
            join_set(&v.derived_sources),
            v.reachable.to_string(),
            v.safe_to_deprecate.to_string(),
            v.used_via_lookml_reference.to_string(),
            v.used_via_table_reference.to_string(),
            v.used_in_dashboard.to_string(),
            v.used_in_look.to_string(),
            v.is_used_in_either.to_string(),
            v.last_used.map(|d| d.to_string()).unwrap_or_default(),
        ];
        if let Some(stamp) = &stamp {
            row.push(stamp.clone());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write every reference edge with its resolution status
pub fn write_edges(path: &Path, graph: &ReferenceGraph) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["from_kind", "from_scope", "from_name", "edge_kind", "to_name", "resolved"])?;
    for edge in graph.edges() {
        writer.write_record([
            edge.from.kind.as_str(),
            edge.from.scope.as_str(),
            edge.from.name.as_str(),
            edge.kind.as_str(),
            edge.to_name.as_str(),
            if graph.is_resolved(edge) { "true" } else { "false" },
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// One dashboard → explore → tables row, with the dashboard's rollup
/// repeated on each of its rows
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct LineageRow {
    pub dashboard_id: String,
    pub dashboard_title: String,
    pub model_name: String,
    pub explore_name: String,
    pub resolved: bool,
    pub tables: String,
    /// No explore matching the fact is reachable
    pub explore_safe_to_deprecate: bool,
    /// No base or joined view of those explores is reachable
    pub views_safe_to_deprecate: bool,
    pub has_unused_explores: bool,
    pub all_explores_unused: bool,
    /// Every explore and every view behind the dashboard is unused
    pub safe_to_deprecate_dashboard: bool,
}

#[derive(Clone, Copy)]
struct DashboardRollup {
    any_explore_unused: bool,
    all_explores_unused: bool,
    all_views_unused: bool,
}

/// Resolve each dashboard fact to the tables behind its explore and roll
/// the per-explore flags up to the dashboard
pub fn lineage(graph: &ReferenceGraph, reach: &Reachability, facts: &[UsageFact]) -> Vec<LineageRow> {
    let mut cache: HashMap<EntityKey, BTreeSet<String>> = HashMap::new();
    let mut rows: BTreeSet<LineageRow> = BTreeSet::new();

    for fact in facts.iter().filter(|f| f.source == UsageSource::Dashboard) {
        let explores = graph.find_explores(fact.model.as_deref(), &fact.explore);
        let mut tables = BTreeSet::new();
        let mut views_safe_to_deprecate = true;
        for key in &explores {
            let set = cache
                .entry((*key).clone())
                .or_insert_with(|| graph.table_set(key));
            tables.extend(set.iter().cloned());

            let views = graph.base_view(key).into_iter().chain(graph.joined_views(key));
            if views.map(|v| v.key()).any(|v| reach.is_reachable(&v)) {
                views_safe_to_deprecate = false;
            }
        }
        rows.insert(LineageRow {
            dashboard_id: fact.consumer_id.clone().unwrap_or_default(),
            dashboard_title: fact.consumer_title.clone().unwrap_or_default(),
            model_name: fact.model.clone().unwrap_or_default(),
            explore_name: fact.explore.clone(),
            resolved: !explores.is_empty(),
            tables: join_set(&tables),
            explore_safe_to_deprecate: !explores.iter().any(|k| reach.is_reachable(k)),
            views_safe_to_deprecate,
            has_unused_explores: false,
            all_explores_unused: false,
            safe_to_deprecate_dashboard: false,
        });
    }

    let mut rollups: BTreeMap<String, DashboardRollup> = BTreeMap::new();
    for row in &rows {
        let rollup = rollups.entry(row.dashboard_id.clone()).or_insert(DashboardRollup {
            any_explore_unused: false,
            all_explores_unused: true,
            all_views_unused: true,
        });
        rollup.any_explore_unused |= row.explore_safe_to_deprecate;
        rollup.all_explores_unused &= row.explore_safe_to_deprecate;
        rollup.all_views_unused &= row.views_safe_to_deprecate;
    }

    rows.into_iter()
        .map(|mut row| {
            if let Some(rollup) = rollups.get(&row.dashboard_id) {
                row.has_unused_explores = rollup.any_explore_unused;
                row.all_explores_unused = rollup.all_explores_unused;
                row.safe_to_deprecate_dashboard = rollup.all_explores_unused && rollup.all_views_unused;
            }
            row
        })
        .collect()
}

/// Write the dashboard lineage table
pub fn write_lineage(path: &Path, rows: &[LineageRow]) -> Result<()> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    if rows.is_empty() {
        writer.write_record(LINEAGE_HEADER)?;
    }
    writer.flush()?;
    Ok(())
}

/// Counts for one audit run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub lookml_root: PathBuf,
    pub fingerprint: String,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub parse_diagnostics: usize,
    pub ignored_definitions: usize,
    pub entities: usize,
    pub edges: usize,
    pub dangling_edges: usize,
    pub collisions: usize,
    pub usage_facts: usize,
    pub usage_records: usize,
    pub usage_rows_skipped: usize,
    pub usage_files_missing: usize,
    pub roots: usize,
    pub unmatched_usage: usize,
    pub reachable: usize,
    pub deprecation_candidates: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<PathBuf>,
}

impl RunSummary {
    /// Emit the summary as one structured log event
    pub fn log(&self) {
        info!(
            files = self.files_scanned,
            entities = self.entities,
            edges = self.edges,
            dangling = self.dangling_edges,
            collisions = self.collisions,
            roots = self.roots,
            reachable = self.reachable,
            candidates = self.deprecation_candidates,
            "Audit complete"
        );
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("📂 LookML root: {}\n", self.lookml_root.display()));
        out.push_str(&format!(
            "   {} files scanned, {} skipped, {} parse diagnostics, {} ignored definitions\n",
            self.files_scanned, self.files_skipped, self.parse_diagnostics, self.ignored_definitions
        ));
        out.push_str(&format!(
            "🔗 Graph: {} entities, {} edges ({} dangling), {} name collisions\n",
            self.entities, self.edges, self.dangling_edges, self.collisions
        ));
        out.push_str(&format!(
            "📊 Usage: {} facts, {} history references, {} rows skipped, {} exports missing\n",
            self.usage_facts, self.usage_records, self.usage_rows_skipped, self.usage_files_missing
        ));
        out.push_str(&format!(
            "🎯 {} roots ({} unmatched usage), {} reachable, {} safe to deprecate\n",
            self.roots, self.unmatched_usage, self.reachable, self.deprecation_candidates
        ));
        for path in &self.outputs {
            out.push_str(&format!("✅ Wrote {}\n", path.display()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookml::EntityKind;
    use chrono::TimeZone;

    fn sample() -> DeprecationVerdict {
        DeprecationVerdict {
            name: "orders".into(),
            kind: EntityKind::View,
            scope: None,
            source_file: PathBuf::from("views/orders.view.lkml"),
            physical_tables: ["analytics.orders".to_string()].into_iter().collect(),
            derived_sources: BTreeSet::new(),
            reachable: false,
            safe_to_deprecate: true,
            used_via_lookml_reference: false,
            used_via_table_reference: false,
            used_in_dashboard: false,
            used_in_look: false,
            is_used_in_either: false,
            last_used: None,
        }
    }

    #[test]
    fn test_verdict_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/verdicts.csv");
        write_verdicts(&path, &[sample()], None).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), VERDICT_HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "orders,view,,views/orders.view.lkml,analytics.orders,,false,true,false,false,false,false,false,"
        );
    }

    #[test]
    fn test_generated_at_is_a_trailing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdicts.csv");
        let stamp = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        write_verdicts(&path, &[sample()], Some(stamp)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().ends_with(",last_used,generated_at"));
        assert!(lines.next().unwrap().ends_with(",2024-06-01T12:00:00+00:00"));
    }

    #[test]
    fn test_multi_table_cells_are_comma_joined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verdicts.csv");
        let mut verdict = sample();
        verdict.physical_tables.insert("analytics.customers".into());
        write_verdicts(&path, &[verdict], None).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains(",\"analytics.customers, analytics.orders\","));
    }

    #[test]
    fn test_empty_lineage_still_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.csv");
        write_lineage(&path, &[]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), LINEAGE_HEADER.join(","));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = RunSummary {
            entities: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["entities"], 3);
        assert!(json.get("outputs").is_none());
        assert!(summary.to_text().contains("3 entities"));
    }
}
