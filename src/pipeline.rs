//! Audit Pipeline
//!
//! extract → build → load usage → seed roots → close → verdicts → write

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::error::Result;
use crate::graph::{self, DeprecationVerdict, Reachability, ReferenceGraph, RootSet};
use crate::lookml::{extract_directory, TableFilter};
use crate::report::{self, RunSummary};
use crate::usage::{load_usage, UsageInputs};

/// Everything computed by one audit, before anything is written
#[derive(Debug, Clone)]
pub struct Audit {
    pub graph: ReferenceGraph,
    pub usage: UsageInputs,
    pub roots: RootSet,
    pub reach: Reachability,
    pub verdicts: Vec<DeprecationVerdict>,
    pub summary: RunSummary,
}

/// Extract the LookML graph under the configured root
pub fn load_graph(config: &AuditConfig) -> Result<(ReferenceGraph, RunSummary)> {
    let root = config.lookml_root();
    info!(root = %root.display(), "Scanning LookML");

    let filter = TableFilter::from_config(&config.tables);
    let extraction = extract_directory(&root, &config.lookml, &filter)?;
    let graph = graph::build(&extraction);

    let dangling = graph.edges().iter().filter(|e| !graph.is_resolved(e)).count();
    if dangling > 0 {
        warn!(dangling, "References to unknown entities");
    }

    let summary = RunSummary {
        lookml_root: root,
        fingerprint: extraction.fingerprint.clone(),
        files_scanned: extraction.files_scanned,
        files_skipped: extraction.files_skipped,
        parse_diagnostics: extraction.parse_diagnostics,
        ignored_definitions: extraction.ignored_definitions,
        entities: graph.entity_count(),
        edges: graph.edge_count(),
        dangling_edges: dangling,
        collisions: graph.collisions,
        ..Default::default()
    };
    Ok((graph, summary))
}

/// Run the audit without writing any output
pub fn analyze(config: &AuditConfig) -> Result<Audit> {
    let (graph, mut summary) = load_graph(config)?;

    let usage = load_usage(&config.usage);
    let roots = graph::seed_roots(&graph, &usage.facts, &usage.records);
    let reach = graph::reachability(&graph, &roots);
    let verdicts = graph::verdicts(&graph, &reach);

    summary.usage_facts = usage.facts.len();
    summary.usage_records = usage.records.len();
    summary.usage_rows_skipped = usage.rows_skipped;
    summary.usage_files_missing = usage.files_missing;
    summary.roots = roots.len();
    summary.unmatched_usage = roots.unmatched_facts + roots.unmatched_records;
    summary.reachable = verdicts.iter().filter(|v| v.reachable).count();
    summary.deprecation_candidates = verdicts.iter().filter(|v| v.safe_to_deprecate).count();

    Ok(Audit {
        graph,
        usage,
        roots,
        reach,
        verdicts,
        summary,
    })
}

/// Run the audit and write every configured output
pub fn run(config: &AuditConfig) -> Result<RunSummary> {
    let audit = analyze(config)?;
    let mut summary = audit.summary;

    let generated_at = config.output.include_generated_at.then(Utc::now);
    report::write_verdicts(&config.output.verdicts, &audit.verdicts, generated_at)?;
    summary.outputs.push(config.output.verdicts.clone());

    if let Some(path) = &config.output.edges {
        report::write_edges(path, &audit.graph)?;
        summary.outputs.push(path.clone());
    }

    if let Some(path) = &config.output.lineage {
        let rows = report::lineage(&audit.graph, &audit.reach, &audit.usage.facts);
        report::write_lineage(path, &rows)?;
        summary.outputs.push(path.clone());
    }

    summary.log();
    Ok(summary)
}
