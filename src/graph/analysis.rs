//! Usage Reachability
//!
//! Seeds a root set from usage evidence, closes it over resolved edges,
//! and turns the result into one [`DeprecationVerdict`] per entity.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use tracing::debug;

use super::{EdgeKind, ReferenceGraph};
use crate::lookml::{canonical, EntityKey, EntityKind};
use crate::usage::{UsageFact, UsageRecord, UsageSource};

/// Usage evidence attached to a root or carried to a reached entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    /// Latest usage date; `None` is older than any date
    pub last_used: Option<NaiveDate>,
    /// Exports that produced the evidence
    pub sources: BTreeSet<UsageSource>,
}

impl Usage {
    pub fn new(source: UsageSource, used_on: Option<NaiveDate>) -> Self {
        Self {
            last_used: used_on,
            sources: BTreeSet::from([source]),
        }
    }

    /// Fold `other` in; returns whether anything changed
    fn merge(&mut self, other: &Usage) -> bool {
        let newer = other.last_used > self.last_used;
        if newer {
            self.last_used = other.last_used;
        }
        let before = self.sources.len();
        self.sources.extend(other.sources.iter().copied());
        newer || self.sources.len() != before
    }

    pub fn used_in(&self, source: UsageSource) -> bool {
        self.sources.contains(&source)
    }
}

/// Entities with direct usage evidence
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    /// Root key and the usage seen for it
    pub roots: BTreeMap<EntityKey, Usage>,
    /// Usage facts that named no known explore
    pub unmatched_facts: usize,
    /// History names whose prefix matched nothing
    pub unmatched_records: usize,
}

impl RootSet {
    fn add(&mut self, key: EntityKey, usage: &Usage) {
        self.roots.entry(key).or_default().merge(usage);
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Build the root set.
///
/// A usage fact seeds the explore it names. A history name `N.x` seeds the
/// view `N`, every explore named `N`, every explore exposing `N` as base
/// view or join alias, and the explore `x` of model `N` when one exists.
pub fn seed_roots(graph: &ReferenceGraph, facts: &[UsageFact], records: &[UsageRecord]) -> RootSet {
    let mut roots = RootSet::default();

    for fact in facts {
        let matched = graph.find_explores(fact.model.as_deref(), &fact.explore);
        if matched.is_empty() {
            debug!(model = ?fact.model, explore = %fact.explore, source = %fact.source, "Usage names unknown explore");
            roots.unmatched_facts += 1;
        }
        let usage = Usage::new(fact.source, fact.used_on);
        for key in matched {
            roots.add(key.clone(), &usage);
        }
    }

    for record in records {
        let prefix = record.prefix();
        if prefix.is_empty() {
            roots.unmatched_records += 1;
            continue;
        }

        let mut matched: BTreeSet<EntityKey> = BTreeSet::new();
        let view = EntityKey::view(prefix);
        if graph.contains(&view) {
            matched.insert(view);
        }
        matched.extend(graph.explores_named(prefix).into_iter().cloned());
        matched.extend(graph.explores_exposing(prefix).into_iter().cloned());

        let qualified = EntityKey::new(EntityKind::Explore, Some(prefix), record.suffix());
        if graph.contains(&qualified) {
            matched.insert(qualified);
        }

        if matched.is_empty() {
            roots.unmatched_records += 1;
        }
        let usage = Usage::new(UsageSource::History, record.used_on);
        for key in matched {
            roots.add(key, &usage);
        }
    }

    roots
}

/// The transitive closure of a root set
#[derive(Debug, Clone, Default)]
pub struct Reachability {
    /// Reached key and the merged usage of every root reaching it
    pub reached: BTreeMap<EntityKey, Usage>,
}

impl Reachability {
    pub fn is_reachable(&self, key: &EntityKey) -> bool {
        self.reached.contains_key(key)
    }

    pub fn usage(&self, key: &EntityKey) -> Option<&Usage> {
        self.reached.get(key)
    }

    pub fn last_used(&self, key: &EntityKey) -> Option<NaiveDate> {
        self.reached.get(key).and_then(|u| u.last_used)
    }

    pub fn used_in(&self, key: &EntityKey, source: UsageSource) -> bool {
        self.reached.get(key).map(|u| u.used_in(source)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.reached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reached.is_empty()
    }
}

/// Worklist closure over resolved edges. A node is revisited only when a
/// newer date or a new usage source reaches it, so each node is queued a
/// bounded number of times.
pub fn reachability(graph: &ReferenceGraph, roots: &RootSet) -> Reachability {
    let mut reached: BTreeMap<EntityKey, Usage> = roots.roots.clone();
    let mut queue: VecDeque<EntityKey> = roots.roots.keys().cloned().collect();

    while let Some(key) = queue.pop_front() {
        let Some(usage) = reached.get(&key).cloned() else {
            continue;
        };
        for next in graph.outgoing(&key) {
            let changed = match reached.get_mut(next) {
                Some(existing) => existing.merge(&usage),
                None => {
                    reached.insert(next.clone(), usage.clone());
                    true
                }
            };
            if changed {
                queue.push_back(next.clone());
            }
        }
    }

    Reachability { reached }
}

/// Per-entity audit result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeprecationVerdict {
    pub name: String,
    pub kind: EntityKind,
    pub scope: Option<String>,
    pub source_file: PathBuf,
    /// One-hop effective table set
    pub physical_tables: BTreeSet<String>,
    pub derived_sources: BTreeSet<String>,
    pub reachable: bool,
    pub safe_to_deprecate: bool,
    pub used_via_lookml_reference: bool,
    pub used_via_table_reference: bool,
    /// Reached from a dashboard usage fact
    pub used_in_dashboard: bool,
    /// Reached from a look usage fact
    pub used_in_look: bool,
    pub is_used_in_either: bool,
    pub last_used: Option<NaiveDate>,
}

/// Views whose derived SQL reads each table, and each table name segment
struct DerivedReaders {
    by_table: BTreeMap<String, BTreeSet<EntityKey>>,
    by_segment: BTreeMap<String, BTreeSet<EntityKey>>,
}

impl DerivedReaders {
    fn new(graph: &ReferenceGraph) -> Self {
        let mut by_table: BTreeMap<String, BTreeSet<EntityKey>> = BTreeMap::new();
        let mut by_segment: BTreeMap<String, BTreeSet<EntityKey>> = BTreeMap::new();
        for edge in graph.edges().iter().filter(|e| e.kind == EdgeKind::DerivedSource) {
            let table = canonical(&edge.to_name);
            let segment = table.rsplit('.').next().unwrap_or("").to_string();
            by_table.entry(table).or_default().insert(edge.from.clone());
            by_segment.entry(segment).or_default().insert(edge.from.clone());
        }
        Self { by_table, by_segment }
    }

    fn read_by_other(map: &BTreeMap<String, BTreeSet<EntityKey>>, name: &str, key: &EntityKey) -> bool {
        map.get(name).map(|readers| readers.iter().any(|r| r != key)).unwrap_or(false)
    }

    /// Whether another view's derived SQL reads this view's table or a
    /// table named like the view
    fn uses(&self, key: &EntityKey, physical_table: Option<&str>) -> bool {
        if let Some(table) = physical_table {
            if Self::read_by_other(&self.by_table, &canonical(table), key) {
                return true;
            }
        }
        Self::read_by_other(&self.by_segment, &key.name, key)
    }
}

/// One verdict per entity, sorted by `(kind, scope, name, source_file)`
pub fn verdicts(graph: &ReferenceGraph, reach: &Reachability) -> Vec<DeprecationVerdict> {
    let readers = DerivedReaders::new(graph);

    let mut out: Vec<DeprecationVerdict> = graph
        .entities()
        .map(|entity| {
            let key = entity.key();
            let reachable = reach.is_reachable(&key);
            let used_via_lookml_reference = graph.incoming(&key).iter().any(|from| **from != key);
            let used_via_table_reference = entity.kind == EntityKind::View
                && readers.uses(&key, entity.physical_table.as_deref());
            let used_in_dashboard = reach.used_in(&key, UsageSource::Dashboard);
            let used_in_look = reach.used_in(&key, UsageSource::Look);

            DeprecationVerdict {
                name: entity.name.clone(),
                kind: entity.kind,
                scope: entity.scope.clone(),
                source_file: entity.source_file.clone(),
                physical_tables: graph.table_set(&key),
                derived_sources: entity.derived_source_tables.clone(),
                reachable,
                safe_to_deprecate: !reachable,
                used_via_lookml_reference,
                used_via_table_reference,
                used_in_dashboard,
                used_in_look,
                is_used_in_either: used_in_dashboard || used_in_look,
                last_used: reach.last_used(&key),
            }
        })
        .collect();

    out.sort_by(|a, b| {
        let scope = |v: &DeprecationVerdict| v.scope.as_deref().map(canonical).unwrap_or_default();
        a.kind
            .cmp(&b.kind)
            .then_with(|| scope(a).cmp(&scope(b)))
            .then_with(|| canonical(&a.name).cmp(&canonical(&b.name)))
            .then_with(|| a.source_file.cmp(&b.source_file))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build;
    use crate::lookml::{extract_file, Extraction, TableFilter};
    use std::path::Path;

    fn graph_from(files: &[(&str, &str)]) -> ReferenceGraph {
        let filter = TableFilter::default();
        let mut extraction = Extraction::default();
        for (path, content) in files {
            let file = extract_file(content, Path::new(path), &filter);
            extraction.entities.extend(file.entities);
            extraction.references.extend(file.references);
        }
        build(&extraction)
    }

    fn shop() -> ReferenceGraph {
        graph_from(&[
            ("orders.view.lkml", "view: orders { sql_table_name: analytics.orders ;; }"),
            ("customers.view.lkml", "view: customers { sql_table_name: analytics.customers ;; }"),
            (
                "order_facts.view.lkml",
                "view: order_facts {\n derived_table: { sql: SELECT * FROM analytics.orders ;; }\n}\n",
            ),
            ("unused.view.lkml", "view: unused { sql_table_name: analytics.unused ;; }"),
            (
                "shop.model.lkml",
                "explore: orders_explore {\n view_name: orders\n join: customers {\n  sql_on: ${orders.customer_id} = ${customers.id} ;;\n }\n}\n",
            ),
        ])
    }

    fn date(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, d)
    }

    fn fact(model: Option<&str>, explore: &str, used_on: Option<NaiveDate>) -> UsageFact {
        fact_from(UsageSource::Dashboard, model, explore, used_on)
    }

    fn fact_from(
        source: UsageSource,
        model: Option<&str>,
        explore: &str,
        used_on: Option<NaiveDate>,
    ) -> UsageFact {
        UsageFact {
            source,
            model: model.map(str::to_string),
            explore: explore.to_string(),
            consumer_id: Some("1".into()),
            consumer_title: None,
            used_on,
        }
    }

    fn record(entity: &str, used_on: Option<NaiveDate>) -> UsageRecord {
        UsageRecord {
            entity: entity.to_string(),
            consumer: None,
            used_on,
        }
    }

    fn verdict<'a>(all: &'a [DeprecationVerdict], kind: EntityKind, name: &str) -> &'a DeprecationVerdict {
        all.iter().find(|v| v.kind == kind && v.name == name).unwrap()
    }

    #[test]
    fn test_no_usage_everything_deprecatable() {
        let graph = shop();
        let roots = seed_roots(&graph, &[], &[]);
        let all = verdicts(&graph, &reachability(&graph, &roots));
        assert_eq!(all.len(), graph.entity_count());
        assert!(all.iter().all(|v| v.safe_to_deprecate && !v.reachable));
    }

    #[test]
    fn test_dashboard_usage_reaches_joined_views() {
        let graph = shop();
        let roots = seed_roots(&graph, &[fact(Some("shop"), "orders_explore", date(5))], &[]);
        let reach = reachability(&graph, &roots);
        let all = verdicts(&graph, &reach);

        for name in ["orders", "customers"] {
            let v = verdict(&all, EntityKind::View, name);
            assert!(v.reachable, "{name} should be reachable");
            assert_eq!(v.last_used, date(5));
        }
        assert!(verdict(&all, EntityKind::View, "unused").safe_to_deprecate);
        assert!(verdict(&all, EntityKind::View, "order_facts").safe_to_deprecate);
        assert_eq!(
            verdict(&all, EntityKind::Explore, "orders_explore").physical_tables,
            ["analytics.customers", "analytics.orders"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn test_history_prefix_seeds_views_and_exposing_explores() {
        let graph = shop();
        let roots = seed_roots(
            &graph,
            &[],
            &[record("orders.total_amount", date(2)), record("customers.id", date(3))],
        );
        assert!(roots.roots.contains_key(&EntityKey::view("orders")));
        assert!(roots.roots.contains_key(&EntityKey::view("customers")));
        let explore = EntityKey::new(EntityKind::Explore, Some("shop"), "orders_explore");
        assert_eq!(roots.roots.get(&explore).map(|u| u.last_used), Some(date(3)));
    }

    #[test]
    fn test_history_model_qualified_name_seeds_explore() {
        let graph = shop();
        let roots = seed_roots(&graph, &[], &[record("shop.orders_explore", date(4))]);
        let explore = EntityKey::new(EntityKind::Explore, Some("shop"), "orders_explore");
        assert_eq!(roots.roots.get(&explore).map(|u| u.last_used), Some(date(4)));
        assert_eq!(roots.unmatched_records, 0);

        let reach = reachability(&graph, &roots);
        assert!(reach.is_reachable(&EntityKey::view("customers")));
        assert!(reach.used_in(&explore, UsageSource::History));
    }

    #[test]
    fn test_usage_sources_propagate_per_export() {
        let graph = graph_from(&[
            ("orders.view.lkml", "view: orders {}"),
            ("customers.view.lkml", "view: customers {}"),
            (
                "shop.model.lkml",
                "explore: orders_explore { view_name: orders }\nexplore: customers_explore { view_name: customers }\n",
            ),
        ]);
        let roots = seed_roots(
            &graph,
            &[
                fact_from(UsageSource::Dashboard, Some("shop"), "orders_explore", date(1)),
                fact_from(UsageSource::Look, Some("shop"), "customers_explore", date(2)),
                fact_from(UsageSource::Look, Some("shop"), "orders_explore", None),
            ],
            &[],
        );
        let all = verdicts(&graph, &reachability(&graph, &roots));

        let orders = verdict(&all, EntityKind::View, "orders");
        assert!(orders.used_in_dashboard && orders.used_in_look && orders.is_used_in_either);
        assert_eq!(orders.last_used, date(1));

        let customers = verdict(&all, EntityKind::View, "customers");
        assert!(!customers.used_in_dashboard);
        assert!(customers.used_in_look && customers.is_used_in_either);
    }

    #[test]
    fn test_history_only_usage_is_not_dashboard_or_look() {
        let graph = shop();
        let roots = seed_roots(&graph, &[], &[record("orders.id", date(2))]);
        let all = verdicts(&graph, &reachability(&graph, &roots));
        let orders = verdict(&all, EntityKind::View, "orders");
        assert!(orders.reachable);
        assert!(!orders.is_used_in_either);
    }

    #[test]
    fn test_last_used_is_the_newest_reaching_date() {
        let graph = shop();
        let roots = seed_roots(
            &graph,
            &[fact(None, "orders_explore", date(1))],
            &[record("customers.id", date(9))],
        );
        let reach = reachability(&graph, &roots);
        assert_eq!(reach.last_used(&EntityKey::view("customers")), date(9));
        // `orders` is reached from the explore (seeded by both) and is not
        // downstream of the `customers` view.
        assert_eq!(reach.last_used(&EntityKey::view("orders")), date(9));
    }

    #[test]
    fn test_undated_usage_still_reaches() {
        let graph = shop();
        let roots = seed_roots(&graph, &[fact(Some("shop"), "orders_explore", None)], &[]);
        let reach = reachability(&graph, &roots);
        assert!(reach.is_reachable(&EntityKey::view("orders")));
        assert_eq!(reach.last_used(&EntityKey::view("orders")), None);
    }

    #[test]
    fn test_unmatched_usage_is_counted() {
        let graph = shop();
        let roots = seed_roots(&graph, &[fact(Some("shop"), "gone", None)], &[record("ghost.id", None)]);
        assert!(roots.is_empty());
        assert_eq!(roots.unmatched_facts, 1);
        assert_eq!(roots.unmatched_records, 1);
    }

    #[test]
    fn test_reference_flags() {
        let graph = shop();
        let all = verdicts(&graph, &Reachability::default());

        let orders = verdict(&all, EntityKind::View, "orders");
        assert!(orders.used_via_lookml_reference);
        assert!(orders.used_via_table_reference);

        let unused = verdict(&all, EntityKind::View, "unused");
        assert!(!unused.used_via_lookml_reference);
        assert!(!unused.used_via_table_reference);

        let facts = verdict(&all, EntityKind::View, "order_facts");
        assert!(!facts.used_via_table_reference);
        assert_eq!(facts.derived_sources.len(), 1);
    }

    #[test]
    fn test_verdicts_are_sorted() {
        let graph = shop();
        let all = verdicts(&graph, &Reachability::default());
        let kinds: Vec<_> = all.iter().map(|v| v.kind).collect();
        let mut sorted = kinds.clone();
        sorted.sort();
        assert_eq!(kinds, sorted);
        let views: Vec<_> = all
            .iter()
            .filter(|v| v.kind == EntityKind::View)
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(views, vec!["customers", "order_facts", "orders", "unused"]);
    }
}
