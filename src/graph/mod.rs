//! Reference Graph
//!
//! A directed, name-indexed graph over extracted LookML entities.
//!
//! ## Design
//!
//! - `entities`: `EntityKey -> Entity`, last write wins
//! - `edges`: every reference as written, resolved or not
//! - `graph`: petgraph `DiGraph` holding only the resolved edges, plus
//!   leaf nodes for physical tables
//!
//! Resolution is a lookup of the key implied by the edge kind; nothing is
//! ever guessed from a similar name. Unresolved edges are kept in `edges`
//! and surfaced through [`ReferenceGraph::dangling`].

pub mod analysis;
pub mod builder;

pub use analysis::{
    reachability, seed_roots, verdicts, DeprecationVerdict, Reachability, RootSet, Usage,
};
pub use builder::build;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::lookml::{canonical, Entity, EntityKey, EntityKind};

/// Edge kinds in the reference graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Explore to the view it is built on
    BaseView,
    /// Explore to join alias, and join alias to joined view
    Join,
    /// Owner to field reference, and field reference to view
    FieldInterpolation,
    /// View or explore to the one it extends
    Extends,
    /// View to its `sql_table_name`
    SqlTable,
    /// View to a table read by its derived-table SQL
    DerivedSource,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BaseView => "base_view",
            Self::Join => "join",
            Self::FieldInterpolation => "field_interpolation",
            Self::Extends => "extends",
            Self::SqlTable => "sql_table",
            Self::DerivedSource => "derived_source",
        }
    }

    /// Whether the target is a physical table rather than an entity
    pub fn targets_table(&self) -> bool {
        matches!(self, Self::SqlTable | Self::DerivedSource)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference from an entity to a target named as written
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub from: EntityKey,
    pub kind: EdgeKind,
    /// Canonical scope of the target key, empty when unscoped
    pub to_scope: String,
    pub to_name: String,
}

impl ReferenceEdge {
    /// Kind of entity this edge must land on; `None` for table edges
    pub fn target_kind(&self) -> Option<EntityKind> {
        match (self.kind, self.from.kind) {
            (EdgeKind::SqlTable | EdgeKind::DerivedSource, _) => None,
            (EdgeKind::BaseView, _) => Some(EntityKind::View),
            (EdgeKind::Join, EntityKind::Explore) => Some(EntityKind::JoinAlias),
            (EdgeKind::Join, _) => Some(EntityKind::View),
            (EdgeKind::FieldInterpolation, EntityKind::FieldReference) => Some(EntityKind::View),
            (EdgeKind::FieldInterpolation, _) => Some(EntityKind::FieldReference),
            (EdgeKind::Extends, kind) => Some(kind),
        }
    }

    /// Key the edge resolves to, if it targets an entity
    pub fn target_key(&self) -> Option<EntityKey> {
        let kind = self.target_kind()?;
        let scope = (!self.to_scope.is_empty()).then_some(self.to_scope.as_str());
        Some(EntityKey::new(kind, scope, &self.to_name))
    }
}

/// Node weight: an entity or a physical table leaf
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GraphNode {
    Entity(EntityKey),
    Table(String),
}

/// An unresolved reference with the closest known names
#[derive(Debug, Clone, Serialize)]
pub struct DanglingEdge {
    pub edge: ReferenceEdge,
    pub suggestions: Vec<String>,
}

/// The assembled reference graph
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    pub(crate) entities: BTreeMap<EntityKey, Entity>,
    pub(crate) edges: Vec<ReferenceEdge>,
    pub(crate) graph: DiGraph<GraphNode, EdgeKind>,
    pub(crate) node_indices: HashMap<GraphNode, NodeIndex>,
    /// Number of entity keys written more than once
    pub collisions: usize,
}

impl ReferenceGraph {
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Entities in key order
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity(&self, key: &EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// All edges, sorted and deduplicated
    pub fn edges(&self) -> &[ReferenceEdge] {
        &self.edges
    }

    /// Whether an edge lands on a known entity (table edges always do)
    pub fn is_resolved(&self, edge: &ReferenceEdge) -> bool {
        match edge.target_key() {
            Some(key) => self.entities.contains_key(&key),
            None => true,
        }
    }

    /// Entity keys directly reachable from `key` over resolved edges
    pub fn outgoing(&self, key: &EntityKey) -> Vec<&EntityKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Entity keys with a resolved edge into `key`
    pub fn incoming(&self, key: &EntityKey) -> Vec<&EntityKey> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: &EntityKey, direction: Direction) -> Vec<&EntityKey> {
        let Some(&idx) = self.node_indices.get(&GraphNode::Entity(key.clone())) else {
            return Vec::new();
        };
        let mut out: Vec<&EntityKey> = self
            .graph
            .edges_directed(idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                match self.graph.node_weight(other) {
                    Some(GraphNode::Entity(k)) => Some(k),
                    _ => None,
                }
            })
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Every explore named `name`, across models
    pub fn explores_named(&self, name: &str) -> Vec<&EntityKey> {
        let name = canonical(name);
        self.entities
            .keys()
            .filter(|k| k.kind == EntityKind::Explore && k.name == name)
            .collect()
    }

    /// Resolve an explore from a usage row. With a model, the model-scoped
    /// explore is preferred and unscoped explores of that name are the
    /// fallback; without one, every explore of that name matches.
    pub fn find_explores(&self, model: Option<&str>, explore: &str) -> Vec<&EntityKey> {
        let named = self.explores_named(explore);
        let Some(model) = model.map(canonical).filter(|m| !m.is_empty()) else {
            return named;
        };
        let scoped: Vec<_> = named.iter().copied().filter(|k| k.scope == model).collect();
        if !scoped.is_empty() {
            return scoped;
        }
        named.into_iter().filter(|k| k.scope.is_empty()).collect()
    }

    /// Resolved base view of an explore
    pub fn base_view(&self, explore: &EntityKey) -> Option<&Entity> {
        self.edges_from(explore)
            .filter(|e| e.kind == EdgeKind::BaseView)
            .find_map(|e| e.target_key().and_then(|k| self.entities.get(&k)))
    }

    /// Resolved views joined into an explore, through their join aliases
    pub fn joined_views(&self, explore: &EntityKey) -> Vec<&Entity> {
        let mut views = Vec::new();
        for alias_edge in self.edges_from(explore).filter(|e| e.kind == EdgeKind::Join) {
            let Some(alias) = alias_edge.target_key() else { continue };
            for view_edge in self.edges_from(&alias).filter(|e| e.kind == EdgeKind::Join) {
                if let Some(view) = view_edge.target_key().and_then(|k| self.entities.get(&k)) {
                    views.push(view);
                }
            }
        }
        views
    }

    /// Explores exposing view `name`: base view `name` or a join aliased `name`
    pub fn explores_exposing(&self, name: &str) -> Vec<&EntityKey> {
        let name = canonical(name);
        let mut out: Vec<&EntityKey> = self
            .edges
            .iter()
            .filter(|e| e.from.kind == EntityKind::Explore && self.entities.contains_key(&e.from))
            .filter(|e| match e.kind {
                EdgeKind::BaseView | EdgeKind::Join => canonical(&e.to_name) == name,
                _ => false,
            })
            .map(|e| &e.from)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn edges_from<'a>(&'a self, key: &'a EntityKey) -> impl Iterator<Item = &'a ReferenceEdge> + 'a {
        // `edges` is sorted with `from` first, so the block for a key is contiguous.
        let start = self.edges.partition_point(|e| &e.from < key);
        self.edges[start..].iter().take_while(move |e| &e.from == key)
    }

    /// The one-hop effective table set of an entity
    pub fn table_set(&self, key: &EntityKey) -> BTreeSet<String> {
        let Some(entity) = self.entities.get(key) else {
            return BTreeSet::new();
        };
        match entity.kind {
            EntityKind::View => entity.table_set(),
            EntityKind::Explore => {
                let mut tables = BTreeSet::new();
                if let Some(base) = self.base_view(key) {
                    tables.extend(base.table_set());
                }
                for view in self.joined_views(key) {
                    tables.extend(view.table_set());
                }
                tables
            }
            EntityKind::JoinAlias | EntityKind::FieldReference => self
                .edges_from(key)
                .filter(|e| matches!(e.kind, EdgeKind::Join | EdgeKind::FieldInterpolation))
                .filter_map(|e| e.target_key().and_then(|k| self.entities.get(&k)))
                .flat_map(|view| view.table_set())
                .collect(),
        }
    }

    /// Unresolved entity edges with fuzzy suggestions from names of the
    /// expected kind
    pub fn dangling(&self, suggestions: usize) -> Vec<DanglingEdge> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        self.edges
            .iter()
            .filter(|e| !self.is_resolved(e))
            .map(|edge| {
                let wanted = edge.target_kind();
                let mut scored: Vec<(i64, &str)> = self
                    .entities
                    .keys()
                    .filter(|k| Some(k.kind) == wanted)
                    .filter_map(|k| {
                        matcher
                            .fuzzy_match(&k.name, &canonical(&edge.to_name))
                            .map(|score| (score, k.name.as_str()))
                    })
                    .collect();
                scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
                scored.dedup_by(|a, b| a.1 == b.1);
                DanglingEdge {
                    edge: edge.clone(),
                    suggestions: scored
                        .into_iter()
                        .take(suggestions)
                        .map(|(_, name)| name.to_string())
                        .collect(),
                }
            })
            .collect()
    }

    /// Export as Graphviz DOT
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph LookML {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8, fontcolor=\"#808080\"];\n");
        output.push('\n');

        let color = |kind: EntityKind| match kind {
            EntityKind::View => "#00BCD4",
            EntityKind::Explore => "#FF9800",
            EntityKind::JoinAlias => "#9C27B0",
            EntityKind::FieldReference => "#607D8B",
        };

        for key in self.entities.keys() {
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];\n",
                dot_escape(&key.to_string()),
                dot_escape(&key.name),
                color(key.kind)
            ));
        }

        let mut tables: Vec<&String> = self
            .node_indices
            .keys()
            .filter_map(|n| match n {
                GraphNode::Table(t) => Some(t),
                GraphNode::Entity(_) => None,
            })
            .collect();
        tables.sort();
        for table in tables {
            output.push_str(&format!(
                "  \"table:{}\" [label=\"{}\", shape=cylinder, fillcolor=\"#795548\"];\n",
                dot_escape(table),
                dot_escape(table)
            ));
        }

        output.push('\n');

        for edge in &self.edges {
            if !self.is_resolved(edge) {
                continue;
            }
            let target = match edge.target_key() {
                Some(key) => key.to_string(),
                None => format!("table:{}", edge.to_name),
            };
            output.push_str(&format!(
                "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                dot_escape(&edge.from.to_string()),
                dot_escape(&target),
                edge.kind
            ));
        }

        output.push_str("}\n");
        output
    }
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
