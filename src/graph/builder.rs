//! Graph Construction
//!
//! Applies name precedence to the raw references recorded by extraction
//! and assembles the [`ReferenceGraph`]:
//!
//! - explore base view: `from:` > `view_name:` > unresolved
//! - join target: `from:` > join alias
//!
//! The explore's own name is never used as a base view. Refinements
//! (`+name`) were already attributed to the refined key during extraction;
//! a refined view's `sql_table_name` replaces the original.

use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use super::{EdgeKind, GraphNode, ReferenceEdge, ReferenceGraph};
use crate::lookml::{canonical, EntityKey, EntityKind, Extraction, OverrideSource, RawReference};

/// Qualified name of an explore key, used as the scope of its join aliases
fn explore_scope(key: &EntityKey) -> String {
    if key.scope.is_empty() {
        key.name.clone()
    } else {
        format!("{}.{}", key.scope, key.name)
    }
}

fn file_scope(path: &std::path::Path) -> String {
    canonical(&path.to_string_lossy().replace('\\', "/"))
}

#[derive(Default)]
struct BaseViewOverrides {
    from: Option<String>,
    view_name: Option<String>,
}

/// Build the reference graph from an extraction
pub fn build(extraction: &Extraction) -> ReferenceGraph {
    let mut entities = BTreeMap::new();
    let mut collisions = 0;
    for entity in &extraction.entities {
        let key = entity.key();
        if let Some(previous) = entities.insert(key.clone(), entity.clone()) {
            // Field references are deduplicated per file already; anything
            // else landing here is a genuine redefinition.
            collisions += 1;
            debug!(
                key = %key,
                previous = %previous.source_file.display(),
                current = %entity.source_file.display(),
                "Entity redefined, keeping the later definition"
            );
        }
    }

    let mut edges: BTreeSet<ReferenceEdge> = BTreeSet::new();
    let mut overrides: BTreeMap<EntityKey, BaseViewOverrides> = BTreeMap::new();

    for reference in &extraction.references {
        match reference {
            RawReference::BaseViewOverride { explore, source, target } => {
                let entry = overrides.entry(explore.clone()).or_default();
                match source {
                    OverrideSource::From => entry.from = Some(target.clone()),
                    OverrideSource::ViewName => entry.view_name = Some(target.clone()),
                }
            }
            RawReference::Join { explore, alias, from_override } => {
                let scope = explore_scope(explore);
                edges.insert(ReferenceEdge {
                    from: explore.clone(),
                    kind: EdgeKind::Join,
                    to_scope: scope.clone(),
                    to_name: alias.clone(),
                });
                edges.insert(ReferenceEdge {
                    from: EntityKey::new(EntityKind::JoinAlias, Some(&scope), alias),
                    kind: EdgeKind::Join,
                    to_scope: String::new(),
                    to_name: from_override.clone().unwrap_or_else(|| alias.clone()),
                });
            }
            RawReference::Interpolation { owner, file, target } => {
                let scope = file_scope(file);
                let reference = EntityKey::new(EntityKind::FieldReference, Some(&scope), target);
                if let Some(owner) = owner {
                    edges.insert(ReferenceEdge {
                        from: owner.clone(),
                        kind: EdgeKind::FieldInterpolation,
                        to_scope: scope.clone(),
                        to_name: target.clone(),
                    });
                }
                edges.insert(ReferenceEdge {
                    from: reference,
                    kind: EdgeKind::FieldInterpolation,
                    to_scope: String::new(),
                    to_name: target.clone(),
                });
            }
            RawReference::Extends { from, target } => {
                edges.insert(ReferenceEdge {
                    from: from.clone(),
                    kind: EdgeKind::Extends,
                    to_scope: from.scope.clone(),
                    to_name: target.clone(),
                });
            }
            RawReference::ViewRefinement { view, physical_table, derived_sources } => {
                let Some(entity) = entities.get_mut(view) else {
                    debug!(view = %view, "Refinement of an undefined view");
                    continue;
                };
                if physical_table.is_some() {
                    entity.physical_table = physical_table.clone();
                }
                entity.derived_source_tables.extend(derived_sources.iter().cloned());
            }
        }
    }

    for (explore, found) in overrides {
        if let Some(target) = found.from.or(found.view_name) {
            edges.insert(ReferenceEdge {
                from: explore,
                kind: EdgeKind::BaseView,
                to_scope: String::new(),
                to_name: target,
            });
        }
    }

    for (key, entity) in entities.iter().filter(|(k, _)| k.kind == EntityKind::View) {
        if let Some(table) = &entity.physical_table {
            edges.insert(ReferenceEdge {
                from: key.clone(),
                kind: EdgeKind::SqlTable,
                to_scope: String::new(),
                to_name: table.clone(),
            });
        }
        for table in &entity.derived_source_tables {
            edges.insert(ReferenceEdge {
                from: key.clone(),
                kind: EdgeKind::DerivedSource,
                to_scope: String::new(),
                to_name: table.clone(),
            });
        }
    }

    let edges: Vec<ReferenceEdge> = edges.into_iter().collect();

    let mut graph = DiGraph::with_capacity(entities.len(), edges.len());
    let mut node_indices = HashMap::with_capacity(entities.len());
    for key in entities.keys() {
        let node = GraphNode::Entity(key.clone());
        let idx = graph.add_node(node.clone());
        node_indices.insert(node, idx);
    }

    let mut dangling = 0;
    for edge in &edges {
        let Some(&from_idx) = node_indices.get(&GraphNode::Entity(edge.from.clone())) else {
            dangling += 1;
            continue;
        };
        let target = match edge.target_key() {
            Some(key) if entities.contains_key(&key) => GraphNode::Entity(key),
            Some(_) => {
                dangling += 1;
                continue;
            }
            None => GraphNode::Table(edge.to_name.clone()),
        };
        let to_idx = *node_indices
            .entry(target.clone())
            .or_insert_with(|| graph.add_node(target));
        graph.add_edge(from_idx, to_idx, edge.kind);
    }

    debug!(
        entities = entities.len(),
        edges = edges.len(),
        dangling,
        collisions,
        "Reference graph built"
    );

    ReferenceGraph {
        entities,
        edges,
        graph,
        node_indices,
        collisions,
    }
}
