//! LookML Entity Extraction
//!
//! Turns `.lkml` files into [`Entity`] records plus the raw references the
//! graph builder resolves later. Extraction never resolves names itself:
//! overrides are recorded as written and precedence is applied in one
//! place, [`crate::graph::builder`].
//!
//! This module is shared between:
//! - the audit pipeline (verdict table)
//! - the graph export binary (DOT)

pub mod lexer;
pub mod loader;
pub mod parser;
pub mod tables;

pub use loader::{extract_directory, Extraction};
pub use parser::{parse, Block, Document, Item, Value};
pub use tables::{canonical_table, TableFilter};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Canonical form for every name comparison: trimmed and lowercased
pub fn canonical(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Kinds of semantic-model entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    View,
    Explore,
    JoinAlias,
    FieldReference,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Explore => "explore",
            Self::JoinAlias => "join_alias",
            Self::FieldReference => "field_reference",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an entity in the name-indexed map.
///
/// `scope` is the model for explores, the owning explore for join aliases,
/// and the source file for field references. Views are unscoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub scope: String,
    pub name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, scope: Option<&str>, name: &str) -> Self {
        Self {
            kind,
            scope: scope.map(canonical).unwrap_or_default(),
            name: canonical(name),
        }
    }

    pub fn view(name: &str) -> Self {
        Self::new(EntityKind::View, None, name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}:{}", self.kind, self.name)
        } else {
            write!(f, "{}:{}/{}", self.kind, self.scope, self.name)
        }
    }
}

/// A named unit of the semantic model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Name as written in the source
    pub name: String,
    pub kind: EntityKind,
    /// See [`EntityKey`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Model name for explores defined in a `*.model.lkml` file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Path relative to the LookML root, `/`-separated
    pub source_file: PathBuf,
    /// 1-based line of the definition (0 for file-level references)
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_table: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub derived_source_tables: BTreeSet<String>,
}

impl Entity {
    pub fn new(kind: EntityKind, name: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            scope: None,
            model: None,
            source_file: source_file.into(),
            line: 0,
            physical_table: None,
            derived_source_tables: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.scope.as_deref(), &self.name)
    }

    /// `scope.name`, or just the name when unscoped
    pub fn qualified_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}.{}", scope, self.name),
            None => self.name.clone(),
        }
    }

    /// `{physical_table} ∪ derived_source_tables`
    pub fn table_set(&self) -> BTreeSet<String> {
        let mut tables = self.derived_source_tables.clone();
        if let Some(t) = &self.physical_table {
            tables.insert(t.clone());
        }
        tables
    }
}

/// Which explicit setting named an explore's base view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    From,
    ViewName,
}

/// A reference exactly as written, before any name resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawReference {
    /// `from:` or `view_name:` on an explore
    BaseViewOverride {
        explore: EntityKey,
        source: OverrideSource,
        target: String,
    },
    /// `join: alias { from: target }` inside an explore
    Join {
        explore: EntityKey,
        alias: String,
        from_override: Option<String>,
    },
    /// `${target.field}`; `owner` is the view or explore block it sits in
    Interpolation {
        owner: Option<EntityKey>,
        file: PathBuf,
        target: String,
    },
    /// `extends: [target]` on a view or explore
    Extends { from: EntityKey, target: String },
    /// Table attributes set by `view: +name`, merged into the refined view
    ViewRefinement {
        view: EntityKey,
        physical_table: Option<String>,
        derived_sources: BTreeSet<String>,
    },
}

/// Everything extracted from one file
#[derive(Debug, Clone, Default)]
pub struct FileExtraction {
    pub entities: Vec<Entity>,
    pub references: Vec<RawReference>,
    /// Tokens the parser skipped
    pub diagnostics: usize,
    /// Unnamed blocks and views beyond the file's primary view
    pub ignored_definitions: usize,
}

static FIELD_REF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\s*([\w\-]+)\.").expect("field reference pattern is valid"));

/// Distinct `${name.` targets in `text`, keyed by canonical name
fn interpolation_targets(text: &str, out: &mut BTreeMap<String, String>) {
    for caps in FIELD_REF_PATTERN.captures_iter(text) {
        let name = &caps[1];
        let key = canonical(name);
        if key == "table" {
            continue;
        }
        out.entry(key).or_insert_with(|| name.to_string());
    }
}

fn block_targets(block: &Block) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    collect_block_targets(block, &mut out);
    out
}

fn collect_block_targets(block: &Block, out: &mut BTreeMap<String, String>) {
    for item in &block.items {
        match &item.value {
            Value::Scalar(s) | Value::Expr(s) => interpolation_targets(s, out),
            Value::List(values) => values.iter().for_each(|v| interpolation_targets(v, out)),
            Value::Block(b) => collect_block_targets(b, out),
        }
    }
}

/// Model name for `*.model.lkml` files: the file name up to its first `.`
pub fn model_name(relative_path: &Path) -> Option<String> {
    let file_name = relative_path.file_name()?.to_str()?;
    if !file_name.to_lowercase().ends_with(".model.lkml") {
        return None;
    }
    file_name.split('.').next().map(str::to_string)
}

/// `+name` refines `name`; returns the refined name
fn refined_name(name: &str) -> Option<&str> {
    name.strip_prefix('+').map(str::trim).filter(|n| !n.is_empty())
}

fn extends_targets(block: &Block) -> Vec<String> {
    block
        .items
        .iter()
        .filter(|item| item.key.eq_ignore_ascii_case("extends"))
        .flat_map(|item| match &item.value {
            Value::List(values) => values.clone(),
            Value::Scalar(s) => vec![s.clone()],
            _ => Vec::new(),
        })
        .collect()
}

fn view_tables(block: &Block, filter: &TableFilter) -> (Option<String>, BTreeSet<String>) {
    let physical = block
        .scalar("sql_table_name")
        .and_then(|raw| filter.physical_table(raw));
    let mut derived = BTreeSet::new();
    for (derived_table, _) in block.blocks("derived_table") {
        if let Some(sql) = derived_table.scalar("sql") {
            derived.extend(filter.derived_sources(sql));
        }
    }
    (physical, derived)
}

/// Per-file extraction state shared by definitions and refinements
struct FileExtractor<'a> {
    path: &'a Path,
    model: Option<String>,
    out: FileExtraction,
    /// Targets referenced from inside some other entity's block
    owned: BTreeSet<String>,
    /// Targets a view references only as its own fields
    self_references: BTreeSet<String>,
}

impl<'a> FileExtractor<'a> {
    /// References a view block makes: extends and interpolations
    fn view_references(&mut self, block: &Block, key: &EntityKey) {
        for target in extends_targets(block) {
            self.out.references.push(RawReference::Extends { from: key.clone(), target });
        }
        for (canon, target) in block_targets(block) {
            // A view reading its own fields does not reference anything.
            if canon == key.name {
                self.self_references.insert(canon);
                continue;
            }
            self.owned.insert(canon);
            self.out.references.push(RawReference::Interpolation {
                owner: Some(key.clone()),
                file: self.path.to_path_buf(),
                target,
            });
        }
    }

    /// Overrides, joins, extends and interpolations of an explore block
    fn explore_references(&mut self, block: &Block, key: &EntityKey) {
        let scope = match &key.scope {
            s if s.is_empty() => key.name.clone(),
            s => format!("{}.{}", s, key.name),
        };

        if let Some(target) = block.scalar("from") {
            self.out.references.push(RawReference::BaseViewOverride {
                explore: key.clone(),
                source: OverrideSource::From,
                target: target.to_string(),
            });
        }
        if let Some(target) = block.scalar("view_name") {
            self.out.references.push(RawReference::BaseViewOverride {
                explore: key.clone(),
                source: OverrideSource::ViewName,
                target: target.to_string(),
            });
        }

        for (join, join_line) in block.blocks("join") {
            let Some(alias) = join.name.as_deref() else {
                self.out.diagnostics += 1;
                continue;
            };
            let mut member = Entity::new(EntityKind::JoinAlias, alias, self.path);
            member.line = join_line;
            member.scope = Some(scope.clone());
            member.model = self.model.clone();
            self.out.entities.push(member);

            self.out.references.push(RawReference::Join {
                explore: key.clone(),
                alias: alias.to_string(),
                from_override: join.scalar("from").map(str::to_string),
            });
        }

        for target in extends_targets(block) {
            self.out.references.push(RawReference::Extends { from: key.clone(), target });
        }
        for (canon, target) in block_targets(block) {
            self.owned.insert(canon);
            self.out.references.push(RawReference::Interpolation {
                owner: Some(key.clone()),
                file: self.path.to_path_buf(),
                target,
            });
        }
    }
}

/// Extract entities and raw references from one LookML file.
///
/// Only the first top-level `view:` block is taken as the file's view
/// definition; every top-level `explore:` block is an explore. Refinements
/// (`view: +name`, `explore: +name`) define nothing themselves, their
/// references are attributed to the refined entity. Field interpolations
/// are collected from the whole file whether or not it defines anything.
pub fn extract_file(content: &str, relative_path: &Path, filter: &TableFilter) -> FileExtraction {
    let doc = parse(content);
    let mut ex = FileExtractor {
        path: relative_path,
        model: model_name(relative_path),
        out: FileExtraction {
            diagnostics: doc.diagnostics,
            ..Default::default()
        },
        owned: BTreeSet::new(),
        self_references: BTreeSet::new(),
    };

    // Views: first match wins
    let mut primary_seen = false;
    for (block, line) in doc.root.blocks("view") {
        let Some(name) = block.name.as_deref() else {
            ex.out.ignored_definitions += 1;
            continue;
        };

        if let Some(refined) = refined_name(name) {
            let key = EntityKey::view(refined);
            let (physical_table, derived_sources) = view_tables(block, filter);
            if physical_table.is_some() || !derived_sources.is_empty() {
                ex.out.references.push(RawReference::ViewRefinement {
                    view: key.clone(),
                    physical_table,
                    derived_sources,
                });
            }
            ex.view_references(block, &key);
            continue;
        }

        if primary_seen {
            ex.out.ignored_definitions += 1;
            continue;
        }
        primary_seen = true;

        let mut view = Entity::new(EntityKind::View, name, relative_path);
        view.line = line;
        let (physical_table, derived_sources) = view_tables(block, filter);
        view.physical_table = physical_table;
        view.derived_source_tables = derived_sources;

        let key = view.key();
        ex.view_references(block, &key);
        ex.out.entities.push(view);
    }

    // Explores: every top-level block
    for (block, line) in doc.root.blocks("explore") {
        let Some(name) = block.name.as_deref() else {
            ex.out.ignored_definitions += 1;
            continue;
        };

        if let Some(refined) = refined_name(name) {
            let key = EntityKey::new(EntityKind::Explore, ex.model.as_deref(), refined);
            ex.explore_references(block, &key);
            continue;
        }

        let mut explore = Entity::new(EntityKind::Explore, name, relative_path);
        explore.line = line;
        explore.scope = ex.model.clone();
        explore.model = ex.model.clone();
        let key = explore.key();
        ex.explore_references(block, &key);
        ex.out.entities.push(explore);
    }

    // Field references: one entity per (name, file); the rest of the file
    // contributes unowned references.
    let mut all_targets = BTreeMap::new();
    interpolation_targets(content, &mut all_targets);
    let FileExtractor {
        mut out,
        owned,
        self_references,
        ..
    } = ex;
    for (canon, target) in all_targets {
        if self_references.contains(&canon) && !owned.contains(&canon) {
            continue;
        }

        let mut reference = Entity::new(EntityKind::FieldReference, target.clone(), relative_path);
        reference.scope = Some(relative_path.to_string_lossy().replace('\\', "/"));
        out.entities.push(reference);

        if !owned.contains(&canon) {
            out.references.push(RawReference::Interpolation {
                owner: None,
                file: relative_path.to_path_buf(),
                target,
            });
        }
    }

    out
}
