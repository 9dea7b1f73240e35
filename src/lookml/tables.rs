//! Physical Table Heuristics
//!
//! Pulls `schema.table` identifiers out of `sql_table_name` values and
//! derived-table SQL. This is a pattern matcher, not a SQL parser: no
//! comment stripping, no string-literal awareness, no parenthesis
//! balancing. Misses and false hits are expected and tolerated.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::config::TableFilterConfig;

static FROM_JOIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:from|join)\s+((?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[\w$]+)(?:\.(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[\w$]+))+)"#,
    )
    .expect("from/join pattern is valid")
});

/// The three-part validity filter for table candidates
#[derive(Debug, Clone)]
pub struct TableFilter {
    column_suffixes: BTreeSet<String>,
    sql_tokens: Vec<String>,
}

impl Default for TableFilter {
    fn default() -> Self {
        Self::from_config(&TableFilterConfig::default())
    }
}

impl TableFilter {
    pub fn from_config(config: &TableFilterConfig) -> Self {
        Self {
            column_suffixes: config
                .column_suffix_denylist
                .iter()
                .map(|s| s.trim().to_lowercase())
                .collect(),
            sql_tokens: config
                .sql_token_denylist
                .iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Accept a candidate iff it has a dot and does not end with one, its
    /// last segment is not column-like, and it carries no SQL token.
    pub fn is_valid_table(&self, candidate: &str) -> bool {
        if !candidate.contains('.') || candidate.ends_with('.') {
            return false;
        }

        let lower = candidate.to_lowercase();
        let suffix = lower.rsplit('.').next().unwrap_or("");
        if self.column_suffixes.contains(suffix) {
            return false;
        }

        !self.sql_tokens.iter().any(|tok| lower.contains(tok.as_str()))
    }

    /// Resolve a `sql_table_name` value to a canonical table, if it is one
    pub fn physical_table(&self, raw: &str) -> Option<String> {
        let first = raw.split_whitespace().next()?;
        if first.contains("${") || first.contains("{{") || first.contains("{%") {
            return None;
        }
        let candidate = canonical_table(first);
        self.is_valid_table(&candidate).then_some(candidate)
    }

    /// Every accepted `FROM`/`JOIN` table in a SQL body, sorted and deduplicated
    pub fn derived_sources(&self, sql: &str) -> BTreeSet<String> {
        FROM_JOIN_PATTERN
            .captures_iter(sql)
            .filter_map(|caps| caps.get(1))
            .map(|m| canonical_table(m.as_str()))
            .filter(|t| self.is_valid_table(t))
            .collect()
    }
}

/// Strip identifier quoting, lowercase, and keep the trailing `schema.table`
pub fn canonical_table(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '`' | '[' | ']' | '\''))
        .collect::<String>()
        .to_lowercase();

    let parts: Vec<&str> = cleaned.split('.').collect();
    if parts.len() > 2 && parts.iter().all(|p| !p.is_empty()) {
        parts[parts.len() - 2..].join(".")
    } else {
        cleaned
    }
}
