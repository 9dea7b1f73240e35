//! Usage Export Loading
//!
//! Reads the system-activity CSV exports. Headers are normalized before
//! lookup, so `Query Explore` and `query_explore` name the same column.
//! A missing file, a bad row, or an unparseable field list is logged and
//! skipped; none of them stops a run.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use super::{UsageFact, UsageRecord, UsageSource};
use crate::config::{UsageColumns, UsageConfig};
use crate::error::{AuditError, Result};

/// Everything read from the usage exports
#[derive(Debug, Clone, Default)]
pub struct UsageInputs {
    pub facts: Vec<UsageFact>,
    pub records: Vec<UsageRecord>,
    pub rows_read: usize,
    pub rows_skipped: usize,
    /// Configured files that do not exist or could not be read
    pub files_missing: usize,
}

/// Lowercase, trim, map spaces and dashes to `_`, drop parentheses
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '(' | ')'))
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

static DOTTED_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_.]*$").expect("dotted name pattern is valid")
});

/// Parse a free-text field list: a JSON list, a single-quoted list, or a
/// bare comma-separated list. Items that are not `name.name` are dropped.
///
/// Returns `None` when a bracketed list cannot be parsed at all.
pub fn parse_field_list(raw: &str) -> Option<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(Vec::new());
    }

    let items: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str::<Vec<String>>(raw)
            .or_else(|_| serde_json::from_str::<Vec<String>>(&raw.replace('\'', "\"")))
            .ok()?
    } else {
        raw.split(',')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .collect()
    };

    Some(
        items
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| DOTTED_NAME_PATTERN.is_match(s))
            .collect(),
    )
}

/// Parse a usage timestamp into a date. Unrecognized input yields `None`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok().map(|dt| dt.date()))
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        })
}

/// A CSV export opened with its normalized header index
struct Export {
    reader: csv::Reader<File>,
    columns: HashMap<String, usize>,
}

impl Export {
    fn open(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let mut columns = HashMap::new();
        for (idx, header) in reader.headers()?.iter().enumerate() {
            columns.entry(normalize_header(header)).or_insert(idx);
        }
        Ok(Self { reader, columns })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.columns.get(&normalize_header(name)).copied()
    }

    fn require(&self, path: &Path, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| AuditError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
    }
}

fn cell(record: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    let value = record.get(idx?)?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Rows read from one export
#[derive(Debug, Default)]
struct Rows {
    facts: Vec<UsageFact>,
    records: Vec<UsageRecord>,
    read: usize,
    skipped: usize,
}

/// Read a dashboard or look export into usage facts
fn read_facts(path: &Path, source: UsageSource, columns: &UsageColumns) -> Result<Rows> {
    let mut export = Export::open(path)?;
    let explore_col = export.require(path, &columns.explore)?;
    let model_col = export.column(&columns.model);
    let (id_col, title_col) = match source {
        UsageSource::Dashboard => (
            export.column(&columns.dashboard_id),
            export.column(&columns.dashboard_title),
        ),
        _ => (export.column(&columns.look_id), None),
    };
    let time_col = export.column(&columns.timestamp);

    let mut rows = Rows::default();
    for (row, record) in export.reader.records().enumerate() {
        rows.read += 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), row = row + 1, error = %e, "Skipping malformed row");
                rows.skipped += 1;
                continue;
            }
        };
        let Some(explore) = cell(&record, Some(explore_col)) else {
            debug!(file = %path.display(), row = row + 1, "Row names no explore");
            rows.skipped += 1;
            continue;
        };
        rows.facts.push(UsageFact {
            source,
            model: cell(&record, model_col),
            explore,
            consumer_id: cell(&record, id_col),
            consumer_title: cell(&record, title_col),
            used_on: cell(&record, time_col).and_then(|t| parse_date(&t)),
        });
    }
    Ok(rows)
}

/// Read the history export: field lists become usage records, and rows
/// carrying an explore also become usage facts
fn read_history(path: &Path, columns: &UsageColumns) -> Result<Rows> {
    let mut export = Export::open(path)?;
    let fields_col = export.require(path, &columns.fields)?;
    let explore_col = export.column(&columns.explore);
    let model_col = export.column(&columns.model);
    let time_col = export.column(&columns.timestamp);
    let consumer_col = export
        .column(&columns.dashboard_id)
        .or_else(|| export.column(&columns.look_id));

    let mut rows = Rows::default();
    for (row, record) in export.reader.records().enumerate() {
        rows.read += 1;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %path.display(), row = row + 1, error = %e, "Skipping malformed row");
                rows.skipped += 1;
                continue;
            }
        };

        let raw_fields = cell(&record, Some(fields_col)).unwrap_or_default();
        let Some(fields) = parse_field_list(&raw_fields) else {
            warn!(file = %path.display(), row = row + 1, fields = %raw_fields, "Unparseable field list");
            rows.skipped += 1;
            continue;
        };

        let used_on = cell(&record, time_col).and_then(|t| parse_date(&t));
        let consumer = cell(&record, consumer_col);

        if let Some(explore) = cell(&record, explore_col) {
            rows.facts.push(UsageFact {
                source: UsageSource::History,
                model: cell(&record, model_col),
                explore,
                consumer_id: consumer.clone(),
                consumer_title: None,
                used_on,
            });
        }
        rows.records.extend(fields.into_iter().map(|entity| UsageRecord {
            entity,
            consumer: consumer.clone(),
            used_on,
        }));
    }
    Ok(rows)
}

/// Load every configured usage export
pub fn load_usage(config: &UsageConfig) -> UsageInputs {
    let mut inputs = UsageInputs::default();
    let sources = [
        (config.dashboard_csv.as_deref(), UsageSource::Dashboard),
        (config.look_csv.as_deref(), UsageSource::Look),
        (config.history_csv.as_deref(), UsageSource::History),
    ];

    for (path, source) in sources {
        let Some(path) = path else { continue };
        if !path.is_file() {
            warn!(file = %path.display(), %source, "Usage export not found, skipping");
            inputs.files_missing += 1;
            continue;
        }

        let result = match source {
            UsageSource::History => read_history(path, &config.columns),
            _ => read_facts(path, source, &config.columns),
        };
        match result {
            Ok(rows) => {
                info!(
                    file = %path.display(),
                    %source,
                    rows = rows.read,
                    skipped = rows.skipped,
                    "Loaded usage export"
                );
                inputs.rows_read += rows.read;
                inputs.rows_skipped += rows.skipped;
                inputs.facts.extend(rows.facts);
                inputs.records.extend(rows.records);
            }
            Err(e) => {
                warn!(file = %path.display(), %source, error = %e, "Could not read usage export, skipping");
                inputs.files_missing += 1;
            }
        }
    }

    inputs
}
