//! LookML Directory Loading
//!
//! Walks a LookML checkout, extracts every matching file, and fingerprints
//! the inputs. Unreadable files are logged and skipped; a missing root is
//! the only fatal condition.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{extract_file, Entity, RawReference, TableFilter};
use crate::config::LookmlConfig;
use crate::error::{AuditError, Result};

/// All entities and raw references found under a LookML root
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Entities in file order (files sorted by path)
    pub entities: Vec<Entity>,
    pub references: Vec<RawReference>,
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub parse_diagnostics: usize,
    pub ignored_definitions: usize,
    /// SHA-256 over relative paths and contents of every scanned file
    pub fingerprint: String,
}

fn relative_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let name = name.to_lowercase();
    extensions.iter().any(|ext| name.ends_with(&ext.to_lowercase()))
}

/// Extract every LookML file under `root`
pub fn extract_directory(root: &Path, config: &LookmlConfig, filter: &TableFilter) -> Result<Extraction> {
    if !root.exists() {
        return Err(AuditError::MissingInput(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(AuditError::InvalidPath(root.to_path_buf()));
    }

    let mut extraction = Extraction::default();
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                extraction.files_skipped += 1;
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !matches_extension(path, &config.extensions) {
            continue;
        }

        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let relative = relative_str(&relative_path);
        if config.skip_prefixes.iter().any(|p| relative.starts_with(p.as_str())) {
            continue;
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %relative, error = %e, "Skipping unreadable file");
                extraction.files_skipped += 1;
                continue;
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        hasher.update(relative.as_bytes());
        hasher.update(&bytes);

        let file = extract_file(&content, &relative_path, filter);
        if file.diagnostics > 0 {
            debug!(file = %relative, skipped_tokens = file.diagnostics, "Recovered from malformed LookML");
        }
        extraction.files_scanned += 1;
        extraction.parse_diagnostics += file.diagnostics;
        extraction.ignored_definitions += file.ignored_definitions;
        extraction.entities.extend(file.entities);
        extraction.references.extend(file.references);
    }

    extraction.fingerprint = format!("{:x}", hasher.finalize());
    debug!(
        files = extraction.files_scanned,
        entities = extraction.entities.len(),
        "LookML extraction complete"
    );
    Ok(extraction)
}
