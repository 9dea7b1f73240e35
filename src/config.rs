//! Configuration management for the LookML audit
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (lookml-audit.toml)
//! - Environment variables (LOOKML_AUDIT__*)
//!
//! ## Example config file (lookml-audit.toml):
//! ```toml
//! [lookml]
//! root = "./looker-master"
//! extensions = [".lkml"]
//!
//! [usage]
//! dashboard_csv = "raw/system__activity_dashboard.csv"
//! look_csv = "raw/system__activity_look.csv"
//! history_csv = "raw/system__activity_history.csv"
//!
//! [output]
//! verdicts = "lookml_deprecation_audit.csv"
//! edges = "lookml_reference_edges.csv"
//! include_generated_at = false
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for an audit run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    /// LookML repository settings
    #[serde(default)]
    pub lookml: LookmlConfig,

    /// Physical table heuristics
    #[serde(default)]
    pub tables: TableFilterConfig,

    /// Usage export settings
    #[serde(default)]
    pub usage: UsageConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where the LookML files live and which of them to read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookmlConfig {
    /// Root of the LookML project checkout
    #[serde(default = "default_lookml_root")]
    pub root: PathBuf,

    /// File name suffixes to scan
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Relative path prefixes to skip
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

/// Denylists for the physical-table validity filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFilterConfig {
    /// Last dot-segments that look like columns rather than tables
    #[serde(default = "default_column_suffixes")]
    pub column_suffix_denylist: Vec<String>,

    /// Substrings that mark a candidate as an expression, not a table
    #[serde(default = "default_sql_tokens")]
    pub sql_token_denylist: Vec<String>,
}

/// System-activity exports and the columns read from them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    /// Dashboard usage export (explores used by dashboard tiles)
    #[serde(default)]
    pub dashboard_csv: Option<PathBuf>,

    /// Look usage export (explores used by saved looks)
    #[serde(default)]
    pub look_csv: Option<PathBuf>,

    /// History export with the free-text field list
    #[serde(default)]
    pub history_csv: Option<PathBuf>,

    /// Column names, matched after header normalization
    #[serde(default)]
    pub columns: UsageColumns,
}

/// Normalized column names in the usage exports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageColumns {
    #[serde(default = "default_explore_column")]
    pub explore: String,
    #[serde(default = "default_model_column")]
    pub model: String,
    #[serde(default = "default_dashboard_id_column")]
    pub dashboard_id: String,
    #[serde(default = "default_dashboard_title_column")]
    pub dashboard_title: String,
    #[serde(default = "default_look_id_column")]
    pub look_id: String,
    #[serde(default = "default_fields_column")]
    pub fields: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp: String,
}

/// Output file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Per-entity verdict table
    #[serde(default = "default_verdicts_path")]
    pub verdicts: PathBuf,

    /// Optional edge list
    #[serde(default)]
    pub edges: Option<PathBuf>,

    /// Optional dashboard → explore → tables lineage
    #[serde(default)]
    pub lineage: Option<PathBuf>,

    /// Append a `generated_at` column to the verdict table
    #[serde(default)]
    pub include_generated_at: bool,
}

// Default value functions
fn default_lookml_root() -> PathBuf {
    PathBuf::from("looker-master")
}

fn default_extensions() -> Vec<String> {
    vec![".lkml".to_string()]
}

fn default_skip_prefixes() -> Vec<String> {
    vec![
        ".git/".to_string(),
        "target/".to_string(),
        "node_modules/".to_string(),
    ]
}

fn default_column_suffixes() -> Vec<String> {
    [
        "created_at", "updated_at", "completed_time", "order_number", "success",
        "short_id", "address", "amount", "rate", "price", "city", "name", "id",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sql_tokens() -> Vec<String> {
    [
        "(", ")", "case", "when", "select", "datediff", "coalesce", "greatest", "extract",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_explore_column() -> String {
    "query_explore".to_string()
}

fn default_model_column() -> String {
    "query_model".to_string()
}

fn default_dashboard_id_column() -> String {
    "dashboard_id_user_defined_only".to_string()
}

fn default_dashboard_title_column() -> String {
    "dashboard_title".to_string()
}

fn default_look_id_column() -> String {
    "look_id".to_string()
}

fn default_fields_column() -> String {
    "query_formatted_fields".to_string()
}

fn default_timestamp_column() -> String {
    "history_created_time".to_string()
}

fn default_verdicts_path() -> PathBuf {
    PathBuf::from("lookml_deprecation_audit.csv")
}

impl Default for LookmlConfig {
    fn default() -> Self {
        Self {
            root: default_lookml_root(),
            extensions: default_extensions(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}

impl Default for TableFilterConfig {
    fn default() -> Self {
        Self {
            column_suffix_denylist: default_column_suffixes(),
            sql_token_denylist: default_sql_tokens(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            dashboard_csv: None,
            look_csv: None,
            history_csv: None,
            columns: UsageColumns::default(),
        }
    }
}

impl Default for UsageColumns {
    fn default() -> Self {
        Self {
            explore: default_explore_column(),
            model: default_model_column(),
            dashboard_id: default_dashboard_id_column(),
            dashboard_title: default_dashboard_title_column(),
            look_id: default_look_id_column(),
            fields: default_fields_column(),
            timestamp: default_timestamp_column(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            verdicts: default_verdicts_path(),
            edges: None,
            lineage: None,
            include_generated_at: false,
        }
    }
}

impl AuditConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "lookml-audit.toml",
            ".lookml-audit.toml",
            "config/lookml-audit.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "analytics", "lookml-audit") {
            let xdg_config = config_dir.config_dir().join("lookml-audit.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("LOOKML_AUDIT")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// LookML root with relative paths resolved against the working directory
    pub fn lookml_root(&self) -> PathBuf {
        absolutize(&self.lookml.root)
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    }
}
