//! Usage Evidence
//!
//! Structured facts from the dashboard and look exports, and free-text
//! field references from the history export. Both seed the reachability
//! root set.

pub mod loader;

pub use loader::{load_usage, normalize_header, parse_date, parse_field_list, UsageInputs};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which export a piece of evidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Dashboard,
    Look,
    History,
}

impl fmt::Display for UsageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dashboard => "dashboard",
            Self::Look => "look",
            Self::History => "history",
        })
    }
}

/// "Explore E of model M was used by dashboard/look Y"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageFact {
    pub source: UsageSource,
    pub model: Option<String>,
    pub explore: String,
    /// Dashboard or look id
    pub consumer_id: Option<String>,
    pub consumer_title: Option<String>,
    pub used_on: Option<NaiveDate>,
}

/// "Dotted name X was referenced by query Y on date D"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// `view.field` or `model.explore`
    pub entity: String,
    pub consumer: Option<String>,
    pub used_on: Option<NaiveDate>,
}

impl UsageRecord {
    /// Segment before the first `.`
    pub fn prefix(&self) -> &str {
        self.entity.split('.').next().unwrap_or("").trim()
    }

    /// Segment after the first `.`
    pub fn suffix(&self) -> &str {
        self.entity.split_once('.').map(|(_, s)| s.trim()).unwrap_or("")
    }
}
