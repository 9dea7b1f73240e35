//! LookML Deprecation Audit
//!
//! Finds the LookML explores, views and joins that nothing uses any more.
//!
//! ## Features
//!
//! - **Entity Extraction**: views, explores, join aliases and `${view.field}`
//!   references from a LookML checkout, with physical and derived-table sources
//! - **Reference Graph**: name-indexed, deterministic precedence, dangling
//!   references kept and reported
//! - **Usage Reachability**: roots from dashboard, look and history exports,
//!   closed over the graph with last-used dates
//! - **Reports**: verdict, edge and dashboard lineage CSVs
//!
//! ## Pipeline
//!
//! ```text
//! looker-master/**/*.lkml ──► lookml::extract_directory ──► graph::build
//!                                                              │
//! system__activity_*.csv ──► usage::load_usage ──► graph::seed_roots
//!                                                              │
//!                     report::write_verdicts ◄── graph::verdicts ◄── graph::reachability
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod lookml;
pub mod pipeline;
pub mod report;
pub mod usage;

pub use config::AuditConfig;
pub use error::{AuditError, Result};
pub use graph::{DeprecationVerdict, EdgeKind, ReferenceEdge, ReferenceGraph};
pub use lookml::{Entity, EntityKey, EntityKind};
pub use pipeline::{analyze, run, Audit};
pub use report::RunSummary;
pub use usage::{UsageFact, UsageRecord, UsageSource};
