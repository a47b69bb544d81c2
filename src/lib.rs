//! freview - static review of Flask projects.
//!
//! freview reads a Flask / SQLAlchemy / Alembic project from disk, never
//! importing or executing it, and reports structural problems.
//!
//! # Architecture
//!
//! - `source`: file index with lazily parsed tree-sitter Python trees
//! - `entity`: extraction of models, routes, blueprints, migrations and config
//! - `rules`: rule identifiers, findings and the per-area rule sets
//! - `analyzer`: the four analyzers and their shared scanning plumbing
//! - `aggregate`: merging analyzer results into one report
//! - `engine`: orchestration over a project root
//! - `config`: `.freview.toml` / `freview.yaml` loading and validation
//! - `report`: pretty, JSON and Markdown output

pub mod aggregate;
pub mod analyzer;
pub mod cli;
pub mod config;
pub mod engine;
pub mod entity;
pub mod report;
pub mod rules;
pub mod source;

pub use aggregate::{FindingGroup, Report, ReportAggregator, SeverityPolicy};
pub use analyzer::{AnalysisResult, Analyzer, AnalyzerKind, CancellationToken};
pub use config::{ConfigError, ReviewConfig, Settings};
pub use engine::Engine;
pub use entity::{Entity, EntityExtractor};
pub use rules::{Finding, RuleId, Severity, SeverityCounts};
pub use source::{SourceFile, SourceIndex};
