//! The four analyzers and the plumbing they share.
//!
//! An analyzer takes a read-only [`SourceIndex`], extracts the entities it
//! cares about, evaluates its rule sets and returns an [`AnalysisResult`].
//! Analyzers hold no mutable state and can run in any order, including in
//! parallel.

mod api;
mod database;
mod model;
mod structure;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::ExtractError;
use crate::rules::{Finding, RuleContext, RuleId, SeverityCounts};
use crate::source::{ParseFailure, SourceFile, SourceIndex};

pub use api::ApiAnalyzer;
pub use database::DatabaseAnalyzer;
pub use model::ModelAnalyzer;
pub use structure::StructureAnalyzer;

/// Analysis areas, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Structure,
    #[serde(rename = "models")]
    Model,
    Api,
    Database,
}

impl AnalyzerKind {
    pub const ALL: [AnalyzerKind; 4] = [
        AnalyzerKind::Structure,
        AnalyzerKind::Model,
        AnalyzerKind::Api,
        AnalyzerKind::Database,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyzerKind::Structure => "structure",
            AnalyzerKind::Model => "models",
            AnalyzerKind::Api => "api",
            AnalyzerKind::Database => "database",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnalyzerKind::Structure => "Project structure",
            AnalyzerKind::Model => "Models",
            AnalyzerKind::Api => "Routes and blueprints",
            AnalyzerKind::Database => "Migrations and configuration",
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of one analyzer run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analyzer: AnalyzerKind,
    pub findings: Vec<Finding>,
    pub summary: SeverityCounts,
    pub files_scanned: usize,
    pub cancelled: bool,
}

impl AnalysisResult {
    /// Sort findings by (file, line, rule order) and compute the summary.
    pub fn new(
        analyzer: AnalyzerKind,
        mut findings: Vec<Finding>,
        files_scanned: usize,
        cancelled: bool,
    ) -> Self {
        findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let summary = SeverityCounts::from_findings(&findings);
        Self {
            analyzer,
            findings,
            summary,
            files_scanned,
            cancelled,
        }
    }
}

/// An analysis area.
pub trait Analyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    fn run(&self, index: &SourceIndex) -> AnalysisResult;
}

/// Shared cancellation flag, checked once per file.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Per-file extraction output gathered by [`scan_files`].
pub(crate) struct FileScan<T> {
    /// Extracted values of the files that yielded them, in path order.
    pub outputs: Vec<T>,
    /// Parse and extraction failures.
    pub findings: Vec<Finding>,
    pub files_scanned: usize,
    pub cancelled: bool,
}

enum Outcome<T> {
    Done(T),
    Failed(Finding),
    Skipped,
}

pub(crate) fn parse_error_finding(file: &SourceFile, failure: &ParseFailure) -> Finding {
    Finding::new(
        RuleId::ParseError,
        file.path(),
        failure.line,
        file.path(),
        format!("could not parse file: {}", failure),
    )
}

fn extraction_error_finding(file: &SourceFile, message: String) -> Finding {
    Finding::new(
        RuleId::ExtractionError,
        file.path(),
        0,
        file.path(),
        format!("entity extraction failed: {}", message),
    )
}

/// Run `extract` over `files` in parallel.
///
/// Unparsable files become `parse_error` findings, extraction errors and
/// panics become `extraction_error` findings. Once the token is cancelled
/// the remaining files are skipped and the scan is marked cancelled.
pub(crate) fn scan_files<T, F>(
    files: &[&SourceFile],
    ctx: &RuleContext,
    token: &CancellationToken,
    extract: F,
) -> FileScan<T>
where
    T: Send,
    F: Fn(&SourceFile) -> Result<T, ExtractError> + Sync,
{
    let outcomes: Vec<Outcome<T>> = files
        .par_iter()
        .map(|file| {
            if token.is_cancelled() {
                return Outcome::Skipped;
            }
            if let Err(failure) = file.tree() {
                tracing::debug!(path = file.path(), %failure, "parse failure");
                return Outcome::Failed(parse_error_finding(file, failure));
            }
            match panic::catch_unwind(AssertUnwindSafe(|| extract(file))) {
                Ok(Ok(value)) => Outcome::Done(value),
                Ok(Err(ExtractError::Unparsed { failure, .. })) => {
                    Outcome::Failed(parse_error_finding(file, &failure))
                }
                Ok(Err(e)) => {
                    tracing::warn!(path = file.path(), error = %e, "extraction failed");
                    Outcome::Failed(extraction_error_finding(file, e.to_string()))
                }
                Err(_) => {
                    tracing::warn!(path = file.path(), "extraction panicked");
                    Outcome::Failed(extraction_error_finding(file, "extractor panicked".to_string()))
                }
            }
        })
        .collect();

    let mut scan = FileScan {
        outputs: Vec::new(),
        findings: Vec::new(),
        files_scanned: 0,
        cancelled: false,
    };
    for outcome in outcomes {
        match outcome {
            Outcome::Done(value) => {
                scan.files_scanned += 1;
                scan.outputs.push(value);
            }
            Outcome::Failed(finding) => {
                scan.files_scanned += 1;
                if ctx.enabled(finding.rule) {
                    scan.findings.push(finding);
                }
            }
            Outcome::Skipped => scan.cancelled = true,
        }
    }
    scan
}

/// One `input_error` finding per unreadable path of the index.
pub(crate) fn input_error_findings(index: &SourceIndex, ctx: &RuleContext) -> Vec<Finding> {
    if !ctx.enabled(RuleId::InputError) {
        return Vec::new();
    }
    index
        .input_errors()
        .iter()
        .map(|e| {
            Finding::new(
                RuleId::InputError,
                e.path.as_str(),
                0,
                e.path.as_str(),
                format!("could not read path: {}", e.message),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[test]
    fn test_scan_isolates_failures() {
        let index = SourceIndex::from_sources([
            ("a.py", "x = 1\n"),
            ("b.py", "def broken(:\n"),
            ("c.py", "y = 2\n"),
        ]);
        let files: Vec<&SourceFile> = index.files().collect();
        let settings = Settings::default();
        let ctx = RuleContext::new(&settings);

        let scan = scan_files(&files, &ctx, &CancellationToken::new(), |f| {
            if f.path() == "c.py" {
                panic!("extractor bug");
            }
            Ok(f.path().to_string())
        });

        assert_eq!(scan.outputs, vec!["a.py".to_string()]);
        assert_eq!(scan.files_scanned, 3);
        assert!(!scan.cancelled);
        let rules: Vec<RuleId> = scan.findings.iter().map(|f| f.rule).collect();
        assert_eq!(rules, vec![RuleId::ParseError, RuleId::ExtractionError]);
    }

    #[test]
    fn test_cancelled_scan_skips_files() {
        let index = SourceIndex::from_sources([("a.py", ""), ("b.py", "")]);
        let files: Vec<&SourceFile> = index.files().collect();
        let settings = Settings::default();
        let token = CancellationToken::new();
        token.cancel();

        let scan = scan_files(&files, &RuleContext::new(&settings), &token, |_| Ok(()));
        assert!(scan.cancelled);
        assert_eq!(scan.files_scanned, 0);
        assert!(scan.outputs.is_empty());
    }

    #[test]
    fn test_result_is_sorted() {
        let findings = vec![
            Finding::new(RuleId::ModelMissingRepr, "b.py", 1, "B", "x"),
            Finding::new(RuleId::ModelMissingRepr, "a.py", 9, "A", "x"),
            Finding::new(RuleId::ModelClassNaming, "a.py", 9, "A", "y"),
        ];
        let result = AnalysisResult::new(AnalyzerKind::Model, findings, 2, false);
        let order: Vec<(&str, RuleId)> = result
            .findings
            .iter()
            .map(|f| (f.file.as_str(), f.rule))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a.py", RuleId::ModelClassNaming),
                ("a.py", RuleId::ModelMissingRepr),
                ("b.py", RuleId::ModelMissingRepr),
            ]
        );
        assert_eq!(result.summary.total(), 3);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(AnalyzerKind::Model.as_str(), "models");
        assert_eq!(
            serde_json::to_string(&AnalyzerKind::Model).unwrap(),
            "\"models\""
        );
    }
}
