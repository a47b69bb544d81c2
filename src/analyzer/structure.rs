//! Project layout analysis.

use std::sync::Arc;

use super::{input_error_findings, scan_files, AnalysisResult, Analyzer, AnalyzerKind, CancellationToken};
use crate::config::Settings;
use crate::entity::ProjectLayout;
use crate::rules::{structure, RuleContext, RuleSet};
use crate::source::{SourceFile, SourceIndex};

/// Checks the project layout and reports every file that fails to parse.
pub struct StructureAnalyzer {
    settings: Arc<Settings>,
    token: CancellationToken,
    rules: RuleSet<ProjectLayout>,
}

impl StructureAnalyzer {
    pub fn new(settings: Arc<Settings>, token: CancellationToken) -> Self {
        let rules = RuleSet::new(structure::rules(), &settings);
        Self {
            settings,
            token,
            rules,
        }
    }
}

impl Analyzer for StructureAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Structure
    }

    fn run(&self, index: &SourceIndex) -> AnalysisResult {
        let ctx = RuleContext::new(&self.settings);
        tracing::debug!(analyzer = %self.kind(), files = index.len(), "analyzer started");

        let files: Vec<&SourceFile> = index.files().collect();
        let scan = scan_files(&files, &ctx, &self.token, |_| Ok(()));

        let mut findings = scan.findings;
        findings.extend(input_error_findings(index, &ctx));

        let layout = ProjectLayout::from_index(index);
        findings.extend(self.rules.evaluate(&layout, &ctx));

        let result = AnalysisResult::new(self.kind(), findings, scan.files_scanned, scan.cancelled);
        tracing::debug!(analyzer = %self.kind(), findings = result.findings.len(), "analyzer finished");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleId;

    fn run(index: &SourceIndex) -> AnalysisResult {
        StructureAnalyzer::new(Arc::new(Settings::default()), CancellationToken::new()).run(index)
    }

    #[test]
    fn test_conventional_layout() {
        let mut index = SourceIndex::from_sources([
            ("run.py", "from app import create_app\n"),
            ("config.py", "DEBUG = False\n"),
            ("app/__init__.py", ""),
            ("app/models/__init__.py", ""),
            ("app/models/user.py", ""),
        ]);
        index.add_inventory("app/templates/base.html");
        index.add_inventory("app/static/site.css");

        let result = run(&index);
        assert!(result.findings.is_empty(), "{:?}", result.findings);
        assert_eq!(result.files_scanned, 5);
    }

    #[test]
    fn test_parse_error_reported_once_per_file() {
        let index = SourceIndex::from_sources([("app.py", "def f(:\n"), ("models.py", "")]);
        let result = run(&index);
        let parse_errors: Vec<_> = result
            .findings
            .iter()
            .filter(|f| f.rule == RuleId::ParseError)
            .collect();
        assert_eq!(parse_errors.len(), 1);
        assert_eq!(parse_errors[0].file, "app.py");
    }

    #[test]
    fn test_run_is_idempotent() {
        let index = SourceIndex::from_sources([("main.py", "")]);
        assert_eq!(run(&index), run(&index));
    }
}
