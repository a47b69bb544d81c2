//! Route and blueprint analysis.

use std::sync::Arc;

use super::{input_error_findings, scan_files, AnalysisResult, Analyzer, AnalyzerKind, CancellationToken};
use crate::config::Settings;
use crate::entity::{EntityExtractor, RouteEntity};
use crate::rules::{routes, RuleContext, RuleSet};
use crate::source::{SourceFile, SourceIndex};

/// Checks routes and blueprints across every non-migration source file.
pub struct ApiAnalyzer {
    settings: Arc<Settings>,
    token: CancellationToken,
    rules: RuleSet<RouteEntity>,
}

impl ApiAnalyzer {
    pub fn new(settings: Arc<Settings>, token: CancellationToken) -> Self {
        let rules = RuleSet::new(routes::rules(), &settings);
        Self {
            settings,
            token,
            rules,
        }
    }
}

impl Analyzer for ApiAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Api
    }

    fn run(&self, index: &SourceIndex) -> AnalysisResult {
        let ctx = RuleContext::new(&self.settings);
        let files: Vec<&SourceFile> = index
            .files()
            .filter(|f| !self.settings.is_migration_file(f.path()))
            .collect();
        tracing::debug!(analyzer = %self.kind(), files = files.len(), "analyzer started");

        let extractor = EntityExtractor::new(&self.settings);
        let scan = scan_files(&files, &ctx, &self.token, |file| extractor.routes(file));

        let mut findings = input_error_findings(index, &ctx);
        findings.extend(scan.findings);

        let mut routes = Vec::new();
        let mut blueprints = Vec::new();
        let mut registrations = Vec::new();
        for extraction in scan.outputs {
            routes.extend(extraction.routes);
            blueprints.extend(extraction.blueprints);
            registrations.extend(extraction.registrations);
        }
        tracing::debug!(
            routes = routes.len(),
            blueprints = blueprints.len(),
            "routes extracted"
        );

        findings.extend(self.rules.evaluate_all(&routes, &ctx));
        findings.extend(routes::cross_route(&routes, &blueprints, &registrations, &ctx));

        let result = AnalysisResult::new(self.kind(), findings, scan.files_scanned, scan.cancelled);
        tracing::debug!(analyzer = %self.kind(), findings = result.findings.len(), "analyzer finished");
        result
    }
}
