//! SQLAlchemy model analysis.

use std::sync::Arc;

use super::{input_error_findings, scan_files, AnalysisResult, Analyzer, AnalyzerKind, CancellationToken};
use crate::config::Settings;
use crate::entity::{resolve_models, EntityExtractor, ModelEntity};
use crate::rules::{models, Finding, RuleContext, RuleId, RuleSet};
use crate::source::{SourceFile, SourceIndex};

/// Checks model definitions found in the `model_dirs` files.
pub struct ModelAnalyzer {
    settings: Arc<Settings>,
    token: CancellationToken,
    rules: RuleSet<ModelEntity>,
}

impl ModelAnalyzer {
    pub fn new(settings: Arc<Settings>, token: CancellationToken) -> Self {
        let rules = RuleSet::new(models::rules(), &settings);
        Self {
            settings,
            token,
            rules,
        }
    }

    fn model_files<'i>(&self, index: &'i SourceIndex) -> Vec<&'i SourceFile> {
        index
            .files()
            .filter(|f| {
                self.settings.is_model_file(f.path()) && !self.settings.is_migration_file(f.path())
            })
            .collect()
    }

    /// Parsable non-model, non-migration files, searched for base classes.
    fn support_files<'i>(&self, index: &'i SourceIndex) -> Vec<&'i SourceFile> {
        index
            .files()
            .filter(|f| {
                !self.settings.is_model_file(f.path())
                    && !self.settings.is_migration_file(f.path())
                    && f.tree().is_ok()
            })
            .collect()
    }
}

impl Analyzer for ModelAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Model
    }

    fn run(&self, index: &SourceIndex) -> AnalysisResult {
        let ctx = RuleContext::new(&self.settings);
        let files = self.model_files(index);
        tracing::debug!(analyzer = %self.kind(), files = files.len(), "analyzer started");

        let mut findings: Vec<Finding> = input_error_findings(index, &ctx);
        if files.is_empty() {
            if ctx.enabled(RuleId::ModelsNotFound) {
                findings.push(Finding::project(
                    RuleId::ModelsNotFound,
                    "models",
                    format!(
                        "no model files matched model_dirs ({})",
                        self.settings.config().model_dirs.join(", ")
                    ),
                ));
            }
            return AnalysisResult::new(self.kind(), findings, 0, false);
        }

        let extractor = EntityExtractor::new(&self.settings);
        let scan = scan_files(&files, &ctx, &self.token, |file| extractor.model_classes(file));
        findings.extend(scan.findings);

        // Classes outside the model files can still be bases of models.
        let mut class_sets = scan.outputs;
        if !scan.cancelled {
            class_sets.extend(self.support_files(index).into_iter().filter_map(|file| {
                extractor
                    .model_classes(file)
                    .map_err(|e| tracing::debug!(path = file.path(), error = %e, "classes skipped"))
                    .ok()
            }));
        }

        let all_models: Vec<ModelEntity> = resolve_models(class_sets, &self.settings)
            .into_iter()
            .filter(|m| self.settings.is_model_file(&m.file))
            .collect();
        tracing::debug!(models = all_models.len(), "models extracted");

        findings.extend(self.rules.evaluate_all(&all_models, &ctx));
        findings.extend(models::cross_model(&all_models, &ctx));

        let result = AnalysisResult::new(self.kind(), findings, scan.files_scanned, scan.cancelled);
        tracing::debug!(analyzer = %self.kind(), findings = result.findings.len(), "analyzer finished");
        result
    }
}
