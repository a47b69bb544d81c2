//! Review engine that orchestrates all analyzers.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::aggregate::{Report, ReportAggregator};
use crate::analyzer::{
    AnalysisResult, Analyzer, ApiAnalyzer, CancellationToken, DatabaseAnalyzer, ModelAnalyzer,
    StructureAnalyzer,
};
use crate::config::{ConfigError, ReviewConfig, Settings};
use crate::source::SourceIndex;

/// Runs the enabled analyzers over a project tree.
pub struct Engine {
    settings: Arc<Settings>,
    token: CancellationToken,
}

impl Engine {
    /// Validate `config` and build an engine from it.
    pub fn new(config: &ReviewConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_settings(config.compile()?))
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            token: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Token that stops every analyzer at its next file.
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// The analyzers not switched off by the `skip_*` flags, in report order.
    pub fn analyzers(&self) -> Vec<Box<dyn Analyzer>> {
        let config = self.settings.config();
        let mut analyzers: Vec<Box<dyn Analyzer>> = Vec::new();
        if !config.skip_structure {
            analyzers.push(Box::new(StructureAnalyzer::new(
                Arc::clone(&self.settings),
                self.token.clone(),
            )));
        }
        if !config.skip_models {
            analyzers.push(Box::new(ModelAnalyzer::new(
                Arc::clone(&self.settings),
                self.token.clone(),
            )));
        }
        if !config.skip_api {
            analyzers.push(Box::new(ApiAnalyzer::new(
                Arc::clone(&self.settings),
                self.token.clone(),
            )));
        }
        if !config.skip_database {
            analyzers.push(Box::new(DatabaseAnalyzer::new(
                Arc::clone(&self.settings),
                self.token.clone(),
            )));
        }
        analyzers
    }

    pub fn build_index<P: AsRef<Path>>(&self, root: P) -> SourceIndex {
        SourceIndex::build(root, &self.settings)
    }

    /// Index `root` and review it.
    pub fn run<P: AsRef<Path>>(&self, root: P) -> Report {
        let index = self.build_index(root);
        self.run_index(&index)
    }

    /// Review an already built index.
    pub fn run_index(&self, index: &SourceIndex) -> Report {
        let analyzers = self.analyzers();
        tracing::info!(
            root = %index.root().display(),
            files = index.len(),
            analyzers = analyzers.len(),
            "review started"
        );

        let results: Vec<AnalysisResult> = analyzers
            .par_iter()
            .map(|analyzer| analyzer.run(index))
            .collect();
        let report = ReportAggregator::aggregate_with(results, &self.settings.severity_policy());

        if report.cancelled {
            tracing::warn!("review cancelled before all files were analyzed");
        }
        tracing::info!(
            errors = report.summary.errors,
            warnings = report.summary.warnings,
            infos = report.summary.infos,
            "review finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerKind;
    use crate::rules::RuleId;

    #[test]
    fn test_skip_flags_remove_analyzers() {
        let config = ReviewConfig {
            skip_models: true,
            skip_database: true,
            ..Default::default()
        };
        let engine = Engine::new(&config).unwrap();
        let kinds: Vec<AnalyzerKind> = engine.analyzers().iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![AnalyzerKind::Structure, AnalyzerKind::Api]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ReviewConfig::default();
        config.skip_checks.insert("no_such_rule".into());
        assert!(matches!(
            Engine::new(&config),
            Err(ConfigError::UnknownCheck(id)) if id == "no_such_rule"
        ));
    }

    #[test]
    fn test_run_index_groups_by_analyzer() {
        let engine = Engine::with_settings(Settings::default());
        let index = SourceIndex::from_sources([(
            "app/models.py",
            "class Post(db.Model):\n    title = db.Column(db.String)\n",
        )]);
        let report = engine.run_index(&index);

        assert_eq!(report.groups.len(), 4);
        assert!(report.has_blocking_errors);
        let model = report.group(AnalyzerKind::Model).unwrap();
        assert!(model
            .findings
            .iter()
            .any(|f| f.rule == RuleId::ModelMissingPrimaryKey));
    }

    #[test]
    fn test_cancelled_engine_marks_report() {
        let engine = Engine::with_settings(Settings::default());
        engine.cancellation().cancel();
        let index = SourceIndex::from_sources([("app.py", "x = 1\n")]);
        let report = engine.run_index(&index);
        assert!(report.cancelled);
        assert_eq!(report.files_scanned, 0);
    }
}
