//! Merging analyzer results into one report.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalysisResult, AnalyzerKind};
use crate::rules::{Finding, Severity, SeverityCounts};

/// Findings of one analyzer after deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingGroup {
    pub analyzer: AnalyzerKind,
    pub findings: Vec<Finding>,
    pub summary: SeverityCounts,
    pub files_scanned: usize,
    pub cancelled: bool,
}

/// The merged outcome of a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Groups in fixed analyzer order; skipped analyzers are absent.
    pub groups: Vec<FindingGroup>,
    pub summary: SeverityCounts,
    pub has_blocking_errors: bool,
    pub files_scanned: usize,
    pub cancelled: bool,
    /// Findings dropped by `max_issues_per_file`.
    #[serde(default)]
    pub truncated: usize,
}

impl Report {
    /// All findings in group order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.groups.iter().flat_map(|g| g.findings.iter())
    }

    pub fn group(&self, kind: AnalyzerKind) -> Option<&FindingGroup> {
        self.groups.iter().find(|g| g.analyzer == kind)
    }

    pub fn is_clean(&self) -> bool {
        self.summary.total() == 0
    }
}

/// Severity overrides and the per-file cap applied when aggregating.
///
/// The default changes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityPolicy {
    pub error_as_warning: bool,
    pub warning_as_error: bool,
    /// 0 keeps every finding.
    pub max_issues_per_file: usize,
}

impl SeverityPolicy {
    pub fn apply(&self, severity: Severity) -> Severity {
        match severity {
            Severity::Error if self.error_as_warning => Severity::Warning,
            Severity::Warning if self.warning_as_error => Severity::Error,
            other => other,
        }
    }
}

/// Combines analyzer results. Performs no I/O.
pub struct ReportAggregator;

impl ReportAggregator {
    /// Aggregate with no severity overrides and no per-file cap.
    pub fn aggregate(results: impl IntoIterator<Item = AnalysisResult>) -> Report {
        Self::aggregate_with(results, &SeverityPolicy::default())
    }

    /// Order results as Structure, Model, Api, Database and drop any
    /// finding whose (rule, file, line, message) was already seen. Then
    /// remap severities through `policy` and keep at most
    /// `max_issues_per_file` findings per file, most severe first.
    pub fn aggregate_with(
        results: impl IntoIterator<Item = AnalysisResult>,
        policy: &SeverityPolicy,
    ) -> Report {
        let mut results: Vec<AnalysisResult> = results.into_iter().collect();
        results.sort_by_key(|r| r.analyzer);

        let mut seen: HashSet<String> = HashSet::new();
        let mut deduped: Vec<(AnalysisResult, Vec<Finding>)> = Vec::with_capacity(results.len());
        for mut result in results {
            let findings: Vec<Finding> = std::mem::take(&mut result.findings)
                .into_iter()
                .filter(|f| seen.insert(f.key()))
                .map(|mut f| {
                    f.severity = policy.apply(f.severity);
                    f
                })
                .collect();
            deduped.push((result, findings));
        }

        let (kept, truncated) = per_file_cap(&deduped, policy.max_issues_per_file);
        if truncated > 0 {
            tracing::debug!(truncated, "findings dropped by max_issues_per_file");
        }

        let mut groups = Vec::with_capacity(deduped.len());
        let mut summary = SeverityCounts::default();
        let mut files_scanned = 0;
        let mut cancelled = false;

        for (g, (result, findings)) in deduped.into_iter().enumerate() {
            let findings: Vec<Finding> = findings
                .into_iter()
                .enumerate()
                .filter(|(i, _)| kept.contains(&(g, *i)))
                .map(|(_, f)| f)
                .collect();
            let group_summary = SeverityCounts::from_findings(&findings);

            summary.errors += group_summary.errors;
            summary.warnings += group_summary.warnings;
            summary.infos += group_summary.infos;
            files_scanned = files_scanned.max(result.files_scanned);
            cancelled |= result.cancelled;

            groups.push(FindingGroup {
                analyzer: result.analyzer,
                findings,
                summary: group_summary,
                files_scanned: result.files_scanned,
                cancelled: result.cancelled,
            });
        }

        let has_blocking_errors = groups
            .iter()
            .flat_map(|g| g.findings.iter())
            .any(|f| f.severity == Severity::Error);

        Report {
            groups,
            summary,
            has_blocking_errors,
            files_scanned,
            cancelled,
            truncated,
        }
    }
}

/// Positions `(group, finding)` that survive the per-file cap, and the
/// number dropped. Within a file, errors go first, then report order.
fn per_file_cap(
    groups: &[(AnalysisResult, Vec<Finding>)],
    limit: usize,
) -> (HashSet<(usize, usize)>, usize) {
    let mut by_file: HashMap<&str, Vec<(Severity, usize, usize)>> = HashMap::new();
    for (g, (_, findings)) in groups.iter().enumerate() {
        for (i, f) in findings.iter().enumerate() {
            by_file.entry(f.file.as_str()).or_default().push((f.severity, g, i));
        }
    }

    let mut kept = HashSet::new();
    let mut truncated = 0;
    for mut positions in by_file.into_values() {
        positions.sort();
        let keep = if limit == 0 { positions.len() } else { limit.min(positions.len()) };
        truncated += positions.len() - keep;
        kept.extend(positions.into_iter().take(keep).map(|(_, g, i)| (g, i)));
    }
    (kept, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleId;

    fn result(kind: AnalyzerKind, findings: Vec<Finding>) -> AnalysisResult {
        AnalysisResult::new(kind, findings, 3, false)
    }

    #[test]
    fn test_groups_in_fixed_order() {
        let report = ReportAggregator::aggregate(vec![
            result(AnalyzerKind::Database, Vec::new()),
            result(AnalyzerKind::Structure, Vec::new()),
            result(AnalyzerKind::Api, Vec::new()),
        ]);
        let kinds: Vec<AnalyzerKind> = report.groups.iter().map(|g| g.analyzer).collect();
        assert_eq!(
            kinds,
            vec![AnalyzerKind::Structure, AnalyzerKind::Api, AnalyzerKind::Database]
        );
        assert!(report.is_clean());
        assert!(!report.has_blocking_errors);
    }

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let parse = Finding::new(RuleId::ParseError, "bad.py", 2, "bad.py", "could not parse file");
        let report = ReportAggregator::aggregate(vec![
            result(AnalyzerKind::Api, vec![parse.clone()]),
            result(AnalyzerKind::Structure, vec![parse.clone()]),
            result(AnalyzerKind::Model, vec![parse]),
        ]);

        assert_eq!(report.findings().count(), 1);
        assert_eq!(report.group(AnalyzerKind::Structure).unwrap().findings.len(), 1);
        assert!(report.group(AnalyzerKind::Api).unwrap().findings.is_empty());
        assert_eq!(report.summary.warnings, 1);
    }

    #[test]
    fn test_blocking_flag_follows_errors() {
        let report = ReportAggregator::aggregate(vec![result(
            AnalyzerKind::Model,
            vec![
                Finding::new(RuleId::ModelMissingPrimaryKey, "m.py", 1, "Post", "no pk"),
                Finding::new(RuleId::ModelMissingRepr, "m.py", 1, "Post", "no repr"),
            ],
        )]);
        assert!(report.has_blocking_errors);
        assert_eq!(report.summary.errors, 1);
        assert_eq!(report.summary.infos, 1);
        assert_eq!(report.files_scanned, 3);
    }

    #[test]
    fn test_severity_overrides() {
        let findings = || {
            vec![
                Finding::new(RuleId::ModelMissingPrimaryKey, "m.py", 1, "Post", "no pk"),
                Finding::new(RuleId::ModelClassNaming, "m.py", 1, "post", "naming"),
            ]
        };

        let relaxed = SeverityPolicy {
            error_as_warning: true,
            ..Default::default()
        };
        let report =
            ReportAggregator::aggregate_with(vec![result(AnalyzerKind::Model, findings())], &relaxed);
        assert!(!report.has_blocking_errors);
        assert_eq!(report.summary.warnings, 2);

        let strict = SeverityPolicy {
            warning_as_error: true,
            ..Default::default()
        };
        let report =
            ReportAggregator::aggregate_with(vec![result(AnalyzerKind::Model, findings())], &strict);
        assert!(report.has_blocking_errors);
        assert_eq!(report.summary.errors, 2);
    }

    #[test]
    fn test_per_file_cap_keeps_most_severe() {
        let policy = SeverityPolicy {
            max_issues_per_file: 2,
            ..Default::default()
        };
        let report = ReportAggregator::aggregate_with(
            vec![
                result(
                    AnalyzerKind::Model,
                    vec![
                        Finding::new(RuleId::ModelMissingRepr, "m.py", 1, "A", "a"),
                        Finding::new(RuleId::ModelMissingRepr, "m.py", 5, "B", "b"),
                        Finding::new(RuleId::ModelMissingPrimaryKey, "m.py", 9, "C", "c"),
                        Finding::new(RuleId::ModelMissingRepr, "other.py", 1, "D", "d"),
                    ],
                ),
                result(
                    AnalyzerKind::Database,
                    vec![Finding::new(RuleId::ConfigDebugEnabled, "m.py", 20, "DEBUG", "e")],
                ),
            ],
            &policy,
        );

        let kept: Vec<(&str, &str)> = report
            .findings()
            .map(|f| (f.file.as_str(), f.entity.as_str()))
            .collect();
        assert_eq!(kept, vec![("m.py", "C"), ("other.py", "D"), ("m.py", "DEBUG")]);
        assert_eq!(report.truncated, 2);
        assert_eq!(report.summary.total(), 3);
    }

    #[test]
    fn test_empty_input() {
        let report = ReportAggregator::aggregate(Vec::new());
        assert!(report.groups.is_empty());
        assert!(!report.has_blocking_errors);
    }
}
