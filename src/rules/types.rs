//! Core types for rule findings.

use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerKind;

/// File value used for findings that concern the project as a whole.
pub const PROJECT_SCOPE: &str = ".";

/// Severity levels for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Rule identifiers.
///
/// Declaration order is the registration order used to break ties when
/// findings share a file and line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    // Engine-level
    InputError,
    ParseError,
    ExtractionError,
    RuleError,
    // Project layout
    MissingEntryFile,
    MissingModelsDir,
    MissingModelsInit,
    MissingTemplatesDir,
    MissingStaticDir,
    MissingConfigFile,
    // Models
    ModelsNotFound,
    ModelClassNaming,
    ModelMissingTableName,
    ModelTableNaming,
    ModelMissingPrimaryKey,
    ModelNoColumns,
    ModelMissingRepr,
    ModelMissingDocstring,
    ModelDanglingRelationship,
    ModelRelationshipCycle,
    ModelDuplicateTable,
    ModelUnused,
    // Routes and blueprints
    RouteUnguardedMutation,
    RouteSensitiveUnauthenticated,
    RouteMissingDocstring,
    RouteMissingValidation,
    RouteMissingErrorHandling,
    RouteDuplicate,
    RouteBlueprintSuggested,
    BlueprintMissingUrlPrefix,
    // Migrations and configuration
    MigrationsNotFound,
    MigrationMissingVersionsDir,
    MigrationMissingEnv,
    MigrationMissingAlembicIni,
    MigrationDestructive,
    MigrationMissingUpgrade,
    MigrationMissingDowngrade,
    MigrationMissingRevision,
    MigrationDuplicateRevision,
    MigrationMultipleHeads,
    ConfigHardcodedCredential,
    ConfigDebugEnabled,
    ConfigMissingDatabaseUri,
    DbRawSql,
}

/// Static metadata for a rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleInfo {
    pub severity: Severity,
    /// Owning analyzer; `None` for engine-level rules every analyzer may emit.
    pub area: Option<AnalyzerKind>,
    pub summary: &'static str,
}

impl RuleId {
    /// Every rule, in registration order.
    pub const ALL: &'static [RuleId] = &[
        RuleId::InputError,
        RuleId::ParseError,
        RuleId::ExtractionError,
        RuleId::RuleError,
        RuleId::MissingEntryFile,
        RuleId::MissingModelsDir,
        RuleId::MissingModelsInit,
        RuleId::MissingTemplatesDir,
        RuleId::MissingStaticDir,
        RuleId::MissingConfigFile,
        RuleId::ModelsNotFound,
        RuleId::ModelClassNaming,
        RuleId::ModelMissingTableName,
        RuleId::ModelTableNaming,
        RuleId::ModelMissingPrimaryKey,
        RuleId::ModelNoColumns,
        RuleId::ModelMissingRepr,
        RuleId::ModelMissingDocstring,
        RuleId::ModelDanglingRelationship,
        RuleId::ModelRelationshipCycle,
        RuleId::ModelDuplicateTable,
        RuleId::ModelUnused,
        RuleId::RouteUnguardedMutation,
        RuleId::RouteSensitiveUnauthenticated,
        RuleId::RouteMissingDocstring,
        RuleId::RouteMissingValidation,
        RuleId::RouteMissingErrorHandling,
        RuleId::RouteDuplicate,
        RuleId::RouteBlueprintSuggested,
        RuleId::BlueprintMissingUrlPrefix,
        RuleId::MigrationsNotFound,
        RuleId::MigrationMissingVersionsDir,
        RuleId::MigrationMissingEnv,
        RuleId::MigrationMissingAlembicIni,
        RuleId::MigrationDestructive,
        RuleId::MigrationMissingUpgrade,
        RuleId::MigrationMissingDowngrade,
        RuleId::MigrationMissingRevision,
        RuleId::MigrationDuplicateRevision,
        RuleId::MigrationMultipleHeads,
        RuleId::ConfigHardcodedCredential,
        RuleId::ConfigDebugEnabled,
        RuleId::ConfigMissingDatabaseUri,
        RuleId::DbRawSql,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::InputError => "input_error",
            RuleId::ParseError => "parse_error",
            RuleId::ExtractionError => "extraction_error",
            RuleId::RuleError => "rule_error",
            RuleId::MissingEntryFile => "missing_entry_file",
            RuleId::MissingModelsDir => "missing_models_dir",
            RuleId::MissingModelsInit => "missing_models_init",
            RuleId::MissingTemplatesDir => "missing_templates_dir",
            RuleId::MissingStaticDir => "missing_static_dir",
            RuleId::MissingConfigFile => "missing_config_file",
            RuleId::ModelsNotFound => "models_not_found",
            RuleId::ModelClassNaming => "model_class_naming",
            RuleId::ModelMissingTableName => "model_missing_table_name",
            RuleId::ModelTableNaming => "model_table_naming",
            RuleId::ModelMissingPrimaryKey => "model_missing_primary_key",
            RuleId::ModelNoColumns => "model_no_columns",
            RuleId::ModelMissingRepr => "model_missing_repr",
            RuleId::ModelMissingDocstring => "model_missing_docstring",
            RuleId::ModelDanglingRelationship => "model_dangling_relationship",
            RuleId::ModelRelationshipCycle => "model_relationship_cycle",
            RuleId::ModelDuplicateTable => "model_duplicate_table",
            RuleId::ModelUnused => "model_unused",
            RuleId::RouteUnguardedMutation => "route_unguarded_mutation",
            RuleId::RouteSensitiveUnauthenticated => "route_sensitive_unauthenticated",
            RuleId::RouteMissingDocstring => "route_missing_docstring",
            RuleId::RouteMissingValidation => "route_missing_validation",
            RuleId::RouteMissingErrorHandling => "route_missing_error_handling",
            RuleId::RouteDuplicate => "route_duplicate",
            RuleId::RouteBlueprintSuggested => "route_blueprint_suggested",
            RuleId::BlueprintMissingUrlPrefix => "blueprint_missing_url_prefix",
            RuleId::MigrationsNotFound => "migrations_not_found",
            RuleId::MigrationMissingVersionsDir => "migration_missing_versions_dir",
            RuleId::MigrationMissingEnv => "migration_missing_env",
            RuleId::MigrationMissingAlembicIni => "migration_missing_alembic_ini",
            RuleId::MigrationDestructive => "migration_destructive",
            RuleId::MigrationMissingUpgrade => "migration_missing_upgrade",
            RuleId::MigrationMissingDowngrade => "migration_missing_downgrade",
            RuleId::MigrationMissingRevision => "migration_missing_revision",
            RuleId::MigrationDuplicateRevision => "migration_duplicate_revision",
            RuleId::MigrationMultipleHeads => "migration_multiple_heads",
            RuleId::ConfigHardcodedCredential => "config_hardcoded_credential",
            RuleId::ConfigDebugEnabled => "config_debug_enabled",
            RuleId::ConfigMissingDatabaseUri => "config_missing_database_uri",
            RuleId::DbRawSql => "db_raw_sql",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        RuleId::ALL.iter().copied().find(|id| id.as_str() == s)
    }

    /// Position of the rule in registration order.
    pub fn ordinal(&self) -> usize {
        *self as usize
    }

    pub fn severity(&self) -> Severity {
        self.info().severity
    }

    pub fn info(&self) -> RuleInfo {
        use AnalyzerKind::*;
        use Severity::*;

        let (severity, area, summary) = match self {
            RuleId::InputError => (Warning, None, "A path could not be read"),
            RuleId::ParseError => (Warning, None, "A source file has invalid syntax"),
            RuleId::ExtractionError => (Warning, None, "Entity extraction failed for a file"),
            RuleId::RuleError => (Warning, None, "A rule failed while evaluating an entity"),
            RuleId::MissingEntryFile => (
                Warning,
                Some(Structure),
                "No application entry point (run.py, main.py, app.py, wsgi.py)",
            ),
            RuleId::MissingModelsDir => (Warning, Some(Structure), "No models package or module"),
            RuleId::MissingModelsInit => (
                Warning,
                Some(Structure),
                "models/ directory without __init__.py",
            ),
            RuleId::MissingTemplatesDir => (Info, Some(Structure), "No templates/ directory"),
            RuleId::MissingStaticDir => (Info, Some(Structure), "No static/ directory"),
            RuleId::MissingConfigFile => (
                Warning,
                Some(Structure),
                "No configuration file (.env or config.py)",
            ),
            RuleId::ModelsNotFound => (Info, Some(Model), "No model files matched model_dirs"),
            RuleId::ModelClassNaming => (Warning, Some(Model), "Model class name is not PascalCase"),
            RuleId::ModelMissingTableName => (
                Error,
                Some(Model),
                "Model declares no __tablename__ and no table default",
            ),
            RuleId::ModelTableNaming => (Warning, Some(Model), "Table name is not snake_case"),
            RuleId::ModelMissingPrimaryKey => (Error, Some(Model), "Model has no primary key column"),
            RuleId::ModelNoColumns => (Warning, Some(Model), "Model defines no columns"),
            RuleId::ModelMissingRepr => (
                Info,
                Some(Model),
                "Model defines neither __repr__ nor __str__",
            ),
            RuleId::ModelMissingDocstring => (Info, Some(Model), "Model class has no docstring"),
            RuleId::ModelDanglingRelationship => (
                Warning,
                Some(Model),
                "Relationship target is not a known model",
            ),
            RuleId::ModelRelationshipCycle => (
                Warning,
                Some(Model),
                "Models form a relationship cycle",
            ),
            RuleId::ModelDuplicateTable => (
                Warning,
                Some(Model),
                "Several models map to the same table",
            ),
            RuleId::ModelUnused => (
                Info,
                Some(Model),
                "Model takes part in no relationship",
            ),
            RuleId::RouteUnguardedMutation => (
                Warning,
                Some(Api),
                "Mutating route without an authentication decorator",
            ),
            RuleId::RouteSensitiveUnauthenticated => (
                Warning,
                Some(Api),
                "Sensitive route without an authentication decorator",
            ),
            RuleId::RouteMissingDocstring => (Info, Some(Api), "Route handler has no docstring"),
            RuleId::RouteMissingValidation => (
                Info,
                Some(Api),
                "Data-modifying route without input validation",
            ),
            RuleId::RouteMissingErrorHandling => (
                Info,
                Some(Api),
                "Data-modifying route without error handling",
            ),
            RuleId::RouteDuplicate => (
                Warning,
                Some(Api),
                "Same method and path registered more than once",
            ),
            RuleId::RouteBlueprintSuggested => (
                Info,
                Some(Api),
                "Several routes and no blueprint",
            ),
            RuleId::BlueprintMissingUrlPrefix => (Info, Some(Api), "Blueprint has no url_prefix"),
            RuleId::MigrationsNotFound => (
                Info,
                Some(Database),
                "Database configured but no migrations directory",
            ),
            RuleId::MigrationMissingVersionsDir => (
                Warning,
                Some(Database),
                "Migrations directory has no versions/ directory",
            ),
            RuleId::MigrationMissingEnv => (
                Warning,
                Some(Database),
                "Migrations directory has no env.py",
            ),
            RuleId::MigrationMissingAlembicIni => (
                Warning,
                Some(Database),
                "No alembic.ini next to or inside the migrations directory",
            ),
            RuleId::MigrationDestructive => (
                Warning,
                Some(Database),
                "Potentially destructive migration operation",
            ),
            RuleId::MigrationMissingUpgrade => (
                Warning,
                Some(Database),
                "Migration has no upgrade() function",
            ),
            RuleId::MigrationMissingDowngrade => (
                Warning,
                Some(Database),
                "Migration has no downgrade() function",
            ),
            RuleId::MigrationMissingRevision => (
                Warning,
                Some(Database),
                "Migration has no revision identifier",
            ),
            RuleId::MigrationDuplicateRevision => (
                Error,
                Some(Database),
                "Two migrations share a revision identifier",
            ),
            RuleId::MigrationMultipleHeads => (
                Warning,
                Some(Database),
                "Migration history has more than one head",
            ),
            RuleId::ConfigHardcodedCredential => (
                Error,
                Some(Database),
                "Credential hardcoded in configuration",
            ),
            RuleId::ConfigDebugEnabled => (
                Warning,
                Some(Database),
                "DEBUG enabled in configuration",
            ),
            RuleId::ConfigMissingDatabaseUri => (
                Warning,
                Some(Database),
                "Configuration sets no database URI",
            ),
            RuleId::DbRawSql => (
                Warning,
                Some(Database),
                "Raw SQL statement passed to execute()",
            ),
        };

        RuleInfo {
            severity,
            area,
            summary,
        }
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reported issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: RuleId,
    pub severity: Severity,
    pub file: String,
    pub line: usize,
    pub entity: String,
    pub message: String,
}

impl Finding {
    /// Create a finding carrying the rule's severity.
    pub fn new(
        rule: RuleId,
        file: impl Into<String>,
        line: usize,
        entity: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule,
            severity: rule.severity(),
            file: file.into(),
            line,
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Finding about the project as a whole rather than one file.
    pub fn project(rule: RuleId, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule, PROJECT_SCOPE, 0, entity, message)
    }

    /// Create a unique key for this finding (for deduplication).
    pub fn key(&self) -> String {
        format!("{}|{}|{}|{}", self.rule, self.file, self.line, self.message)
    }

    /// Ordering key: file, line, then rule registration order.
    pub fn sort_key(&self) -> (&str, usize, usize) {
        (self.file.as_str(), self.line, self.rule.ordinal())
    }
}

/// Finding counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub errors: usize,
    pub warnings: usize,
    pub infos: usize,
}

impl SeverityCounts {
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut counts = Self::default();
        for f in findings {
            counts.record(f.severity);
        }
        counts
    }

    pub fn record(&mut self, severity: Severity) {
        match severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.infos += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.errors + self.warnings + self.infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_round_trips_through_str() {
        for id in RuleId::ALL {
            assert_eq!(RuleId::parse(id.as_str()), Some(*id));
        }
        assert_eq!(RuleId::parse("no_such_rule"), None);
    }

    #[test]
    fn test_all_is_in_declaration_order() {
        for (i, id) in RuleId::ALL.iter().enumerate() {
            assert_eq!(id.ordinal(), i, "{} out of order", id);
        }
    }

    #[test]
    fn test_serde_uses_snake_case_ids() {
        let json = serde_json::to_string(&RuleId::ModelMissingPrimaryKey).unwrap();
        assert_eq!(json, "\"model_missing_primary_key\"");
    }

    #[test]
    fn test_finding_takes_rule_severity() {
        let f = Finding::new(RuleId::ConfigHardcodedCredential, "config.py", 3, "SECRET_KEY", "x");
        assert_eq!(f.severity, Severity::Error);

        let p = Finding::project(RuleId::RouteBlueprintSuggested, "routes", "y");
        assert_eq!(p.file, PROJECT_SCOPE);
        assert_eq!(p.severity, Severity::Info);
    }

    #[test]
    fn test_severity_counts() {
        let findings = vec![
            Finding::new(RuleId::ModelMissingPrimaryKey, "m.py", 1, "A", "a"),
            Finding::new(RuleId::ModelClassNaming, "m.py", 1, "A", "b"),
            Finding::new(RuleId::ModelMissingRepr, "m.py", 1, "A", "c"),
            Finding::new(RuleId::ModelMissingRepr, "m.py", 9, "B", "d"),
        ];
        let counts = SeverityCounts::from_findings(&findings);
        assert_eq!(counts.errors, 1);
        assert_eq!(counts.warnings, 1);
        assert_eq!(counts.infos, 2);
        assert_eq!(counts.total(), 4);
    }
}
