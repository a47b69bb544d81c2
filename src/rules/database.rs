//! Migration safety and configuration hygiene rules.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use super::{Finding, Hit, Rule, RuleContext, RuleId};
use crate::entity::{
    ConfigEntity, ConfigScope, ConfigValue, EntityInfo, MigrationEntity, MigrationEnvironment,
    MigrationOperation, MigrationPhase, RawSqlEntity, SqlStatement,
};

lazy_static! {
    /// A connection URI carrying `user:password@`.
    static ref URI_WITH_PASSWORD: Regex =
        Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*://[^/\s:@]+:[^/\s@]+@").unwrap();
}

/// Key fragments naming a connection string.
const URI_KEYS: &[&str] = &["URI", "URL", "DATABASE", "DSN", "CONNECTION"];

/// Keys that point SQLAlchemy at its database.
const DATABASE_URI_KEYS: &[&str] = &[
    "SQLALCHEMY_DATABASE_URI",
    "SQLALCHEMY_BINDS",
    "DATABASE_URI",
    "DATABASE_URL",
];

/// Config class name fragments where DEBUG is expected.
const DEBUG_CLASS_MARKERS: &[&str] = &["dev", "test", "local", "debug"];

pub fn migration_rules() -> Vec<Rule<MigrationEntity>> {
    vec![
        Rule::new(RuleId::MigrationDestructive, destructive_operations),
        Rule::new(RuleId::MigrationMissingUpgrade, missing_upgrade),
        Rule::new(RuleId::MigrationMissingDowngrade, missing_downgrade),
        Rule::new(RuleId::MigrationMissingRevision, missing_revision),
    ]
}

pub fn config_rules() -> Vec<Rule<ConfigEntity>> {
    vec![
        Rule::new(RuleId::ConfigHardcodedCredential, hardcoded_credential),
        Rule::new(RuleId::ConfigDebugEnabled, debug_enabled),
    ]
}

pub fn environment_rules() -> Vec<Rule<MigrationEnvironment>> {
    vec![
        Rule::new(RuleId::MigrationMissingVersionsDir, missing_versions_dir),
        Rule::new(RuleId::MigrationMissingEnv, missing_env),
        Rule::new(RuleId::MigrationMissingAlembicIni, missing_alembic_ini),
    ]
}

pub fn raw_sql_rules() -> Vec<Rule<RawSqlEntity>> {
    vec![Rule::new(RuleId::DbRawSql, raw_sql)]
}

fn missing_versions_dir(env: &MigrationEnvironment, _: &RuleContext) -> Vec<Hit> {
    if env.has_versions {
        return Vec::new();
    }
    vec![Hit::new(format!("{}/ has no versions/ directory", env.dir))]
}

fn missing_env(env: &MigrationEnvironment, _: &RuleContext) -> Vec<Hit> {
    if env.has_env {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "{}/ has no env.py; alembic cannot run its revisions",
        env.dir
    ))]
}

fn missing_alembic_ini(env: &MigrationEnvironment, _: &RuleContext) -> Vec<Hit> {
    if env.has_alembic_ini {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "no alembic.ini found in {}/ or its parent directory",
        env.dir
    ))]
}

/// Why an operation may lose data or break existing rows, if it can.
pub fn destructive_reason(op: &MigrationOperation) -> Option<String> {
    if op.phase == MigrationPhase::Downgrade {
        return None;
    }
    let target = op.arguments.join(".");
    match op.name.as_str() {
        "drop_column" => Some(format!("drop_column({}) deletes column data", target)),
        "drop_table" => Some(format!("drop_table({}) deletes table data", target)),
        "alter_column" if op.nullable_false => Some(format!(
            "alter_column({}, nullable=False) fails on existing NULL values",
            target
        )),
        "add_column" if op.nullable_false && !op.has_default => Some(format!(
            "add_column({}) adds a NOT NULL column without a default",
            target
        )),
        _ => None,
    }
}

fn destructive_operations(migration: &MigrationEntity, _: &RuleContext) -> Vec<Hit> {
    migration
        .operations
        .iter()
        .filter_map(|op| {
            destructive_reason(op).map(|reason| {
                Hit::at(op.line, format!("potentially destructive migration: {}", reason))
            })
        })
        .collect()
}

fn missing_upgrade(migration: &MigrationEntity, _: &RuleContext) -> Vec<Hit> {
    if migration.has_upgrade {
        return Vec::new();
    }
    vec![Hit::new("migration defines no upgrade() function")]
}

fn missing_downgrade(migration: &MigrationEntity, _: &RuleContext) -> Vec<Hit> {
    if migration.has_downgrade {
        return Vec::new();
    }
    vec![Hit::new(
        "migration defines no downgrade() function and cannot be rolled back",
    )]
}

fn missing_revision(migration: &MigrationEntity, _: &RuleContext) -> Vec<Hit> {
    if migration.revision.is_some() {
        return Vec::new();
    }
    vec![Hit::new("migration declares no revision identifier")]
}

/// Every migration after the first (in path order) claiming an already used revision.
pub fn duplicate_revisions(migrations: &[MigrationEntity]) -> Vec<Finding> {
    let mut first_by_revision: BTreeMap<&str, &MigrationEntity> = BTreeMap::new();
    let mut ordered: Vec<&MigrationEntity> = migrations.iter().collect();
    ordered.sort_by(|a, b| a.file.cmp(&b.file));

    let mut findings = Vec::new();
    for migration in ordered {
        let Some(revision) = migration.revision.as_deref() else {
            continue;
        };
        match first_by_revision.get(revision) {
            Some(first) => findings.push(Finding::new(
                RuleId::MigrationDuplicateRevision,
                migration.file(),
                migration.line(),
                migration.name(),
                format!("revision '{}' is already defined in {}", revision, first.file),
            )),
            None => {
                first_by_revision.insert(revision, migration);
            }
        }
    }
    findings
}

/// Revisions no other migration builds on.
pub fn heads(migrations: &[MigrationEntity]) -> Vec<&str> {
    let parents: BTreeSet<&str> = migrations
        .iter()
        .flat_map(|m| m.down_revisions.iter().map(|s| s.as_str()))
        .collect();
    let revisions: BTreeSet<&str> = migrations
        .iter()
        .filter_map(|m| m.revision.as_deref())
        .collect();
    revisions
        .into_iter()
        .filter(|r| !parents.contains(r))
        .collect()
}

pub fn multiple_heads(migrations: &[MigrationEntity]) -> Vec<Finding> {
    let heads = heads(migrations);
    if heads.len() <= 1 {
        return Vec::new();
    }
    vec![Finding::project(
        RuleId::MigrationMultipleHeads,
        "migrations",
        format!(
            "migration history has {} heads ({}); merge them with `alembic merge`",
            heads.len(),
            heads.join(", ")
        ),
    )]
}

/// Run the cross-migration rules that are enabled.
pub fn cross_migration(migrations: &[MigrationEntity], ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    if ctx.enabled(RuleId::MigrationDuplicateRevision) {
        findings.extend(duplicate_revisions(migrations));
    }
    if ctx.enabled(RuleId::MigrationMultipleHeads) {
        findings.extend(multiple_heads(migrations));
    }
    findings
}

fn configures_database(configs: &[ConfigEntity]) -> bool {
    configs
        .iter()
        .any(|c| DATABASE_URI_KEYS.contains(&c.key.as_str()))
}

/// A database is configured but the project has no migrations root.
pub fn migrations_not_found(
    environments: &[MigrationEnvironment],
    configs: &[ConfigEntity],
) -> Vec<Finding> {
    if !environments.is_empty() || !configures_database(configs) {
        return Vec::new();
    }
    vec![Finding::project(
        RuleId::MigrationsNotFound,
        "migrations",
        "a database URI is configured but no migrations directory exists; run `flask db init`",
    )]
}

/// Configuration exists but none of it names the database.
pub fn missing_database_uri(configs: &[ConfigEntity]) -> Vec<Finding> {
    if configs.is_empty() || configures_database(configs) {
        return Vec::new();
    }
    vec![Finding::project(
        RuleId::ConfigMissingDatabaseUri,
        "config",
        format!(
            "no database URI configured; set one of {}",
            DATABASE_URI_KEYS.join(", ")
        ),
    )]
}

/// Project-level configuration rules that are enabled.
pub fn cross_config(
    environments: &[MigrationEnvironment],
    configs: &[ConfigEntity],
    ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if ctx.enabled(RuleId::MigrationsNotFound) {
        findings.extend(migrations_not_found(environments, configs));
    }
    if ctx.enabled(RuleId::ConfigMissingDatabaseUri) {
        findings.extend(missing_database_uri(configs));
    }
    findings
}

fn raw_sql(statement: &RawSqlEntity, _: &RuleContext) -> Vec<Hit> {
    match &statement.statement {
        SqlStatement::Interpolated => vec![Hit::new(format!(
            "SQL built by string interpolation is passed to {}; use bound parameters to prevent SQL injection",
            statement.callee
        ))],
        SqlStatement::Literal(text) => {
            let verb = text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_uppercase();
            vec![Hit::new(format!(
                "raw {} statement passed to {}; prefer the ORM, or text() with bound parameters",
                verb, statement.callee
            ))]
        }
    }
}

fn is_uri_key(key: &str) -> bool {
    let upper = key.to_uppercase();
    URI_KEYS.iter().any(|k| upper.contains(k))
}

fn hardcoded_credential(config: &ConfigEntity, ctx: &RuleContext) -> Vec<Hit> {
    let ConfigValue::Literal(value) = &config.value else {
        return Vec::new();
    };
    if value.is_empty() {
        return Vec::new();
    }

    if ctx.settings.is_credential_key(&config.key) {
        return vec![Hit::new(format!(
            "{} is hardcoded; read it from the environment instead",
            config.key
        ))];
    }
    if is_uri_key(&config.key) && URI_WITH_PASSWORD.is_match(value) {
        return vec![Hit::new(format!(
            "{} embeds a password in a hardcoded connection string",
            config.key
        ))];
    }
    Vec::new()
}

fn debug_enabled(config: &ConfigEntity, _: &RuleContext) -> Vec<Hit> {
    if config.key != "DEBUG" || config.value != ConfigValue::Scalar("True".to_string()) {
        return Vec::new();
    }
    if let ConfigScope::ConfigClass(class) = &config.scope {
        let lower = class.to_lowercase();
        if DEBUG_CLASS_MARKERS.iter().any(|m| lower.contains(m)) {
            return Vec::new();
        }
    }
    vec![Hit::new("DEBUG is enabled; never run with debug mode in production")]
}
