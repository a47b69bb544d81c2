//! Domain entities extracted from Flask / SQLAlchemy source.
//!
//! Extraction is a pure function of a file's syntax tree. Entities are
//! created fresh for each run and never mutated once built.

mod configs;
mod layout;
mod migrations;
mod models;
mod queries;
mod routes;
pub mod syntax;

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::Settings;
use crate::source::{ParseFailure, SourceFile};

pub use layout::{migration_environments, MigrationEnvironment, ProjectLayout, ENTRY_FILES};
pub use models::{resolve as resolve_models, ModelClasses};

/// Errors raised while extracting entities from one file.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtractError {
    #[error("{path} has no syntax tree ({failure})")]
    Unparsed { path: String, failure: ParseFailure },

    #[error("{path}:{line}: unexpected {kind} node")]
    Unexpected {
        path: String,
        line: usize,
        kind: String,
    },
}

/// Common accessors for anything rules are evaluated against.
pub trait EntityInfo {
    fn file(&self) -> &str;
    fn line(&self) -> usize;
    fn name(&self) -> &str;
}

macro_rules! entity_info {
    ($ty:ty, $name:ident) => {
        impl EntityInfo for $ty {
            fn file(&self) -> &str {
                &self.file
            }
            fn line(&self) -> usize {
                self.line
            }
            fn name(&self) -> &str {
                &self.$name
            }
        }
    };
}

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: String,
    /// Type name as written, last dotted segment (`String`, `Integer`).
    pub column_type: Option<String>,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub foreign_key_target: Option<String>,
    pub has_default: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToMany,
    OneToOne,
    ManyToMany,
}

/// A `relationship(...)` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub name: String,
    /// Target class as written (`"User"`, `models.User`).
    pub target: String,
    pub kind: RelationshipKind,
    pub back_reference: Option<String>,
    pub line: usize,
}

impl Relationship {
    /// Target class name without any module qualification.
    pub fn target_class(&self) -> &str {
        syntax::last_segment(&self.target)
    }
}

/// A declarative ORM model class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelEntity {
    pub file: String,
    pub line: usize,
    pub class_name: String,
    pub base_classes: Vec<String>,
    pub table_name: Option<String>,
    pub table_name_line: Option<usize>,
    /// `__table__`, `@declared_attr __tablename__` or a computed table name.
    pub declares_table: bool,
    pub is_abstract: bool,
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
    pub declared_dunders: BTreeSet<String>,
    pub has_docstring: bool,
}

entity_info!(ModelEntity, class_name);

impl ModelEntity {
    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }
}

/// A route registered through a `route`/verb decorator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntity {
    pub file: String,
    pub line: usize,
    pub path_pattern: String,
    pub http_methods: BTreeSet<String>,
    pub methods_explicit: bool,
    pub handler_name: String,
    /// Object the decorator was called on (`app`, `bp`, `api_bp`).
    pub registrar: String,
    /// Registrar name when it is not the application object.
    pub blueprint_name: Option<String>,
    pub decorators: BTreeSet<String>,
    pub has_docstring: bool,
    pub has_error_handling: bool,
    pub has_input_validation: bool,
}

entity_info!(RouteEntity, handler_name);

pub const MUTATING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

impl RouteEntity {
    pub fn is_mutating(&self) -> bool {
        self.http_methods
            .iter()
            .any(|m| MUTATING_METHODS.contains(&m.as_str()))
    }

    /// Whether the route accepts a request body (POST, PUT, PATCH).
    pub fn accepts_body(&self) -> bool {
        self.http_methods
            .iter()
            .any(|m| matches!(m.as_str(), "POST" | "PUT" | "PATCH"))
    }
}

/// A `Blueprint(...)` construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlueprintEntity {
    pub file: String,
    pub line: usize,
    pub variable: String,
    pub blueprint_name: Option<String>,
    pub url_prefix: Option<String>,
}

entity_info!(BlueprintEntity, variable);

/// An `app.register_blueprint(bp, ...)` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlueprintRegistration {
    pub file: String,
    pub line: usize,
    /// Blueprint expression as written (`bp`, `auth.bp`).
    pub blueprint: String,
    pub url_prefix: Option<String>,
}

entity_info!(BlueprintRegistration, blueprint);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Module,
    Upgrade,
    Downgrade,
}

/// An `op.*` / `batch_op.*` call inside a migration script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOperation {
    pub name: String,
    pub phase: MigrationPhase,
    /// String literal arguments, including those of a nested `Column(...)`.
    pub arguments: Vec<String>,
    pub nullable_false: bool,
    pub has_default: bool,
    pub line: usize,
}

/// An Alembic revision script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEntity {
    pub file: String,
    pub line: usize,
    /// Revision identifier, or the file stem when none is declared.
    pub name: String,
    pub revision: Option<String>,
    pub down_revisions: Vec<String>,
    pub has_upgrade: bool,
    pub has_downgrade: bool,
    pub operations: Vec<MigrationOperation>,
}

entity_info!(MigrationEntity, name);

/// Where a configuration value was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum ConfigScope {
    Module,
    ConfigClass(String),
    AppConfig,
}

/// Structural classification of a configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigValue {
    /// A string literal.
    Literal(String),
    /// `True`, `False`, `None` or a number, as written.
    Scalar(String),
    /// `os.environ[...]`, `os.getenv(...)` and friends.
    EnvLookup {
        variable: Option<String>,
        fallback: Option<String>,
    },
    Other,
}

/// A configuration key assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEntity {
    pub file: String,
    pub line: usize,
    pub key: String,
    pub scope: ConfigScope,
    pub value: ConfigValue,
}

entity_info!(ConfigEntity, key);

/// How the statement handed to `execute(...)` was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "text")]
pub enum SqlStatement {
    /// A plain string literal, directly or through `text(...)`.
    Literal(String),
    /// An f-string, `%` or `+` expression, or `.format(...)` call.
    Interpolated,
}

/// A raw SQL statement passed to `execute(...)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSqlEntity {
    pub file: String,
    pub line: usize,
    /// Callee as written (`db.session.execute`, `conn.execute`).
    pub callee: String,
    pub statement: SqlStatement,
    /// Whether the statement went through `text(...)`.
    pub wrapped_in_text: bool,
}

entity_info!(RawSqlEntity, callee);

/// Every entity variant the extractor produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Model(ModelEntity),
    Route(RouteEntity),
    Blueprint(BlueprintEntity),
    Registration(BlueprintRegistration),
    Migration(MigrationEntity),
    Config(ConfigEntity),
    RawSql(RawSqlEntity),
}

impl Entity {
    fn info(&self) -> &dyn EntityInfo {
        match self {
            Entity::Model(e) => e,
            Entity::Route(e) => e,
            Entity::Blueprint(e) => e,
            Entity::Registration(e) => e,
            Entity::Migration(e) => e,
            Entity::Config(e) => e,
            Entity::RawSql(e) => e,
        }
    }
}

impl EntityInfo for Entity {
    fn file(&self) -> &str {
        self.info().file()
    }
    fn line(&self) -> usize {
        self.info().line()
    }
    fn name(&self) -> &str {
        self.info().name()
    }
}

/// Route-side entities of one file.
#[derive(Debug, Clone, Default)]
pub struct RouteExtraction {
    pub routes: Vec<RouteEntity>,
    pub blueprints: Vec<BlueprintEntity>,
    pub registrations: Vec<BlueprintRegistration>,
}

/// Extracts entities from parsed source files.
pub struct EntityExtractor<'s> {
    settings: &'s Settings,
}

impl<'s> EntityExtractor<'s> {
    pub fn new(settings: &'s Settings) -> Self {
        Self { settings }
    }

    fn tree<'f>(&self, file: &'f SourceFile) -> Result<&'f tree_sitter::Tree, ExtractError> {
        file.tree().map_err(|failure| ExtractError::Unparsed {
            path: file.path().to_string(),
            failure: failure.clone(),
        })
    }

    /// Models of `file` on its own. Bases defined in other files are not
    /// seen; use [`EntityExtractor::model_classes`] with [`resolve_models`]
    /// for a whole project.
    pub fn models(&self, file: &SourceFile) -> Result<Vec<ModelEntity>, ExtractError> {
        let tree = self.tree(file)?;
        models::extract(file, tree.root_node(), self.settings)
    }

    pub fn model_classes(&self, file: &SourceFile) -> Result<ModelClasses, ExtractError> {
        let tree = self.tree(file)?;
        models::classes(file, tree.root_node())
    }

    pub fn routes(&self, file: &SourceFile) -> Result<RouteExtraction, ExtractError> {
        let tree = self.tree(file)?;
        routes::extract(file, tree.root_node(), self.settings)
    }

    /// The migration script in `file`, if the file lives under a migrations directory.
    pub fn migration(&self, file: &SourceFile) -> Result<Option<MigrationEntity>, ExtractError> {
        if !self.settings.is_migration_file(file.path()) {
            return Ok(None);
        }
        let tree = self.tree(file)?;
        migrations::extract(file, tree.root_node()).map(Some)
    }

    pub fn configs(&self, file: &SourceFile) -> Result<Vec<ConfigEntity>, ExtractError> {
        let tree = self.tree(file)?;
        configs::extract(file, tree.root_node(), self.settings)
    }

    /// Raw SQL handed to `execute(...)`. Migration scripts are skipped.
    pub fn raw_sql(&self, file: &SourceFile) -> Result<Vec<RawSqlEntity>, ExtractError> {
        if self.settings.is_migration_file(file.path()) {
            return Ok(Vec::new());
        }
        let tree = self.tree(file)?;
        queries::extract(file, tree.root_node())
    }

    /// Every entity in `file`, grouped by variant in source order.
    pub fn extract(&self, file: &SourceFile) -> Result<Vec<Entity>, ExtractError> {
        let mut entities: Vec<Entity> = Vec::new();
        entities.extend(self.models(file)?.into_iter().map(Entity::Model));

        let routes = self.routes(file)?;
        entities.extend(routes.routes.into_iter().map(Entity::Route));
        entities.extend(routes.blueprints.into_iter().map(Entity::Blueprint));
        entities.extend(routes.registrations.into_iter().map(Entity::Registration));

        if let Some(migration) = self.migration(file)? {
            entities.push(Entity::Migration(migration));
        }
        entities.extend(self.configs(file)?.into_iter().map(Entity::Config));
        entities.extend(self.raw_sql(file)?.into_iter().map(Entity::RawSql));
        Ok(entities)
    }
}

/// Count entities per variant, for debug logging.
pub fn tally(entities: &[Entity]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for e in entities {
        let key = match e {
            Entity::Model(_) => "model",
            Entity::Route(_) => "route",
            Entity::Blueprint(_) => "blueprint",
            Entity::Registration(_) => "registration",
            Entity::Migration(_) => "migration",
            Entity::Config(_) => "config",
            Entity::RawSql(_) => "raw_sql",
        };
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mixed_file() {
        let settings = Settings::default();
        let file = SourceFile::new(
            "app/__init__.py",
            r#"
from flask import Flask, Blueprint

SECRET_KEY = "dev"
app = Flask(__name__)
bp = Blueprint("main", __name__)

class User(db.Model):
    id = db.Column(db.Integer, primary_key=True)

@bp.route("/users")
def users():
    return []
"#,
        );

        let entities = EntityExtractor::new(&settings).extract(&file).unwrap();
        let counts = tally(&entities);
        assert_eq!(counts.get("model"), Some(&1));
        assert_eq!(counts.get("route"), Some(&1));
        assert_eq!(counts.get("blueprint"), Some(&1));
        assert_eq!(counts.get("config"), Some(&1));
        assert_eq!(counts.get("migration"), None);

        let names: Vec<&str> = entities.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["User", "users", "bp", "SECRET_KEY"]);
    }

    #[test]
    fn test_unparsed_file_yields_error_not_panic() {
        let settings = Settings::default();
        let file = SourceFile::new("broken.py", "class X(:\n");
        let err = EntityExtractor::new(&settings).extract(&file).unwrap_err();
        assert!(matches!(err, ExtractError::Unparsed { .. }));
    }
}
