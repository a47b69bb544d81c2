//! SQLAlchemy model extraction.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tree_sitter::Node;

use super::syntax::{self, Assignment};
use super::{Column, ExtractError, ModelEntity, Relationship, RelationshipKind};
use crate::config::Settings;
use crate::source::SourceFile;

const COLUMN_CALLS: &[&str] = &["Column", "mapped_column"];
const RELATIONSHIP_CALLS: &[&str] = &["relationship", "db_relationship"];
const DECLARATIVE_FACTORIES: &[&str] = &["declarative_base", "as_declarative"];
const DECLARATIVE_ROOTS: &[&str] = &["DeclarativeBase", "DeclarativeBaseNoMeta"];
const COLLECTION_TYPES: &[&str] = &["List", "list", "Set", "set", "Sequence", "WriteOnlyMapped", "DynamicMapped"];

/// A top-level class with its decorators.
struct ClassDef<'t> {
    decorators: Vec<String>,
    node: Node<'t>,
    name: String,
    bases: Vec<String>,
}

/// Every top-level class of one file, before model detection.
///
/// Model detection needs the whole project: a model's declarative base or
/// abstract parent may live in another module. [`resolve`] decides which
/// classes are models once all files have been read.
#[derive(Debug, Clone, Default)]
pub struct ModelClasses {
    /// Declarative bases defined here (`Base = declarative_base()`,
    /// `class Base(DeclarativeBase)`, `@as_declarative`).
    pub markers: BTreeSet<String>,
    /// The remaining classes, extracted as if they were models.
    pub classes: Vec<ModelEntity>,
}

pub(super) fn extract(
    file: &SourceFile,
    root: Node,
    settings: &Settings,
) -> Result<Vec<ModelEntity>, ExtractError> {
    Ok(resolve(vec![classes(file, root)?], settings))
}

pub(super) fn classes(file: &SourceFile, root: Node) -> Result<ModelClasses, ExtractError> {
    let mut found = ModelClasses::default();

    for stmt in syntax::named_children(root) {
        if let Some(assign) = syntax::as_assignment(stmt) {
            // Base = declarative_base()
            if let Some(right) = assign.right {
                if syntax::is_call_to(file, right, DECLARATIVE_FACTORIES)
                    && assign.left.kind() == "identifier"
                {
                    found.markers.insert(file.node_text(assign.left).to_string());
                }
            }
            continue;
        }

        let Some((decorators, definition)) = syntax::unwrap_decorated(stmt) else {
            continue;
        };
        if definition.kind() != "class_definition" {
            continue;
        }
        let class = ClassDef {
            decorators: decorators
                .iter()
                .filter_map(|d| syntax::decorator_name(file, *d))
                .map(|s| s.to_string())
                .collect(),
            node: definition,
            name: syntax::definition_name(file, definition).to_string(),
            bases: syntax::base_classes(file, definition),
        };

        // Classes that establish a declarative base are markers, not models.
        let is_root = class
            .bases
            .iter()
            .any(|b| DECLARATIVE_ROOTS.contains(&syntax::last_segment(b)));
        let is_decorated_root = class
            .decorators
            .iter()
            .any(|d| DECLARATIVE_FACTORIES.contains(&syntax::last_segment(d)));
        if is_root || is_decorated_root {
            found.markers.insert(class.name);
            continue;
        }
        found.classes.push(extract_model(file, &class)?);
    }
    Ok(found)
}

/// Pick the models out of the classes of a set of files, given in path order.
///
/// A class is a model when one of its bases is a declarative marker or
/// another model, wherever that base is defined. Bases resolve to a class
/// of the same file first, then to the first class of that name in path
/// order. Each model inherits the columns, dunders and table declaration of
/// its ancestors, abstract ones included.
pub fn resolve(sets: Vec<ModelClasses>, settings: &Settings) -> Vec<ModelEntity> {
    let mut markers: BTreeSet<String> = BTreeSet::new();
    let mut classes: Vec<ModelEntity> = Vec::new();
    for set in sets {
        markers.extend(set.markers);
        classes.extend(set.classes);
    }

    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, class) in classes.iter().enumerate() {
        by_name.entry(class.class_name.as_str()).or_default().push(i);
    }
    let parent_of = |child: usize, base: &str| -> Option<usize> {
        let candidates = by_name.get(syntax::last_segment(base))?;
        let mut others = candidates.iter().copied().filter(|&c| c != child);
        let file = &classes[child].file;
        others
            .clone()
            .find(|&c| &classes[c].file == file)
            .or_else(|| others.next())
    };
    let parents: Vec<Vec<usize>> = classes
        .iter()
        .enumerate()
        .map(|(i, class)| {
            class
                .base_classes
                .iter()
                .filter_map(|b| parent_of(i, b))
                .collect()
        })
        .collect();

    let mut is_model: Vec<bool> = classes
        .iter()
        .map(|class| {
            class.base_classes.iter().any(|b| {
                let last = syntax::last_segment(b);
                settings.is_model_marker(last) || markers.contains(last)
            })
        })
        .collect();
    loop {
        let mut changed = false;
        for i in 0..classes.len() {
            if !is_model[i] && parents[i].iter().any(|&p| is_model[p]) {
                is_model[i] = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    classes
        .iter()
        .enumerate()
        .filter(|(i, _)| is_model[*i])
        .map(|(i, class)| inherit(class, i, &classes, &parents))
        .collect()
}

/// `class` with the members of its ancestors merged in. Members declared
/// on the class itself win over inherited ones of the same name.
fn inherit(
    class: &ModelEntity,
    index: usize,
    classes: &[ModelEntity],
    parents: &[Vec<usize>],
) -> ModelEntity {
    let mut model = class.clone();
    let mut seen: BTreeSet<usize> = BTreeSet::from([index]);
    let mut pending: Vec<usize> = parents[index].iter().rev().copied().collect();

    while let Some(p) = pending.pop() {
        if !seen.insert(p) {
            continue;
        }
        let ancestor = &classes[p];
        for column in &ancestor.columns {
            if !model.columns.iter().any(|c| c.name == column.name) {
                model.columns.push(column.clone());
            }
        }
        model
            .declared_dunders
            .extend(ancestor.declared_dunders.iter().cloned());
        if model.table_name.is_none()
            && (ancestor.declares_table || ancestor.table_name.is_some())
        {
            model.declares_table = true;
        }
        pending.extend(parents[p].iter().rev().copied());
    }
    model
}

fn extract_model(file: &SourceFile, class: &ClassDef) -> Result<ModelEntity, ExtractError> {
    let body = class
        .node
        .child_by_field_name("body")
        .ok_or_else(|| ExtractError::Unexpected {
            path: file.path().to_string(),
            line: syntax::line(class.node),
            kind: "class without body".to_string(),
        })?;

    let mut model = ModelEntity {
        file: file.path().to_string(),
        line: syntax::line(class.node),
        class_name: class.name.clone(),
        base_classes: class.bases.clone(),
        table_name: None,
        table_name_line: None,
        declares_table: false,
        is_abstract: false,
        columns: Vec::new(),
        relationships: Vec::new(),
        declared_dunders: BTreeSet::new(),
        has_docstring: syntax::has_docstring(body),
    };

    for stmt in syntax::named_children(body) {
        if let Some(assign) = syntax::as_assignment(stmt) {
            visit_assignment(file, &assign, &mut model);
            continue;
        }

        let Some((decorators, definition)) = syntax::unwrap_decorated(stmt) else {
            continue;
        };
        if definition.kind() != "function_definition" {
            continue;
        }
        let name = syntax::definition_name(file, definition).to_string();
        let declared_attr = decorators.iter().any(|d| {
            syntax::decorator_name(file, *d)
                .map(|n| syntax::last_segment(n) == "declared_attr")
                .unwrap_or(false)
        });
        if declared_attr && matches!(name.as_str(), "__tablename__" | "__table__") {
            model.declares_table = true;
        }
        if name.starts_with("__") && name.ends_with("__") {
            model.declared_dunders.insert(name);
        }
    }

    Ok(model)
}

fn visit_assignment(file: &SourceFile, assign: &Assignment, model: &mut ModelEntity) {
    if assign.left.kind() != "identifier" {
        return;
    }
    let name = file.node_text(assign.left);
    let line = syntax::line(assign.node);

    match name {
        "__tablename__" => {
            match assign.right.and_then(|r| syntax::string_literal(file, r)) {
                Some(table) => {
                    model.table_name = Some(table);
                    model.table_name_line = Some(line);
                }
                // Computed table names still declare a table.
                None => model.declares_table = true,
            }
            return;
        }
        "__table__" => {
            model.declares_table = true;
            return;
        }
        "__abstract__" => {
            model.is_abstract = assign.right.map(syntax::is_true).unwrap_or(false);
            return;
        }
        _ => {}
    }

    let annotation = assign.annotation.and_then(|a| mapped_annotation(file, a));

    match assign.right {
        Some(right) if syntax::is_call_to(file, right, COLUMN_CALLS) => {
            model
                .columns
                .push(column(file, name, right, annotation.as_ref(), line));
        }
        Some(right) if syntax::is_call_to(file, right, RELATIONSHIP_CALLS) => {
            if let Some(rel) = relationship(file, name, right, annotation.as_ref(), line) {
                model.relationships.push(rel);
            }
        }
        // id: Mapped[int] declares a column on its own.
        None => {
            if let Some(mapped) = annotation {
                if mapped.collection || mapped.is_model_reference {
                    return;
                }
                model.columns.push(Column {
                    name: name.to_string(),
                    column_type: Some(mapped.type_name),
                    nullable: mapped.optional,
                    is_primary_key: false,
                    is_foreign_key: false,
                    foreign_key_target: None,
                    has_default: false,
                    line,
                });
            }
        }
        _ => {}
    }
}

/// What a `Mapped[...]` annotation says about an attribute.
struct MappedAnnotation {
    type_name: String,
    optional: bool,
    collection: bool,
    /// The inner type is a quoted forward reference (`Mapped["User"]`).
    is_model_reference: bool,
}

fn mapped_annotation(file: &SourceFile, annotation: Node) -> Option<MappedAnnotation> {
    // `type` wraps the expression in newer grammars
    let expr = if annotation.kind() == "type" {
        annotation.named_child(0)?
    } else {
        annotation
    };

    let (outer, inner) = match expr.kind() {
        "subscript" => (
            expr.child_by_field_name("value")?,
            expr.child_by_field_name("subscript")?,
        ),
        "generic_type" => {
            let children = syntax::named_children(expr);
            let outer = *children.first()?;
            let params = children.get(1)?;
            (outer, params.named_child(0)?)
        }
        _ => return None,
    };
    if syntax::last_segment(file.node_text(outer)) != "Mapped" {
        return None;
    }

    let mut text = file.node_text(inner).trim().to_string();
    let mut optional = false;
    let mut collection = false;

    if let Some(rest) = strip_wrapper(&text, "Optional") {
        optional = true;
        text = rest;
    }
    if text.contains("| None") || text.contains("None |") {
        optional = true;
        text = text.replace("| None", "").replace("None |", "").trim().to_string();
    }
    for wrapper in COLLECTION_TYPES {
        if let Some(rest) = strip_wrapper(&text, wrapper) {
            collection = true;
            text = rest;
            break;
        }
    }

    let is_model_reference = text.starts_with('"') || text.starts_with('\'');
    let type_name = text.trim_matches(|c| c == '"' || c == '\'').to_string();

    Some(MappedAnnotation {
        type_name,
        optional,
        collection,
        is_model_reference,
    })
}

/// `Optional[X]` -> `X` when `text` is wrapped in `name[...]`.
fn strip_wrapper(text: &str, name: &str) -> Option<String> {
    let rest = text.strip_prefix(name)?.strip_prefix('[')?;
    let inner = rest.strip_suffix(']')?;
    Some(inner.trim().to_string())
}

fn type_name(file: &SourceFile, node: Node) -> Option<String> {
    let text = match node.kind() {
        "identifier" | "attribute" => file.node_text(node),
        "call" => syntax::callee(file, node)?,
        _ => return None,
    };
    Some(syntax::last_segment(text).to_string())
}

fn column(
    file: &SourceFile,
    name: &str,
    call: Node,
    annotation: Option<&MappedAnnotation>,
    line: usize,
) -> Column {
    let mut column_type = None;
    let mut foreign_key_target = None;
    let mut is_foreign_key = false;

    for arg in syntax::positional_args(call) {
        if syntax::is_call_to(file, arg, &["ForeignKey"]) {
            is_foreign_key = true;
            foreign_key_target = syntax::positional_args(arg)
                .first()
                .and_then(|t| syntax::string_literal(file, *t));
            continue;
        }
        // Column("name", Integer): the leading string is the column name
        if syntax::string_literal(file, arg).is_some() {
            continue;
        }
        if column_type.is_none() {
            column_type = type_name(file, arg);
        }
    }
    if column_type.is_none() {
        column_type = annotation.map(|a| a.type_name.clone());
    }

    let mut is_primary_key = false;
    let mut nullable = None;
    let mut has_default = false;
    for (key, value) in syntax::keyword_args(file, call) {
        match key.as_str() {
            "primary_key" => is_primary_key = syntax::is_true(value),
            "nullable" => {
                if syntax::is_true(value) {
                    nullable = Some(true);
                } else if syntax::is_false(value) {
                    nullable = Some(false);
                }
            }
            "default" | "server_default" | "insert_default" => has_default = true,
            _ => {}
        }
    }

    let nullable = nullable.unwrap_or_else(|| match annotation {
        Some(a) => a.optional,
        None => !is_primary_key,
    });

    Column {
        name: name.to_string(),
        column_type,
        nullable,
        is_primary_key,
        is_foreign_key,
        foreign_key_target,
        has_default,
        line,
    }
}

fn relationship(
    file: &SourceFile,
    name: &str,
    call: Node,
    annotation: Option<&MappedAnnotation>,
    line: usize,
) -> Option<Relationship> {
    let target = syntax::positional_args(call)
        .first()
        .and_then(|arg| match arg.kind() {
            "identifier" | "attribute" => Some(file.node_text(*arg).to_string()),
            _ => syntax::string_literal(file, *arg),
        })
        .or_else(|| annotation.map(|a| a.type_name.clone()))?;

    let kwargs: BTreeMap<String, Node> = syntax::keyword_args(file, call).into_iter().collect();

    let kind = if kwargs.contains_key("secondary") {
        RelationshipKind::ManyToMany
    } else if kwargs.get("uselist").map(|v| syntax::is_false(*v)).unwrap_or(false) {
        RelationshipKind::OneToOne
    } else if annotation.map(|a| !a.collection).unwrap_or(false) {
        RelationshipKind::OneToOne
    } else {
        RelationshipKind::OneToMany
    };

    let back_reference = kwargs
        .get("back_populates")
        .and_then(|v| syntax::string_literal(file, *v))
        .or_else(|| {
            let backref = *kwargs.get("backref")?;
            if backref.kind() == "call" {
                syntax::positional_args(backref)
                    .first()
                    .and_then(|n| syntax::string_literal(file, *n))
            } else {
                syntax::string_literal(file, backref)
            }
        });

    Some(Relationship {
        name: name.to_string(),
        target,
        kind,
        back_reference,
        line,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(source: &str) -> Vec<ModelEntity> {
        let settings = Settings::default();
        let file = SourceFile::new("app/models.py", source);
        let tree = file.tree().unwrap();
        extract(&file, tree.root_node(), &settings).unwrap()
    }

    #[test]
    fn test_flask_sqlalchemy_model() {
        let found = models(
            r#"
class User(db.Model):
    """A user."""
    __tablename__ = 'users'

    id = db.Column(db.Integer, primary_key=True)
    email = db.Column(db.String(120), nullable=False, unique=True)
    team_id = db.Column(db.Integer, db.ForeignKey('teams.id'))
    posts = db.relationship('Post', backref='author', lazy=True)

    def __repr__(self):
        return f"<User {self.email}>"
"#,
        );

        assert_eq!(found.len(), 1);
        let user = &found[0];
        assert_eq!(user.class_name, "User");
        assert_eq!(user.line, 2);
        assert_eq!(user.table_name.as_deref(), Some("users"));
        assert!(user.has_docstring);
        assert!(user.declared_dunders.contains("__repr__"));

        assert_eq!(user.columns.len(), 3);
        let id = &user.columns[0];
        assert!(id.is_primary_key);
        assert!(!id.nullable);
        assert_eq!(id.column_type.as_deref(), Some("Integer"));
        let email = &user.columns[1];
        assert!(!email.nullable);
        assert_eq!(email.column_type.as_deref(), Some("String"));
        let team = &user.columns[2];
        assert!(team.is_foreign_key);
        assert_eq!(team.foreign_key_target.as_deref(), Some("teams.id"));
        assert!(team.nullable);

        let rel = &user.relationships[0];
        assert_eq!(rel.target, "Post");
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
        assert_eq!(rel.back_reference.as_deref(), Some("author"));
    }

    #[test]
    fn test_declarative_base_and_mapped_columns() {
        let found = models(
            r#"
from sqlalchemy.orm import DeclarativeBase, Mapped, mapped_column, relationship

class Base(DeclarativeBase):
    pass

class Post(Base):
    __tablename__ = "posts"
    id: Mapped[int] = mapped_column(primary_key=True)
    title: Mapped[str]
    summary: Mapped[Optional[str]]
    author: Mapped["User"] = relationship(back_populates="posts")
    tags: Mapped[List["Tag"]] = relationship(secondary="post_tags")
"#,
        );

        assert_eq!(found.len(), 1, "Base must not be reported as a model");
        let post = &found[0];
        let names: Vec<&str> = post.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "title", "summary"]);
        assert!(post.columns[0].is_primary_key);
        assert!(!post.columns[1].nullable);
        assert!(post.columns[2].nullable);

        assert_eq!(post.relationships[0].target, "User");
        assert_eq!(post.relationships[0].kind, RelationshipKind::OneToOne);
        assert_eq!(post.relationships[1].target, "Tag");
        assert_eq!(post.relationships[1].kind, RelationshipKind::ManyToMany);
    }

    #[test]
    fn test_declarative_base_factory_and_abstract_parent() {
        let found = models(
            r#"
Base = declarative_base()

class TimestampedModel(Base):
    __abstract__ = True
    created_at = Column(DateTime)

class Invoice(TimestampedModel):
    __tablename__ = "invoices"
    id = Column(Integer, primary_key=True)

class Helper(object):
    pass
"#,
        );

        let names: Vec<&str> = found.iter().map(|m| m.class_name.as_str()).collect();
        assert_eq!(names, vec!["TimestampedModel", "Invoice"]);
        assert!(found[0].is_abstract);
        assert!(!found[1].is_abstract);
    }

    #[test]
    fn test_abstract_base_columns_are_inherited() {
        let found = models(
            r#"
class BaseModel(db.Model):
    __abstract__ = True
    id = db.Column(db.Integer, primary_key=True)

    def __repr__(self):
        return f"<{type(self).__name__} {self.id}>"

class Tag(BaseModel):
    __tablename__ = "tags"
    name = db.Column(db.String(50))
"#,
        );

        let tag = found.iter().find(|m| m.class_name == "Tag").unwrap();
        let names: Vec<&str> = tag.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "id"]);
        assert!(tag.has_primary_key());
        assert!(tag.declared_dunders.contains("__repr__"));
        assert!(!tag.is_abstract);
    }

    #[test]
    fn test_bases_resolve_across_files() {
        let settings = Settings::default();
        let base = SourceFile::new(
            "app/models/base.py",
            "class BaseModel(db.Model):\n    __abstract__ = True\n    id = db.Column(db.Integer, primary_key=True)\n",
        );
        let post = SourceFile::new(
            "app/models/post.py",
            "class Post(BaseModel):\n    __tablename__ = 'posts'\n    title = db.Column(db.String)\n\nclass Form(object):\n    pass\n",
        );
        let sets: Vec<ModelClasses> = [&base, &post]
            .iter()
            .map(|f| classes(f, f.tree().unwrap().root_node()).unwrap())
            .collect();

        let found = resolve(sets, &settings);
        let names: Vec<&str> = found.iter().map(|m| m.class_name.as_str()).collect();
        assert_eq!(names, vec!["BaseModel", "Post"]);
        assert!(found[1].has_primary_key());
        assert_eq!(found[1].file, "app/models/post.py");
    }

    #[test]
    fn test_single_table_child_inherits_table() {
        let found = models(
            r#"
class Employee(db.Model):
    __tablename__ = "employees"
    id = db.Column(db.Integer, primary_key=True)

class Manager(Employee):
    budget = db.Column(db.Integer)
"#,
        );
        let manager = &found[1];
        assert!(manager.table_name.is_none());
        assert!(manager.declares_table);
        assert!(manager.has_primary_key());
    }

    #[test]
    fn test_declared_attr_tablename() {
        let found = models(
            r#"
class Tenant(db.Model):
    @declared_attr
    def __tablename__(cls):
        return cls.__name__.lower()

    id = db.Column(db.Integer, primary_key=True)
"#,
        );
        assert!(found[0].declares_table);
        assert!(found[0].table_name.is_none());
    }
}
