//! Configuration assignment extraction.

use tree_sitter::Node;

use super::syntax;
use super::{ConfigEntity, ConfigScope, ConfigValue, ExtractError};
use crate::config::Settings;
use crate::source::SourceFile;

/// Callees that read from the environment: `os.getenv`, `environ.get`,
/// `config(...)` from python-decouple, `env(...)` / `env.str(...)` from environs.
fn is_env_call(callee: &str) -> bool {
    let last = syntax::last_segment(callee);
    last == "getenv"
        || callee.ends_with("environ.get")
        || callee.ends_with("environ.setdefault")
        || matches!(callee, "config" | "env")
        || callee.starts_with("env.")
}

pub(super) fn extract(
    file: &SourceFile,
    root: Node,
    settings: &Settings,
) -> Result<Vec<ConfigEntity>, ExtractError> {
    let mut configs = Vec::new();

    for stmt in syntax::named_children(root) {
        if let Some(assign) = syntax::as_assignment(stmt) {
            if assign.left.kind() == "identifier" {
                let key = file.node_text(assign.left);
                if syntax::is_config_key(key) {
                    if let Some(right) = assign.right {
                        configs.push(entity(file, key, ConfigScope::Module, right, assign.node));
                    }
                }
            }
            continue;
        }

        let Some((_, definition)) = syntax::unwrap_decorated(stmt) else {
            continue;
        };
        if definition.kind() != "class_definition" {
            continue;
        }
        let class_name = syntax::definition_name(file, definition).to_string();
        let bases = syntax::base_classes(file, definition);
        if !is_config_class(&class_name, &bases, settings) {
            continue;
        }
        let Some(body) = definition.child_by_field_name("body") else {
            continue;
        };
        for member in syntax::named_children(body) {
            let Some(assign) = syntax::as_assignment(member) else {
                continue;
            };
            if assign.left.kind() != "identifier" {
                continue;
            }
            let key = file.node_text(assign.left);
            if let (true, Some(right)) = (syntax::is_config_key(key), assign.right) {
                configs.push(entity(
                    file,
                    key,
                    ConfigScope::ConfigClass(class_name.clone()),
                    right,
                    assign.node,
                ));
            }
        }
    }

    // app.config["KEY"] = value, anywhere in the file
    for assignment in syntax::descendants_of_kind(root, "assignment") {
        let (Some(left), Some(right)) = (
            assignment.child_by_field_name("left"),
            assignment.child_by_field_name("right"),
        ) else {
            continue;
        };
        if left.kind() != "subscript" {
            continue;
        }
        let (Some(value), Some(index)) = (
            left.child_by_field_name("value"),
            left.child_by_field_name("subscript"),
        ) else {
            continue;
        };
        if !is_config_object(file.node_text(value)) {
            continue;
        }
        if let Some(key) = syntax::string_literal(file, index) {
            configs.push(entity(file, &key, ConfigScope::AppConfig, right, assignment));
        }
    }

    // app.config.update(KEY=value) / app.config.from_mapping(KEY=value)
    for call in syntax::descendants_of_kind(root, "call") {
        let Some(callee) = syntax::callee(file, call) else {
            continue;
        };
        let Some((object, method)) = callee.rsplit_once('.') else {
            continue;
        };
        if !matches!(method, "update" | "from_mapping") || !is_config_object(object) {
            continue;
        }
        for (key, value) in syntax::keyword_args(file, call) {
            if syntax::is_config_key(&key) {
                configs.push(entity(file, &key, ConfigScope::AppConfig, value, value));
            }
        }
    }

    configs.sort_by_key(|c| c.line);
    Ok(configs)
}

/// Bases that make a class an enumeration, never a settings holder.
const ENUM_BASES: &[&str] = &["Enum", "IntEnum", "StrEnum", "Flag", "IntFlag"];

/// A class holds configuration when its name or one of its bases names a
/// config or settings object. Models and enumerations never do.
fn is_config_class(name: &str, bases: &[String], settings: &Settings) -> bool {
    let looks_like_config = |n: &str| {
        let lower = n.to_lowercase();
        lower.contains("config") || lower.contains("settings")
    };
    let mut base_names = bases.iter().map(|b| syntax::last_segment(b));
    if base_names
        .clone()
        .any(|b| settings.is_model_marker(b) || ENUM_BASES.contains(&b))
    {
        return false;
    }
    looks_like_config(name) || base_names.any(looks_like_config)
}

fn is_config_object(text: &str) -> bool {
    text == "config" || text.ends_with(".config")
}

fn entity(file: &SourceFile, key: &str, scope: ConfigScope, value: Node, at: Node) -> ConfigEntity {
    ConfigEntity {
        file: file.path().to_string(),
        line: syntax::line(at),
        key: key.to_string(),
        scope,
        value: classify(file, value),
    }
}

/// Classify a right-hand side by its shape alone.
pub(super) fn classify(file: &SourceFile, node: Node) -> ConfigValue {
    let node = unparenthesize(node);
    if node.kind() != "boolean_operator" {
        return classify_operand(file, node);
    }

    // os.getenv("KEY") or "fallback": the leftmost operand decides, the
    // outermost right operand is the fallback.
    let mut left = node;
    while left.kind() == "boolean_operator" {
        match left.child_by_field_name("left") {
            Some(next) => left = unparenthesize(next),
            None => return ConfigValue::Other,
        }
    }
    match classify_operand(file, left) {
        ConfigValue::EnvLookup { variable, .. } => ConfigValue::EnvLookup {
            variable,
            fallback: node
                .child_by_field_name("right")
                .and_then(|r| syntax::string_literal(file, r)),
        },
        _ => ConfigValue::Other,
    }
}

fn unparenthesize(mut node: Node) -> Node {
    while node.kind() == "parenthesized_expression" {
        match node.named_child(0) {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

fn classify_operand(file: &SourceFile, node: Node) -> ConfigValue {
    if let Some(s) = syntax::string_literal(file, node) {
        return ConfigValue::Literal(s);
    }

    match node.kind() {
        "true" | "false" | "none" | "integer" | "float" => {
            ConfigValue::Scalar(file.node_text(node).to_string())
        }
        // os.environ["KEY"]
        "subscript" => {
            let is_environ = node
                .child_by_field_name("value")
                .map(|v| syntax::last_segment(file.node_text(v)) == "environ")
                .unwrap_or(false);
            if !is_environ {
                return ConfigValue::Other;
            }
            ConfigValue::EnvLookup {
                variable: node
                    .child_by_field_name("subscript")
                    .and_then(|s| syntax::string_literal(file, s)),
                fallback: None,
            }
        }
        "call" => {
            let Some(callee) = syntax::callee(file, node) else {
                return ConfigValue::Other;
            };
            if !is_env_call(callee) {
                return ConfigValue::Other;
            }
            let args = syntax::positional_args(node);
            let fallback = args
                .get(1)
                .copied()
                .or_else(|| syntax::keyword_arg(file, node, "default"))
                .and_then(|n| syntax::string_literal(file, n));
            ConfigValue::EnvLookup {
                variable: args.first().and_then(|n| syntax::string_literal(file, *n)),
                fallback,
            }
        }
        _ => ConfigValue::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs(source: &str) -> Vec<ConfigEntity> {
        let settings = Settings::default();
        let file = SourceFile::new("config.py", source);
        let tree = file.tree().unwrap();
        extract(&file, tree.root_node(), &settings).unwrap()
    }

    #[test]
    fn test_module_level_values() {
        let found = configs(
            r#"
import os
SECRET_KEY = "hunter2"
DATABASE_URL = os.environ["DATABASE_URL"]
MAIL_PASSWORD = os.getenv("MAIL_PASSWORD", "changeme")
REDIS_URL = os.environ.get("REDIS_URL") or "redis://localhost"
DEBUG = True
PORT = 5000
lower_case = "ignored"
"#,
        );

        let keys: Vec<&str> = found.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["SECRET_KEY", "DATABASE_URL", "MAIL_PASSWORD", "REDIS_URL", "DEBUG", "PORT"]
        );
        assert_eq!(found[0].value, ConfigValue::Literal("hunter2".into()));
        assert_eq!(
            found[1].value,
            ConfigValue::EnvLookup {
                variable: Some("DATABASE_URL".into()),
                fallback: None
            }
        );
        assert_eq!(
            found[2].value,
            ConfigValue::EnvLookup {
                variable: Some("MAIL_PASSWORD".into()),
                fallback: Some("changeme".into())
            }
        );
        assert!(matches!(
            found[3].value,
            ConfigValue::EnvLookup { fallback: Some(ref f), .. } if f == "redis://localhost"
        ));
        assert_eq!(found[4].value, ConfigValue::Scalar("True".into()));
        assert_eq!(found[5].value, ConfigValue::Scalar("5000".into()));
    }

    #[test]
    fn test_config_classes_skip_models() {
        let found = configs(
            r#"
class DevelopmentConfig(Config):
    DEBUG = True

class Setting(db.Model):
    NAME = db.Column(db.String)
"#,
        );
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].scope,
            ConfigScope::ConfigClass("DevelopmentConfig".into())
        );
    }

    #[test]
    fn test_enums_and_plain_classes_are_not_config() {
        let found = configs(
            r#"
from enum import Enum

class TokenType(Enum):
    ACCESS_TOKEN = "access"
    REFRESH_TOKEN = "refresh"

class Color(enum.IntEnum):
    RED = 1

class Roles:
    ADMIN_PASSWORD_FIELD = "password"

class ProductionSettings(BaseSettings):
    API_TOKEN = "abc"

class Production(BaseConfig):
    DEBUG = False
"#,
        );
        let scopes: Vec<(&str, &ConfigScope)> =
            found.iter().map(|c| (c.key.as_str(), &c.scope)).collect();
        assert_eq!(
            scopes,
            vec![
                ("API_TOKEN", &ConfigScope::ConfigClass("ProductionSettings".into())),
                ("DEBUG", &ConfigScope::ConfigClass("Production".into())),
            ]
        );
    }

    #[test]
    fn test_deep_or_chain_is_classified() {
        let mut source = String::from("REDIS_URL = os.getenv(\"REDIS_URL\")");
        for _ in 0..20_000 {
            source.push_str(" or None");
        }
        source.push_str(" or \"redis://localhost\"\n");
        let found = configs(&source);
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].value,
            ConfigValue::EnvLookup {
                variable: Some("REDIS_URL".into()),
                fallback: Some("redis://localhost".into())
            }
        );
    }

    #[test]
    fn test_app_config_assignments() {
        let found = configs(
            r#"
def create_app():
    app = Flask(__name__)
    app.config["SQLALCHEMY_DATABASE_URI"] = "postgresql://admin:s3cret@db/app"
    app.config.update(SECRET_KEY="abc", TESTING=False)
    return app
"#,
        );
        let keys: Vec<&str> = found.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["SQLALCHEMY_DATABASE_URI", "SECRET_KEY", "TESTING"]);
        assert!(found.iter().all(|c| c.scope == ConfigScope::AppConfig));
    }
}
