//! Flask route, blueprint and blueprint registration extraction.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Query, QueryCursor};

use super::syntax;
use super::{
    BlueprintEntity, BlueprintRegistration, ExtractError, RouteEntity, RouteExtraction,
};
use crate::config::Settings;
use crate::source::{python, SourceFile};

/// Decorator attributes that register a route.
static ROUTE_DECORATORS: phf::Set<&'static str> = phf::phf_set! {
    "route", "get", "post", "put", "patch", "delete",
};

/// Registrar names treated as the application object.
static APP_NAMES: phf::Set<&'static str> = phf::phf_set! {
    "app", "application", "current_app", "flask_app",
};

/// Substrings of call names that count as input validation.
const VALIDATION_CALLS: &[&str] = &["validate", "verify", "check", "parse_args", "get_json", "is_valid"];

/// Substrings of decorator names that validate input before the handler runs.
const VALIDATION_DECORATORS: &[&str] = &["validate", "expects", "use_args", "use_kwargs", "input", "schema"];

const DEFINITION_QUERY: &str = r#"
(decorated_definition
  definition: (function_definition)) @definition
"#;

const ASSIGNED_CALL_QUERY: &str = r#"
(assignment
  left: (_) @target
  right: (call) @call)
"#;

const CALL_QUERY: &str = r#"
(call
  function: (attribute
    attribute: (identifier) @method)) @call
"#;

static DEFINITIONS: Lazy<Query> = Lazy::new(|| {
    Query::new(&python::language(), DEFINITION_QUERY).expect("definition query must compile")
});

static ASSIGNED_CALLS: Lazy<Query> = Lazy::new(|| {
    Query::new(&python::language(), ASSIGNED_CALL_QUERY).expect("assignment query must compile")
});

static METHOD_CALLS: Lazy<Query> = Lazy::new(|| {
    Query::new(&python::language(), CALL_QUERY).expect("call query must compile")
});

pub(super) fn extract(
    file: &SourceFile,
    root: Node,
    settings: &Settings,
) -> Result<RouteExtraction, ExtractError> {
    let mut extraction = RouteExtraction::default();
    let mut app_names: BTreeSet<String> = BTreeSet::new();

    // Blueprint(...) and Flask(...) constructions
    {
        let query = &*ASSIGNED_CALLS;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, root, file.text().as_bytes());
        while let Some(m) = matches.next() {
            let mut target = None;
            let mut call = None;
            for capture in m.captures {
                match query.capture_names()[capture.index as usize] {
                    "target" => target = Some(capture.node),
                    "call" => call = Some(capture.node),
                    _ => {}
                }
            }
            let (Some(target), Some(call)) = (target, call) else {
                continue;
            };
            let Some(callee) = syntax::callee(file, call) else {
                continue;
            };
            match syntax::last_segment(callee) {
                "Flask" => {
                    app_names.insert(file.node_text(target).to_string());
                }
                "Blueprint" => extraction.blueprints.push(blueprint(file, target, call)),
                _ => {}
            }
        }
    }

    // app.register_blueprint(bp, url_prefix=...)
    {
        let query = &*METHOD_CALLS;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, root, file.text().as_bytes());
        while let Some(m) = matches.next() {
            let mut method = None;
            let mut call = None;
            for capture in m.captures {
                match query.capture_names()[capture.index as usize] {
                    "method" => method = Some(file.node_text(capture.node)),
                    "call" => call = Some(capture.node),
                    _ => {}
                }
            }
            if let (Some("register_blueprint"), Some(call)) = (method, call) {
                if let Some(arg) = syntax::positional_args(call).first() {
                    extraction.registrations.push(BlueprintRegistration {
                        file: file.path().to_string(),
                        line: syntax::line(call),
                        blueprint: file.node_text(*arg).to_string(),
                        url_prefix: syntax::keyword_arg(file, call, "url_prefix")
                            .filter(|v| !syntax::is_none(*v))
                            .map(|v| {
                                syntax::string_literal(file, v)
                                    .unwrap_or_else(|| file.node_text(v).to_string())
                            }),
                    });
                }
            }
        }
    }

    // Decorated handlers
    {
        let query = &*DEFINITIONS;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, root, file.text().as_bytes());
        while let Some(m) = matches.next() {
            for capture in m.captures {
                if query.capture_names()[capture.index as usize] == "definition" {
                    routes_of(file, capture.node, &app_names, settings, &mut extraction.routes)?;
                }
            }
        }
    }

    extraction.routes.sort_by_key(|r| r.line);
    Ok(extraction)
}

fn blueprint(file: &SourceFile, target: Node, call: Node) -> BlueprintEntity {
    let blueprint_name = syntax::positional_args(call)
        .first()
        .and_then(|n| syntax::string_literal(file, *n))
        .or_else(|| {
            syntax::keyword_arg(file, call, "name").and_then(|n| syntax::string_literal(file, n))
        });
    let url_prefix = syntax::keyword_arg(file, call, "url_prefix")
        .filter(|v| !syntax::is_none(*v))
        .map(|v| syntax::string_literal(file, v).unwrap_or_else(|| file.node_text(v).to_string()));

    BlueprintEntity {
        file: file.path().to_string(),
        line: syntax::line(call),
        variable: file.node_text(target).to_string(),
        blueprint_name,
        url_prefix,
    }
}

/// One route per route decorator on a decorated function.
fn routes_of(
    file: &SourceFile,
    decorated: Node,
    app_names: &BTreeSet<String>,
    settings: &Settings,
    out: &mut Vec<RouteEntity>,
) -> Result<(), ExtractError> {
    let Some((decorators, handler)) = syntax::unwrap_decorated(decorated) else {
        return Ok(());
    };

    let decorator_names: BTreeSet<String> = decorators
        .iter()
        .filter_map(|d| syntax::decorator_name(file, *d))
        .map(|s| s.to_string())
        .collect();

    let mut route_decorators = Vec::new();
    for decorator in &decorators {
        let Some(expr) = syntax::decorator_expr(*decorator) else {
            continue;
        };
        if expr.kind() != "call" {
            continue;
        }
        let Some(function) = expr.child_by_field_name("function") else {
            continue;
        };
        if function.kind() != "attribute" {
            continue;
        }
        let (Some(object), Some(attribute)) = (
            function.child_by_field_name("object"),
            function.child_by_field_name("attribute"),
        ) else {
            continue;
        };
        let verb = file.node_text(attribute);
        if ROUTE_DECORATORS.contains(verb) {
            route_decorators.push((*decorator, expr, file.node_text(object).to_string(), verb));
        }
    }
    if route_decorators.is_empty() {
        return Ok(());
    }

    let body = handler
        .child_by_field_name("body")
        .ok_or_else(|| ExtractError::Unexpected {
            path: file.path().to_string(),
            line: syntax::line(handler),
            kind: "function without body".to_string(),
        })?;
    let handler_name = syntax::definition_name(file, handler).to_string();
    let has_docstring = syntax::has_docstring(body);
    let has_error_handling = !syntax::descendants_of_kind(body, "try_statement").is_empty();
    let has_input_validation = validates_input(file, body, &decorator_names);

    for (decorator, call, registrar, verb) in route_decorators {
        let path_pattern = syntax::positional_args(call)
            .first()
            .and_then(|n| syntax::string_literal(file, *n))
            .or_else(|| {
                syntax::keyword_arg(file, call, "rule").and_then(|n| syntax::string_literal(file, n))
            })
            .unwrap_or_else(|| "/".to_string());

        let (http_methods, methods_explicit): (BTreeSet<String>, bool) = if verb == "route" {
            match syntax::keyword_arg(file, call, "methods")
                .and_then(|v| syntax::string_list(file, v))
            {
                Some(methods) => (methods.iter().map(|m| m.to_uppercase()).collect(), true),
                None => (settings.default_methods().clone(), false),
            }
        } else {
            (BTreeSet::from([verb.to_uppercase()]), true)
        };

        let blueprint_name = if is_app(&registrar, app_names) {
            None
        } else {
            Some(registrar.clone())
        };

        out.push(RouteEntity {
            file: file.path().to_string(),
            line: syntax::line(decorator),
            path_pattern,
            http_methods,
            methods_explicit,
            handler_name: handler_name.clone(),
            registrar,
            blueprint_name,
            decorators: decorator_names.clone(),
            has_docstring,
            has_error_handling,
            has_input_validation,
        });
    }
    Ok(())
}

fn is_app(registrar: &str, app_names: &BTreeSet<String>) -> bool {
    app_names.contains(registrar) || APP_NAMES.contains(syntax::last_segment(registrar))
}

fn validates_input(file: &SourceFile, body: Node, decorators: &BTreeSet<String>) -> bool {
    let by_decorator = decorators.iter().any(|d| {
        let last = syntax::last_segment(d).to_lowercase();
        VALIDATION_DECORATORS.iter().any(|v| last.contains(v))
    });
    if by_decorator {
        return true;
    }

    syntax::descendants_of_kind(body, "call").into_iter().any(|call| {
        syntax::callee(file, call)
            .map(|c| {
                let last = syntax::last_segment(c).to_lowercase();
                VALIDATION_CALLS.iter().any(|v| last.contains(v))
            })
            .unwrap_or(false)
    })
}
