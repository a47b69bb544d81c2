//! Structural helpers over the Python syntax tree.
//!
//! Nothing here evaluates code; every answer comes from the shape of
//! the tree and the literal text of its leaves.

use tree_sitter::Node;

use crate::source::SourceFile;

/// 1-based line of a node.
pub fn line(node: Node) -> usize {
    node.start_position().row + 1
}

/// Last segment of a dotted name: `sa.orm.relationship` -> `relationship`.
pub fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

pub fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Visit `node` and all its named descendants in source order.
///
/// Uses a tree cursor rather than recursion, so deeply nested expressions
/// cannot exhaust the stack.
pub fn walk<'t>(node: Node<'t>, visit: &mut impl FnMut(Node<'t>)) {
    let mut cursor = node.walk();
    loop {
        let current = cursor.node();
        if current.is_named() {
            visit(current);
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node() == node {
                return;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Collect all descendants (including `node`) of the given kind.
pub fn descendants_of_kind<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    walk(node, &mut |n| {
        if n.kind() == kind {
            found.push(n);
        }
    });
    found
}

/// Value of a string literal. F-strings and other interpolated strings
/// are not literals and yield `None`.
pub fn string_literal(file: &SourceFile, node: Node) -> Option<String> {
    match node.kind() {
        "string" => {
            let mut value = String::new();
            for child in named_children(node) {
                match child.kind() {
                    "string_content" | "escape_sequence" => value.push_str(file.node_text(child)),
                    "interpolation" => return None,
                    _ => {}
                }
            }
            Some(value)
        }
        "concatenated_string" => {
            let mut value = String::new();
            for part in named_children(node) {
                value.push_str(&string_literal(file, part)?);
            }
            Some(value)
        }
        "parenthesized_expression" => {
            let mut inner = node.named_child(0)?;
            while inner.kind() == "parenthesized_expression" {
                inner = inner.named_child(0)?;
            }
            string_literal(file, inner)
        }
        _ => None,
    }
}

/// String literals of a list, tuple or set display, or a lone string.
pub fn string_list(file: &SourceFile, node: Node) -> Option<Vec<String>> {
    match node.kind() {
        "list" | "tuple" | "set" => named_children(node)
            .into_iter()
            .filter(|n| n.kind() != "comment")
            .map(|n| string_literal(file, n))
            .collect(),
        _ => string_literal(file, node).map(|s| vec![s]),
    }
}

pub fn is_true(node: Node) -> bool {
    node.kind() == "true"
}

pub fn is_false(node: Node) -> bool {
    node.kind() == "false"
}

pub fn is_none(node: Node) -> bool {
    node.kind() == "none"
}

/// Dotted name of the called expression: `db.Column(...)` -> `db.Column`.
pub fn callee<'f>(file: &'f SourceFile, call: Node) -> Option<&'f str> {
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" | "attribute" => Some(file.node_text(function)),
        _ => None,
    }
}

/// Whether `node` is a call whose callee ends in one of `names`.
pub fn is_call_to(file: &SourceFile, node: Node, names: &[&str]) -> bool {
    node.kind() == "call"
        && callee(file, node)
            .map(|c| names.contains(&last_segment(c)))
            .unwrap_or(false)
}

/// Positional arguments of a call, in order.
pub fn positional_args(call: Node) -> Vec<Node> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    named_children(args)
        .into_iter()
        .filter(|n| {
            !matches!(
                n.kind(),
                "keyword_argument" | "list_splat" | "dictionary_splat" | "comment"
            )
        })
        .collect()
}

/// Keyword arguments of a call as `(name, value)` pairs.
pub fn keyword_args<'t>(file: &SourceFile, call: Node<'t>) -> Vec<(String, Node<'t>)> {
    let Some(args) = call.child_by_field_name("arguments") else {
        return Vec::new();
    };
    named_children(args)
        .into_iter()
        .filter(|n| n.kind() == "keyword_argument")
        .filter_map(|kw| {
            let name = kw.child_by_field_name("name")?;
            let value = kw.child_by_field_name("value")?;
            Some((file.node_text(name).to_string(), value))
        })
        .collect()
}

pub fn keyword_arg<'t>(file: &SourceFile, call: Node<'t>, name: &str) -> Option<Node<'t>> {
    keyword_args(file, call)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
}

/// An assignment statement split into its parts.
pub struct Assignment<'t> {
    pub node: Node<'t>,
    pub left: Node<'t>,
    pub annotation: Option<Node<'t>>,
    pub right: Option<Node<'t>>,
}

/// View a statement (`expression_statement` or bare `assignment`) as an assignment.
pub fn as_assignment(stmt: Node) -> Option<Assignment> {
    let node = match stmt.kind() {
        "assignment" => stmt,
        "expression_statement" => {
            let inner = stmt.named_child(0)?;
            if inner.kind() != "assignment" {
                return None;
            }
            inner
        }
        _ => return None,
    };
    let left = node.child_by_field_name("left")?;
    Some(Assignment {
        node,
        left,
        annotation: node.child_by_field_name("type"),
        right: node.child_by_field_name("right"),
    })
}

/// Split a `decorated_definition` into decorators and the wrapped definition.
/// Plain definitions come back with no decorators.
pub fn unwrap_decorated(node: Node) -> Option<(Vec<Node>, Node)> {
    match node.kind() {
        "decorated_definition" => {
            let definition = node.child_by_field_name("definition")?;
            let decorators = named_children(node)
                .into_iter()
                .filter(|n| n.kind() == "decorator")
                .collect();
            Some((decorators, definition))
        }
        "function_definition" | "class_definition" => Some((Vec::new(), node)),
        _ => None,
    }
}

/// The expression under a `@decorator`.
pub fn decorator_expr(decorator: Node) -> Option<Node> {
    named_children(decorator)
        .into_iter()
        .find(|n| n.kind() != "comment")
}

/// Name of a decorator without its arguments: `@bp.route("/")` -> `bp.route`.
pub fn decorator_name<'f>(file: &'f SourceFile, decorator: Node) -> Option<&'f str> {
    let expr = decorator_expr(decorator)?;
    match expr.kind() {
        "call" => callee(file, expr),
        "identifier" | "attribute" => Some(file.node_text(expr)),
        _ => None,
    }
}

/// Whether a block starts with a string expression.
pub fn has_docstring(body: Node) -> bool {
    let first = named_children(body)
        .into_iter()
        .find(|n| n.kind() != "comment");
    match first {
        Some(stmt) if stmt.kind() == "expression_statement" => stmt
            .named_child(0)
            .map(|e| matches!(e.kind(), "string" | "concatenated_string"))
            .unwrap_or(false),
        _ => false,
    }
}

/// Base class expressions of a class, as written.
pub fn base_classes(file: &SourceFile, class: Node) -> Vec<String> {
    let Some(list) = class.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    named_children(list)
        .into_iter()
        .filter(|n| !matches!(n.kind(), "keyword_argument" | "comment"))
        .map(|n| file.node_text(n).to_string())
        .collect()
}

pub fn definition_name<'f>(file: &'f SourceFile, definition: Node) -> &'f str {
    definition
        .child_by_field_name("name")
        .map(|n| file.node_text(n))
        .unwrap_or("")
}

/// Whether a name looks like a configuration key (UPPER_SNAKE_CASE).
pub fn is_config_key(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_first_statement(source: &str, check: impl FnOnce(&SourceFile, Node)) {
        let file = SourceFile::new("t.py", source);
        let tree = file.tree().unwrap();
        let stmt = tree.root_node().named_child(0).unwrap();
        check(&file, stmt);
    }

    #[test]
    fn test_string_literal_forms() {
        with_first_statement("x = 'users'\n", |file, stmt| {
            let a = as_assignment(stmt).unwrap();
            assert_eq!(string_literal(file, a.right.unwrap()), Some("users".into()));
        });
        with_first_statement("x = 'a' 'b'\n", |file, stmt| {
            let a = as_assignment(stmt).unwrap();
            assert_eq!(string_literal(file, a.right.unwrap()), Some("ab".into()));
        });
        with_first_statement("x = f'{y}_s'\n", |file, stmt| {
            let a = as_assignment(stmt).unwrap();
            assert_eq!(string_literal(file, a.right.unwrap()), None);
        });
    }

    #[test]
    fn test_call_arguments() {
        with_first_statement(
            "c = db.Column('name', db.String(80), nullable=False, default='x')\n",
            |file, stmt| {
                let call = as_assignment(stmt).unwrap().right.unwrap();
                assert_eq!(callee(file, call), Some("db.Column"));
                assert!(is_call_to(file, call, &["Column"]));
                assert_eq!(positional_args(call).len(), 2);
                let nullable = keyword_arg(file, call, "nullable").unwrap();
                assert!(is_false(nullable));
                assert!(keyword_arg(file, call, "primary_key").is_none());
            },
        );
    }

    #[test]
    fn test_decorators_and_docstring() {
        with_first_statement(
            "@bp.route('/x', methods=['POST'])\n@login_required\ndef f():\n    \"\"\"Doc.\"\"\"\n    return 1\n",
            |file, stmt| {
                let (decorators, def) = unwrap_decorated(stmt).unwrap();
                let names: Vec<_> = decorators
                    .iter()
                    .filter_map(|d| decorator_name(file, *d))
                    .collect();
                assert_eq!(names, vec!["bp.route", "login_required"]);
                assert_eq!(definition_name(file, def), "f");
                assert!(has_docstring(def.child_by_field_name("body").unwrap()));
            },
        );
    }

    #[test]
    fn test_walk_survives_deep_nesting() {
        let mut source = String::from("x = 1");
        for _ in 0..20_000 {
            source.push_str(" + 1");
        }
        source.push('\n');
        let file = SourceFile::new("deep.py", source);
        let tree = file.tree().unwrap();

        let integers = descendants_of_kind(tree.root_node(), "integer");
        assert_eq!(integers.len(), 20_001);
    }

    #[test]
    fn test_walk_stays_inside_subtree() {
        with_first_statement("def f():\n    return 1\n\ny = 2\n", |_, stmt| {
            let integers = descendants_of_kind(stmt, "integer");
            assert_eq!(integers.len(), 1);
        });
    }

    #[test]
    fn test_config_key_shape() {
        assert!(is_config_key("SECRET_KEY"));
        assert!(is_config_key("S3_BUCKET"));
        assert!(!is_config_key("secret_key"));
        assert!(!is_config_key("_PRIVATE"));
        assert!(!is_config_key("Debug"));
    }
}
