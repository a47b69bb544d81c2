//! Python parsing using tree-sitter.

use std::fmt;

use tree_sitter::{Language, Node, Parser, Tree};

/// Description of why a file could not be turned into a usable tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    /// 1-based line of the first syntax problem (0 when unknown).
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

pub fn language() -> Language {
    tree_sitter_python::LANGUAGE.into()
}

fn create_parser() -> Result<Parser, ParseFailure> {
    let mut parser = Parser::new();
    parser.set_language(&language()).map_err(|e| ParseFailure {
        line: 0,
        message: format!("grammar unavailable: {}", e),
    })?;
    Ok(parser)
}

/// Parse Python source. A tree containing ERROR or MISSING nodes is
/// rejected so that extraction only ever sees well-formed syntax.
pub fn parse(source: &str) -> Result<Tree, ParseFailure> {
    let mut parser = create_parser()?;
    let tree = parser.parse(source, None).ok_or_else(|| ParseFailure {
        line: 0,
        message: "parser produced no tree".to_string(),
    })?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(describe_error(root, source));
    }
    Ok(tree)
}

fn describe_error(root: Node, source: &str) -> ParseFailure {
    match first_error(root) {
        Some(node) if node.is_missing() => ParseFailure {
            line: node.start_position().row + 1,
            message: format!("syntax error: missing `{}`", node.kind()),
        },
        Some(node) => {
            let text = node.utf8_text(source.as_bytes()).unwrap_or("");
            let snippet: String = text.lines().next().unwrap_or("").chars().take(40).collect();
            let message = if snippet.trim().is_empty() {
                "syntax error".to_string()
            } else {
                format!("syntax error near `{}`", snippet.trim())
            };
            ParseFailure {
                line: node.start_position().row + 1,
                message,
            }
        }
        None => ParseFailure {
            line: 1,
            message: "syntax error".to_string(),
        },
    }
}

/// Depth-first search for the first ERROR or MISSING node. Subtrees
/// without errors are skipped.
fn first_error(root: Node) -> Option<Node> {
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        if node.has_error() && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node() == root {
                return None;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_source() {
        let tree = parse("class User(db.Model):\n    id = db.Column(db.Integer)\n").unwrap();
        assert_eq!(tree.root_node().kind(), "module");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse("x = 1\n\ndef broken(:\n    pass\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.starts_with("syntax error"));
    }

    #[test]
    fn test_deep_expression_parses() {
        let mut source = String::from("total = 1");
        for _ in 0..20_000 {
            source.push_str(" + 1");
        }
        source.push('\n');
        assert!(parse(&source).is_ok());

        source.push_str("def broken(:\n    pass\n");
        let err = parse(&source).unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_display_includes_line() {
        let failure = ParseFailure {
            line: 7,
            message: "syntax error".to_string(),
        };
        assert_eq!(failure.to_string(), "line 7: syntax error");
    }
}
