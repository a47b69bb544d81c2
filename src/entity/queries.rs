//! Raw SQL passed to `execute(...)`.

use tree_sitter::Node;

use super::syntax;
use super::{ExtractError, RawSqlEntity, SqlStatement};
use crate::source::SourceFile;

const EXECUTE_CALLS: &[&str] = &["execute", "exec_driver_sql", "executemany"];

/// Leading keywords that make a string literal a SQL statement.
const SQL_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "WITH",
];

pub(super) fn extract(file: &SourceFile, root: Node) -> Result<Vec<RawSqlEntity>, ExtractError> {
    let mut found = Vec::new();
    for call in syntax::descendants_of_kind(root, "call") {
        if !syntax::is_call_to(file, call, EXECUTE_CALLS) {
            continue;
        }
        let Some(mut statement) = syntax::positional_args(call).first().copied() else {
            continue;
        };

        let wrapped_in_text = syntax::is_call_to(file, statement, &["text"]);
        if wrapped_in_text {
            match syntax::positional_args(statement).first() {
                Some(inner) => statement = *inner,
                None => continue,
            }
        }

        let Some(statement) = sql_statement(file, statement) else {
            continue;
        };
        found.push(RawSqlEntity {
            file: file.path().to_string(),
            line: syntax::line(call),
            callee: syntax::callee(file, call).unwrap_or("execute").to_string(),
            statement,
            wrapped_in_text,
        });
    }
    Ok(found)
}

fn sql_statement(file: &SourceFile, node: Node) -> Option<SqlStatement> {
    if let Some(text) = syntax::string_literal(file, node) {
        return is_sql(&text).then_some(SqlStatement::Literal(text));
    }
    is_interpolated(file, node).then_some(SqlStatement::Interpolated)
}

fn is_sql(text: &str) -> bool {
    let first = text
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    SQL_KEYWORDS.contains(&first.as_str())
}

/// Strings assembled at run time around a literal SQL prefix.
fn is_interpolated(file: &SourceFile, node: Node) -> bool {
    match node.kind() {
        // f"SELECT ... {x}"
        "string" => syntax::named_children(node)
            .iter()
            .any(|n| n.kind() == "interpolation"),
        // "SELECT ... %s" % x, "SELECT " + x
        "binary_operator" => syntax::descendants_of_kind(node, "string").iter().any(|s| {
            syntax::named_children(*s)
                .iter()
                .filter(|n| n.kind() == "string_content")
                .any(|n| is_sql(file.node_text(*n)))
        }),
        // "SELECT ... {}".format(x)
        "call" => {
            let Some(function) = node.child_by_field_name("function") else {
                return false;
            };
            function.kind() == "attribute"
                && function
                    .child_by_field_name("attribute")
                    .map(|a| file.node_text(a) == "format")
                    .unwrap_or(false)
                && function
                    .child_by_field_name("object")
                    .and_then(|o| syntax::string_literal(file, o))
                    .map(|s| is_sql(&s))
                    .unwrap_or(false)
        }
        _ => false,
    }
}
