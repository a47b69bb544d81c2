//! Alembic revision script extraction.

use tree_sitter::Node;

use super::syntax;
use super::{ExtractError, MigrationEntity, MigrationOperation, MigrationPhase};
use crate::source::SourceFile;

/// Objects whose method calls are migration operations.
const OPERATION_OBJECTS: &[&str] = &["op", "batch_op"];

pub(super) fn extract(file: &SourceFile, root: Node) -> Result<MigrationEntity, ExtractError> {
    let mut migration = MigrationEntity {
        file: file.path().to_string(),
        line: 1,
        name: file.stem().to_string(),
        revision: None,
        down_revisions: Vec::new(),
        has_upgrade: false,
        has_downgrade: false,
        operations: Vec::new(),
    };

    for stmt in syntax::named_children(root) {
        if let Some(assign) = syntax::as_assignment(stmt) {
            if assign.left.kind() == "identifier" {
                match file.node_text(assign.left) {
                    "revision" => {
                        if let Some(rev) = assign.right.and_then(|r| syntax::string_literal(file, r))
                        {
                            migration.line = syntax::line(assign.node);
                            migration.name = rev.clone();
                            migration.revision = Some(rev);
                        }
                    }
                    "down_revision" => {
                        migration.down_revisions = assign
                            .right
                            .filter(|r| !syntax::is_none(*r))
                            .and_then(|r| syntax::string_list(file, r))
                            .unwrap_or_default();
                    }
                    _ => {}
                }
            }
            collect_operations(file, stmt, MigrationPhase::Module, &mut migration.operations);
            continue;
        }

        let phase = match syntax::unwrap_decorated(stmt) {
            Some((_, definition)) if definition.kind() == "function_definition" => {
                match syntax::definition_name(file, definition) {
                    "upgrade" => {
                        migration.has_upgrade = true;
                        MigrationPhase::Upgrade
                    }
                    "downgrade" => {
                        migration.has_downgrade = true;
                        MigrationPhase::Downgrade
                    }
                    _ => MigrationPhase::Module,
                }
            }
            _ => MigrationPhase::Module,
        };
        collect_operations(file, stmt, phase, &mut migration.operations);
    }

    Ok(migration)
}

fn collect_operations(
    file: &SourceFile,
    node: Node,
    phase: MigrationPhase,
    out: &mut Vec<MigrationOperation>,
) {
    for call in syntax::descendants_of_kind(node, "call") {
        let Some(function) = call.child_by_field_name("function") else {
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
        if !OPERATION_OBJECTS.contains(&file.node_text(object)) {
            continue;
        }
        out.push(operation(file, call, file.node_text(attribute), phase));
    }
}

fn operation(file: &SourceFile, call: Node, name: &str, phase: MigrationPhase) -> MigrationOperation {
    let mut arguments = Vec::new();
    let mut nullable_false = false;
    let mut has_default = false;

    let mut inspect_keywords = |target: Node| {
        for (key, value) in syntax::keyword_args(file, target) {
            match key.as_str() {
                "nullable" if syntax::is_false(value) => nullable_false = true,
                "server_default" | "default" if !syntax::is_none(value) => has_default = true,
                _ => {}
            }
        }
    };
    inspect_keywords(call);

    for arg in syntax::positional_args(call) {
        if let Some(s) = syntax::string_literal(file, arg) {
            arguments.push(s);
        } else if syntax::is_call_to(file, arg, &["Column"]) {
            // op.add_column("users", sa.Column("email", sa.String(), nullable=False))
            arguments.extend(
                syntax::positional_args(arg)
                    .into_iter()
                    .filter_map(|n| syntax::string_literal(file, n)),
            );
            let is_primary_key = syntax::keyword_arg(file, arg, "primary_key")
                .map(syntax::is_true)
                .unwrap_or(false);
            if !is_primary_key {
                inspect_keywords(arg);
            }
        }
    }

    MigrationOperation {
        name: name.to_string(),
        phase,
        arguments,
        nullable_false,
        has_default,
        line: syntax::line(call),
    }
}
