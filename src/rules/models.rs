//! Model rules: naming, completeness and relationship hygiene.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};

use super::{Finding, Hit, Rule, RuleContext, RuleId};
use crate::entity::{EntityInfo, ModelEntity};

pub fn rules() -> Vec<Rule<ModelEntity>> {
    vec![
        Rule::new(RuleId::ModelClassNaming, class_naming),
        Rule::new(RuleId::ModelMissingTableName, missing_table_name),
        Rule::new(RuleId::ModelTableNaming, table_naming),
        Rule::new(RuleId::ModelMissingPrimaryKey, missing_primary_key),
        Rule::new(RuleId::ModelNoColumns, no_columns),
        Rule::new(RuleId::ModelMissingRepr, missing_repr),
        Rule::new(RuleId::ModelMissingDocstring, missing_docstring),
    ]
}

fn class_naming(model: &ModelEntity, ctx: &RuleContext) -> Vec<Hit> {
    if ctx.settings.class_name_ok(&model.class_name) {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "model class '{}' does not match naming pattern {}",
        model.class_name,
        ctx.settings.config().class_name_pattern
    ))]
}

fn missing_table_name(model: &ModelEntity, _: &RuleContext) -> Vec<Hit> {
    if model.table_name.is_some() || model.declares_table || model.is_abstract {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "model '{}' declares no __tablename__",
        model.class_name
    ))]
}

fn table_naming(model: &ModelEntity, ctx: &RuleContext) -> Vec<Hit> {
    let Some(table) = &model.table_name else {
        return Vec::new();
    };
    if ctx.settings.table_name_ok(table) {
        return Vec::new();
    }
    let message = format!(
        "table name '{}' does not match naming pattern {}",
        table,
        ctx.settings.config().table_name_pattern
    );
    match model.table_name_line {
        Some(line) => vec![Hit::at(line, message)],
        None => vec![Hit::new(message)],
    }
}

fn missing_primary_key(model: &ModelEntity, _: &RuleContext) -> Vec<Hit> {
    // Abstract bases and models mapped onto an explicit __table__ carry no columns of their own
    if model.is_abstract || (model.declares_table && model.columns.is_empty()) {
        return Vec::new();
    }
    if model.has_primary_key() {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "model '{}' has no primary key column",
        model.class_name
    ))]
}

fn no_columns(model: &ModelEntity, _: &RuleContext) -> Vec<Hit> {
    if !model.columns.is_empty() || model.declares_table {
        return Vec::new();
    }
    vec![Hit::new(format!("model '{}' defines no columns", model.class_name))]
}

fn missing_repr(model: &ModelEntity, _: &RuleContext) -> Vec<Hit> {
    if model.is_abstract {
        return Vec::new();
    }
    let has_repr = model.declared_dunders.contains("__repr__")
        || model.declared_dunders.contains("__str__");
    if has_repr {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "model '{}' defines neither __repr__ nor __str__",
        model.class_name
    ))]
}

/// Only reported when `require_docstrings` is set.
fn missing_docstring(model: &ModelEntity, ctx: &RuleContext) -> Vec<Hit> {
    if !ctx.settings.config().require_docstrings || model.has_docstring {
        return Vec::new();
    }
    vec![Hit::new(format!("model '{}' has no docstring", model.class_name))]
}

/// Concrete models that neither declare a relationship nor are the target
/// of one. Projects without any relationship are not reported.
pub fn unused_models(models: &[ModelEntity]) -> Vec<Finding> {
    let declaring: BTreeSet<&str> = models
        .iter()
        .filter(|m| !m.relationships.is_empty())
        .map(|m| m.class_name.as_str())
        .collect();
    if declaring.is_empty() {
        return Vec::new();
    }
    let targeted: BTreeSet<&str> = models
        .iter()
        .flat_map(|m| m.relationships.iter().map(|r| r.target_class()))
        .collect();

    models
        .iter()
        .filter(|m| !m.is_abstract)
        .filter(|m| {
            let name = m.class_name.as_str();
            !declaring.contains(name) && !targeted.contains(name)
        })
        .map(|m| {
            Finding::new(
                RuleId::ModelUnused,
                m.file(),
                m.line(),
                m.name(),
                format!("model '{}' is not referenced in any relationship", m.class_name),
            )
        })
        .collect()
}

/// Relationships whose target class is not among the extracted models.
pub fn dangling_relationships(models: &[ModelEntity]) -> Vec<Finding> {
    let known: BTreeSet<&str> = models.iter().map(|m| m.class_name.as_str()).collect();

    let mut findings = Vec::new();
    for model in models {
        for rel in &model.relationships {
            if known.contains(rel.target_class()) {
                continue;
            }
            findings.push(Finding::new(
                RuleId::ModelDanglingRelationship,
                model.file(),
                rel.line,
                model.name(),
                format!(
                    "relationship '{}.{}' targets unknown model '{}'",
                    model.class_name, rel.name, rel.target
                ),
            ));
        }
    }
    findings
}

/// Cycles across relationship edges, one finding per strongly connected
/// component. Edges with a declared back reference and self references
/// are the ordinary shape of bidirectional and tree models and are left out.
pub fn relationship_cycles(models: &[ModelEntity]) -> Vec<Finding> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut node_map: HashMap<&str, NodeIndex> = HashMap::new();

    for (i, model) in models.iter().enumerate() {
        // First definition wins for duplicate class names
        node_map
            .entry(model.class_name.as_str())
            .or_insert_with(|| graph.add_node(i));
    }

    for model in models {
        let Some(&src) = node_map.get(model.class_name.as_str()) else {
            continue;
        };
        for rel in &model.relationships {
            if rel.back_reference.is_some() {
                continue;
            }
            if let Some(&dst) = node_map.get(rel.target_class()) {
                if dst != src {
                    graph.add_edge(src, dst, ());
                }
            }
        }
    }

    let mut findings: Vec<Finding> = petgraph::algo::tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1)
        .map(|scc| {
            let mut members: Vec<&ModelEntity> = scc.iter().map(|idx| &models[graph[*idx]]).collect();
            members.sort_by(|a, b| a.class_name.cmp(&b.class_name));
            let anchor = members[0];
            let names: Vec<&str> = members.iter().map(|m| m.class_name.as_str()).collect();
            Finding::new(
                RuleId::ModelRelationshipCycle,
                anchor.file(),
                anchor.line(),
                anchor.name(),
                format!("relationship cycle between models: {}", names.join(", ")),
            )
        })
        .collect();
    findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    findings
}

/// Models sharing a table name; the first definition in path order is kept
/// and every later one is reported.
pub fn duplicate_tables(models: &[ModelEntity]) -> Vec<Finding> {
    let mut by_table: BTreeMap<&str, Vec<&ModelEntity>> = BTreeMap::new();
    for model in models.iter().filter(|m| !m.is_abstract) {
        if let Some(table) = &model.table_name {
            by_table.entry(table.as_str()).or_default().push(model);
        }
    }

    let mut findings = Vec::new();
    for (table, mut owners) in by_table {
        if owners.len() < 2 {
            continue;
        }
        owners.sort_by(|a, b| (a.file.as_str(), a.line).cmp(&(b.file.as_str(), b.line)));
        let first = owners[0];
        for dup in &owners[1..] {
            findings.push(Finding::new(
                RuleId::ModelDuplicateTable,
                dup.file(),
                dup.table_name_line.unwrap_or(dup.line),
                dup.name(),
                format!(
                    "table '{}' is already mapped by '{}' ({}:{})",
                    table, first.class_name, first.file, first.line
                ),
            ));
        }
    }
    findings
}

/// Run the cross-model rules that are enabled.
pub fn cross_model(models: &[ModelEntity], ctx: &RuleContext) -> Vec<Finding> {
    let mut findings = Vec::new();
    if ctx.enabled(RuleId::ModelDanglingRelationship) {
        findings.extend(dangling_relationships(models));
    }
    if ctx.enabled(RuleId::ModelRelationshipCycle) {
        findings.extend(relationship_cycles(models));
    }
    if ctx.enabled(RuleId::ModelDuplicateTable) {
        findings.extend(duplicate_tables(models));
    }
    if ctx.enabled(RuleId::ModelUnused) {
        findings.extend(unused_models(models));
    }
    findings
}
