//! Project layout rules.

use super::{Hit, Rule, RuleContext, RuleId};
use crate::entity::{ProjectLayout, ENTRY_FILES};

pub fn rules() -> Vec<Rule<ProjectLayout>> {
    vec![
        Rule::new(RuleId::MissingEntryFile, missing_entry_file),
        Rule::new(RuleId::MissingModelsDir, missing_models_dir),
        Rule::new(RuleId::MissingModelsInit, missing_models_init),
        Rule::new(RuleId::MissingTemplatesDir, missing_templates_dir),
        Rule::new(RuleId::MissingStaticDir, missing_static_dir),
        Rule::new(RuleId::MissingConfigFile, missing_config_file),
    ]
}

fn missing_entry_file(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    if !layout.entry_files.is_empty() {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "no application entry point found; expected one of {}",
        ENTRY_FILES.join(", ")
    ))]
}

fn missing_models_dir(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    if layout.models_module.is_some() {
        return Vec::new();
    }
    vec![Hit::new(
        "no models/ package or models.py module at the project root or in app/",
    )]
}

fn missing_models_init(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    layout
        .models_dirs_without_init
        .iter()
        .map(|dir| Hit::new(format!("{}/ has no __init__.py and is not importable as a package", dir)))
        .collect()
}

fn missing_templates_dir(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    if layout.has_templates {
        return Vec::new();
    }
    vec![Hit::new("no templates/ directory")]
}

fn missing_static_dir(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    if layout.has_static {
        return Vec::new();
    }
    vec![Hit::new("no static/ directory")]
}

fn missing_config_file(layout: &ProjectLayout, _: &RuleContext) -> Vec<Hit> {
    if !layout.config_files.is_empty() {
        return Vec::new();
    }
    vec![Hit::new(
        "no configuration file found; add a .env or config.py",
    )]
}
