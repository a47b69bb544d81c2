//! Declarative rule sets.
//!
//! A [`Rule`] is a pure function over one entity kind. A [`RuleSet`] holds
//! the enabled rules for that kind in registration order and turns their
//! hits into [`Finding`]s.

pub mod database;
pub mod models;
pub mod routes;
pub mod structure;
mod types;

use std::panic::{self, AssertUnwindSafe};

use crate::config::Settings;
use crate::entity::EntityInfo;

pub use types::{Finding, RuleId, RuleInfo, Severity, SeverityCounts, PROJECT_SCOPE};

/// Read-only inputs available to every rule.
#[derive(Clone, Copy)]
pub struct RuleContext<'a> {
    pub settings: &'a Settings,
}

impl<'a> RuleContext<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    pub fn enabled(&self, rule: RuleId) -> bool {
        self.settings.is_enabled(rule)
    }
}

/// One firing of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    /// Line override; defaults to the entity's own line.
    pub line: Option<usize>,
    pub message: String,
}

impl Hit {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    pub fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

pub type Check<E> = fn(&E, &RuleContext) -> Vec<Hit>;

/// A named check bound to one entity kind.
pub struct Rule<E> {
    pub id: RuleId,
    pub check: Check<E>,
}

impl<E> Rule<E> {
    pub const fn new(id: RuleId, check: Check<E>) -> Self {
        Self { id, check }
    }
}

impl<E> Clone for Rule<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            check: self.check,
        }
    }
}

/// Enabled rules for one entity kind.
pub struct RuleSet<E> {
    rules: Vec<Rule<E>>,
}

impl<E: EntityInfo> RuleSet<E> {
    /// Keep the rules not skipped by the settings, in the given order.
    pub fn new(rules: Vec<Rule<E>>, settings: &Settings) -> Self {
        Self {
            rules: rules
                .into_iter()
                .filter(|r| settings.is_enabled(r.id))
                .collect(),
        }
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.iter().map(|r| r.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule to `entity`. A rule that panics is reported as a
    /// `rule_error` finding and evaluation moves on to the next rule.
    pub fn evaluate(&self, entity: &E, ctx: &RuleContext) -> Vec<Finding> {
        let mut findings = Vec::new();
        for rule in &self.rules {
            match panic::catch_unwind(AssertUnwindSafe(|| (rule.check)(entity, ctx))) {
                Ok(hits) => findings.extend(hits.into_iter().map(|hit| {
                    Finding::new(
                        rule.id,
                        entity.file(),
                        hit.line.unwrap_or_else(|| entity.line()),
                        entity.name(),
                        hit.message,
                    )
                })),
                Err(_) => {
                    tracing::warn!(rule = %rule.id, entity = entity.name(), file = entity.file(), "rule panicked");
                    findings.push(Finding::new(
                        RuleId::RuleError,
                        entity.file(),
                        entity.line(),
                        entity.name(),
                        format!("rule {} failed while checking {}", rule.id, entity.name()),
                    ));
                }
            }
        }
        findings
    }

    pub fn evaluate_all<'e>(
        &self,
        entities: impl IntoIterator<Item = &'e E>,
        ctx: &RuleContext,
    ) -> Vec<Finding>
    where
        E: 'e,
    {
        entities
            .into_iter()
            .flat_map(|e| self.evaluate(e, ctx))
            .collect()
    }
}

/// Every rule's metadata, for `freview rules`.
pub fn catalog() -> Vec<(RuleId, RuleInfo)> {
    RuleId::ALL.iter().map(|id| (*id, id.info())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Thing {
        name: String,
    }

    impl EntityInfo for Thing {
        fn file(&self) -> &str {
            "thing.py"
        }
        fn line(&self) -> usize {
            4
        }
        fn name(&self) -> &str {
            &self.name
        }
    }

    fn always(_: &Thing, _: &RuleContext) -> Vec<Hit> {
        vec![Hit::new("always"), Hit::at(9, "elsewhere")]
    }

    fn explodes(_: &Thing, _: &RuleContext) -> Vec<Hit> {
        panic!("boom")
    }

    fn never(_: &Thing, _: &RuleContext) -> Vec<Hit> {
        Vec::new()
    }

    #[test]
    fn test_hits_become_findings() {
        let settings = Settings::default();
        let set = RuleSet::new(vec![Rule::new(RuleId::ModelNoColumns, always)], &settings);
        let thing = Thing { name: "T".into() };

        let findings = set.evaluate(&thing, &RuleContext::new(&settings));
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].line, 4);
        assert_eq!(findings[1].line, 9);
        assert_eq!(findings[0].entity, "T");
        assert_eq!(findings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_panicking_rule_is_isolated() {
        let settings = Settings::default();
        let set = RuleSet::new(
            vec![
                Rule::new(RuleId::ModelMissingRepr, explodes),
                Rule::new(RuleId::ModelNoColumns, always),
            ],
            &settings,
        );
        let thing = Thing { name: "T".into() };

        let findings = set.evaluate(&thing, &RuleContext::new(&settings));
        assert_eq!(findings[0].rule, RuleId::RuleError);
        assert!(findings[0].message.contains("model_missing_repr"));
        assert_eq!(findings.len(), 3);
    }

    #[test]
    fn test_skipped_rules_are_not_registered() {
        let mut config = crate::config::ReviewConfig::default();
        config.skip_checks.insert("model_no_columns".to_string());
        let settings = config.compile().unwrap();

        let set = RuleSet::new(
            vec![
                Rule::new(RuleId::ModelNoColumns, always),
                Rule::new(RuleId::ModelMissingRepr, never),
            ],
            &settings,
        );
        assert_eq!(set.ids(), vec![RuleId::ModelMissingRepr]);
    }

    #[test]
    fn test_catalog_lists_every_rule() {
        assert_eq!(catalog().len(), RuleId::ALL.len());
    }
}
