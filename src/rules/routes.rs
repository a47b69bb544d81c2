//! Route and blueprint rules.

use std::collections::BTreeMap;

use super::{Finding, Hit, Rule, RuleContext, RuleId};
use crate::entity::syntax::last_segment;
use crate::entity::{BlueprintEntity, BlueprintRegistration, EntityInfo, RouteEntity};

pub fn rules() -> Vec<Rule<RouteEntity>> {
    vec![
        Rule::new(RuleId::RouteUnguardedMutation, unguarded_mutation),
        Rule::new(RuleId::RouteSensitiveUnauthenticated, sensitive_unauthenticated),
        Rule::new(RuleId::RouteMissingDocstring, missing_docstring),
        Rule::new(RuleId::RouteMissingValidation, missing_validation),
        Rule::new(RuleId::RouteMissingErrorHandling, missing_error_handling),
    ]
}

/// Path or handler fragments marking an operation that needs a logged-in user.
const SENSITIVE_FRAGMENTS: &[&str] = &[
    "delete", "remove", "admin", "user", "password", "create", "update", "edit", "modify",
];

/// Fragments of routes that must stay reachable without logging in.
const PUBLIC_FRAGMENTS: &[&str] = &["login", "logout", "auth", "register", "signup"];

fn describe(route: &RouteEntity) -> String {
    let methods: Vec<&str> = route.http_methods.iter().map(|m| m.as_str()).collect();
    format!("{} {}", methods.join("|"), route.path_pattern)
}

fn unguarded_mutation(route: &RouteEntity, ctx: &RuleContext) -> Vec<Hit> {
    if !route.is_mutating() || is_guarded(route, ctx) {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "{} modifies data but '{}' has no authentication decorator",
        describe(route),
        route.handler_name
    ))]
}

fn is_guarded(route: &RouteEntity, ctx: &RuleContext) -> bool {
    route
        .decorators
        .iter()
        .any(|d| ctx.settings.is_auth_decorator(d))
}

/// Read-only routes whose path or handler name suggests account or admin
/// operations. Mutating routes are covered by `unguarded_mutation`.
fn sensitive_unauthenticated(route: &RouteEntity, ctx: &RuleContext) -> Vec<Hit> {
    if route.is_mutating() || is_guarded(route, ctx) {
        return Vec::new();
    }
    let path = route.path_pattern.to_lowercase();
    let handler = route.handler_name.to_lowercase();
    let mentions = |fragments: &[&'static str]| {
        fragments
            .iter()
            .find(|f| path.contains(*f) || handler.contains(*f))
            .copied()
    };
    if mentions(PUBLIC_FRAGMENTS).is_some() {
        return Vec::new();
    }
    let Some(fragment) = mentions(SENSITIVE_FRAGMENTS) else {
        return Vec::new();
    };
    vec![Hit::new(format!(
        "{} looks sensitive ('{}') but '{}' has no authentication decorator",
        describe(route),
        fragment,
        route.handler_name
    ))]
}

fn missing_error_handling(route: &RouteEntity, _: &RuleContext) -> Vec<Hit> {
    if !route.is_mutating() || route.has_error_handling {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "{} modifies data but '{}' has no try/except around its work",
        describe(route),
        route.handler_name
    ))]
}

fn missing_docstring(route: &RouteEntity, _: &RuleContext) -> Vec<Hit> {
    if route.has_docstring {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "handler '{}' for {} has no docstring",
        route.handler_name,
        describe(route)
    ))]
}

fn missing_validation(route: &RouteEntity, _: &RuleContext) -> Vec<Hit> {
    if !route.accepts_body() || route.has_input_validation {
        return Vec::new();
    }
    vec![Hit::new(format!(
        "{} accepts a request body but '{}' performs no input validation",
        describe(route),
        route.handler_name
    ))]
}

/// Where a route is mounted: the blueprint (or application) it belongs to
/// and its full URL.
struct Mount<'a> {
    /// Blueprint name, `file:variable` for an unnamed blueprint, or the
    /// registrar for application routes.
    owner: String,
    label: &'a str,
    path: String,
}

fn directory(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// The `Blueprint(...)` a route's registrar names. A definition in the
/// same file wins, then the same package, then the closest enclosing
/// package, then a project-wide unique variable name.
fn resolve_blueprint<'b>(
    route: &RouteEntity,
    blueprints: &'b [BlueprintEntity],
) -> Option<&'b BlueprintEntity> {
    let variable = last_segment(&route.registrar);
    let candidates: Vec<&BlueprintEntity> =
        blueprints.iter().filter(|bp| bp.variable == variable).collect();

    if let Some(bp) = candidates.iter().find(|bp| bp.file == route.file) {
        return Some(*bp);
    }
    let route_dir = directory(&route.file);
    if let Some(bp) = candidates.iter().find(|bp| directory(&bp.file) == route_dir) {
        return Some(*bp);
    }
    let enclosing = candidates
        .iter()
        .filter(|bp| {
            let dir = directory(&bp.file);
            dir.is_empty() || route_dir.starts_with(&format!("{}/", dir))
        })
        .max_by_key(|bp| directory(&bp.file).len());
    if let Some(bp) = enclosing {
        return Some(*bp);
    }
    match candidates.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn join_url(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", prefix, path)
    } else {
        format!("{}/{}", prefix, path)
    }
}

fn mount<'a>(
    route: &'a RouteEntity,
    blueprints: &[BlueprintEntity],
    registrations: &[BlueprintRegistration],
) -> Mount<'a> {
    if route.blueprint_name.is_none() {
        return Mount {
            owner: route.registrar.clone(),
            label: &route.registrar,
            path: route.path_pattern.clone(),
        };
    }
    let Some(bp) = resolve_blueprint(route, blueprints) else {
        // Unknown blueprint: only routes of the same file can collide.
        return Mount {
            owner: format!("{}:{}", route.file, route.registrar),
            label: &route.registrar,
            path: route.path_pattern.clone(),
        };
    };

    let registered_prefix = registrations
        .iter()
        .find(|r| r.url_prefix.is_some() && last_segment(&r.blueprint) == bp.variable)
        .and_then(|r| r.url_prefix.as_deref());
    let path = match registered_prefix.or(bp.url_prefix.as_deref()) {
        Some(prefix) => join_url(prefix, &route.path_pattern),
        None => route.path_pattern.clone(),
    };
    Mount {
        owner: bp
            .blueprint_name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", bp.file, bp.variable)),
        label: &route.registrar,
        path,
    }
}

/// Same method and URL registered more than once on one blueprint or on
/// the application. Registrars are resolved to their `Blueprint(...)`, so
/// two blueprints that share a variable name stay apart. The first
/// registration in path order is kept; each later one is reported.
pub fn duplicate_routes(
    routes: &[RouteEntity],
    blueprints: &[BlueprintEntity],
    registrations: &[BlueprintRegistration],
) -> Vec<Finding> {
    let mut ordered: Vec<&RouteEntity> = routes.iter().collect();
    ordered.sort_by(|a, b| (a.file.as_str(), a.line).cmp(&(b.file.as_str(), b.line)));

    let mut seen: BTreeMap<(String, String, &str), &RouteEntity> = BTreeMap::new();
    let mut findings = Vec::new();

    for route in ordered {
        let mount = mount(route, blueprints, registrations);
        for method in &route.http_methods {
            let key = (mount.owner.clone(), mount.path.clone(), method.as_str());
            match seen.get(&key) {
                Some(first) => findings.push(Finding::new(
                    RuleId::RouteDuplicate,
                    route.file(),
                    route.line(),
                    route.name(),
                    format!(
                        "{} {} on '{}' is already handled by '{}' ({}:{})",
                        method,
                        mount.path,
                        mount.label,
                        first.handler_name,
                        first.file,
                        first.line
                    ),
                )),
                None => {
                    seen.insert(key, route);
                }
            }
        }
    }
    findings
}

/// Several routes and not a single blueprint.
pub fn blueprint_suggested(routes: &[RouteEntity], blueprints: &[BlueprintEntity]) -> Vec<Finding> {
    if routes.len() <= 1 || !blueprints.is_empty() {
        return Vec::new();
    }
    vec![Finding::project(
        RuleId::RouteBlueprintSuggested,
        "routes",
        format!(
            "{} routes are registered without any blueprint; group related routes into blueprints",
            routes.len()
        ),
    )]
}

/// Blueprints created without a `url_prefix` and registered without one.
pub fn blueprints_without_prefix(
    blueprints: &[BlueprintEntity],
    registrations: &[BlueprintRegistration],
) -> Vec<Finding> {
    blueprints
        .iter()
        .filter(|bp| bp.url_prefix.is_none())
        .filter(|bp| {
            !registrations.iter().any(|r| {
                r.url_prefix.is_some() && last_segment(&r.blueprint) == bp.variable
            })
        })
        .map(|bp| {
            Finding::new(
                RuleId::BlueprintMissingUrlPrefix,
                bp.file(),
                bp.line(),
                bp.name(),
                format!(
                    "blueprint '{}' has no url_prefix",
                    bp.blueprint_name.as_deref().unwrap_or(&bp.variable)
                ),
            )
        })
        .collect()
}

/// Run the cross-route rules that are enabled.
pub fn cross_route(
    routes: &[RouteEntity],
    blueprints: &[BlueprintEntity],
    registrations: &[BlueprintRegistration],
    ctx: &RuleContext,
) -> Vec<Finding> {
    let mut findings = Vec::new();
    if ctx.enabled(RuleId::RouteDuplicate) {
        findings.extend(duplicate_routes(routes, blueprints, registrations));
    }
    if ctx.enabled(RuleId::RouteBlueprintSuggested) {
        findings.extend(blueprint_suggested(routes, blueprints));
    }
    if ctx.enabled(RuleId::BlueprintMissingUrlPrefix) {
        findings.extend(blueprints_without_prefix(blueprints, registrations));
    }
    findings
}
