//! Review configuration.
//!
//! `ReviewConfig` is the user-facing, deserializable form read from
//! `.freview.toml` (`[freview]` table) or `freview.yaml`. It is compiled
//! once into an immutable [`Settings`] value that analyzers receive at
//! construction time.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::aggregate::SeverityPolicy;
use crate::rules::RuleId;

/// Config file names searched at the project root, in priority order.
pub const CONFIG_FILE_NAMES: &[&str] = &[".freview.toml", "freview.yaml", ".freview.yaml"];

/// HTTP verbs accepted in `default_route_methods`.
static HTTP_METHODS: phf::Set<&'static str> = phf::phf_set! {
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS",
};

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown check {0:?} in skip_checks")]
    UnknownCheck(String),

    #[error("invalid glob pattern {pattern:?} in {field}: {source}")]
    InvalidGlob {
        field: &'static str,
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid regex {pattern:?} in {field}: {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown HTTP method {0:?} in default_route_methods")]
    UnknownMethod(String),

    #[error("error_as_warning and warning_as_error cannot both be set")]
    ConflictingSeverityOverrides,

    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Top-level review configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub skip_structure: bool,
    pub skip_models: bool,
    pub skip_api: bool,
    pub skip_database: bool,
    /// Glob patterns (or plain directory names) selecting model files.
    pub model_dirs: Vec<String>,
    /// Directory names marking Alembic migration scripts.
    pub migration_dirs: Vec<String>,
    /// File suffixes (without dot) parsed as source.
    pub include_suffixes: Vec<String>,
    /// Glob patterns for source files to leave out.
    pub exclude_patterns: Vec<String>,
    /// Rule identifiers excluded from evaluation.
    pub skip_checks: BTreeSet<String>,
    pub class_name_pattern: String,
    pub table_name_pattern: String,
    /// Base class names (last dotted segment) marking a declarative model.
    pub model_base_markers: Vec<String>,
    /// Methods assumed for a route that does not list them explicitly.
    pub default_route_methods: Vec<String>,
    /// Substrings identifying an authentication decorator.
    pub auth_decorators: Vec<String>,
    /// Substrings identifying a credential-bearing configuration key.
    pub credential_markers: Vec<String>,
    /// Report model classes without a docstring.
    pub require_docstrings: bool,
    /// Downgrade every error to a warning.
    pub error_as_warning: bool,
    /// Upgrade every warning to an error.
    pub warning_as_error: bool,
    /// Findings kept per file, most severe first; 0 keeps everything.
    pub max_issues_per_file: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            skip_structure: false,
            skip_models: false,
            skip_api: false,
            skip_database: false,
            model_dirs: strings(&["models.py", "**/models.py", "**/models/**/*.py"]),
            migration_dirs: strings(&["migrations", "alembic"]),
            include_suffixes: strings(&["py"]),
            exclude_patterns: strings(&[
                "**/__pycache__/**",
                "**/venv/**",
                "**/site-packages/**",
                "**/test_*.py",
                "**/*_test.py",
                "**/conftest.py",
            ]),
            skip_checks: BTreeSet::new(),
            class_name_pattern: r"^[A-Z][A-Za-z0-9]*$".to_string(),
            table_name_pattern: r"^[a-z_]+$".to_string(),
            model_base_markers: strings(&["Model", "Base"]),
            default_route_methods: strings(&["GET"]),
            auth_decorators: strings(&[
                "login_required",
                "auth",
                "jwt_required",
                "token_required",
                "permission",
                "roles_required",
                "roles_accepted",
                "admin_required",
            ]),
            credential_markers: strings(&[
                "SECRET",
                "PASSWORD",
                "PASSWD",
                "TOKEN",
                "API_KEY",
                "PRIVATE_KEY",
                "CREDENTIAL",
            ]),
            require_docstrings: false,
            error_as_warning: false,
            warning_as_error: false,
            max_issues_per_file: 50,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Layout of `.freview.toml`.
#[derive(Debug, Deserialize)]
struct TomlFile {
    #[serde(default)]
    freview: ReviewConfig,
}

impl ReviewConfig {
    /// Parse a configuration file, choosing the format from its extension.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        } else {
            toml::from_str::<TomlFile>(&content)
                .map(|f| f.freview)
                .map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
        }
    }

    /// Find a config file at the project root.
    pub fn discover(project_root: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| project_root.join(name))
            .find(|p| p.is_file())
    }

    /// Load the project's config file, or defaults when there is none.
    pub fn load(project_root: &Path) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match Self::discover(project_root) {
            Some(path) => {
                let config = Self::parse_file(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Validate and compile into immutable settings.
    pub fn compile(&self) -> Result<Settings, ConfigError> {
        let mut skipped = BTreeSet::new();
        for id in &self.skip_checks {
            let rule = RuleId::parse(id).ok_or_else(|| ConfigError::UnknownCheck(id.clone()))?;
            skipped.insert(rule);
        }

        let model_patterns: Vec<String> = self
            .model_dirs
            .iter()
            .map(|p| expand_model_dir(p))
            .collect();
        let model_globs = build_globset("model_dirs", &model_patterns)?;
        let exclude_globs = build_globset("exclude_patterns", &self.exclude_patterns)?;

        let class_name_regex = compile_regex("class_name_pattern", &self.class_name_pattern)?;
        let table_name_regex = compile_regex("table_name_pattern", &self.table_name_pattern)?;

        if self.error_as_warning && self.warning_as_error {
            return Err(ConfigError::ConflictingSeverityOverrides);
        }

        let mut default_methods = BTreeSet::new();
        for m in &self.default_route_methods {
            let upper = m.to_uppercase();
            if !HTTP_METHODS.contains(upper.as_str()) {
                return Err(ConfigError::UnknownMethod(m.clone()));
            }
            default_methods.insert(upper);
        }

        Ok(Settings {
            config: self.clone(),
            skipped,
            model_globs,
            exclude_globs,
            class_name_regex,
            table_name_regex,
            default_methods,
            suffixes: self
                .include_suffixes
                .iter()
                .map(|s| s.trim_start_matches('.').to_string())
                .collect(),
            auth_decorators: self.auth_decorators.iter().map(|s| s.to_lowercase()).collect(),
            credential_markers: self
                .credential_markers
                .iter()
                .map(|s| s.to_uppercase())
                .collect(),
        })
    }
}

/// A bare directory name such as `app/models` selects every file beneath it.
fn expand_model_dir(pattern: &str) -> String {
    let has_meta = pattern.contains(['*', '?', '[', '{']);
    if has_meta || pattern.ends_with(".py") {
        pattern.to_string()
    } else {
        format!("{}/**/*.py", pattern.trim_end_matches('/'))
    }
}

fn build_globset(field: &'static str, patterns: &[String]) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ConfigError::InvalidGlob {
            field,
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ConfigError::InvalidGlob {
        field,
        pattern: patterns.join(", "),
        source,
    })
}

fn compile_regex(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// Validated, immutable settings shared by every analyzer.
#[derive(Debug, Clone)]
pub struct Settings {
    config: ReviewConfig,
    skipped: BTreeSet<RuleId>,
    model_globs: GlobSet,
    exclude_globs: GlobSet,
    class_name_regex: Regex,
    table_name_regex: Regex,
    default_methods: BTreeSet<String>,
    suffixes: Vec<String>,
    auth_decorators: Vec<String>,
    credential_markers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        // The built-in defaults always compile.
        ReviewConfig::default()
            .compile()
            .expect("default configuration must be valid")
    }
}

impl Settings {
    /// The configuration these settings were compiled from.
    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Whether a rule takes part in evaluation.
    pub fn is_enabled(&self, rule: RuleId) -> bool {
        !self.skipped.contains(&rule)
    }

    pub fn skipped(&self) -> &BTreeSet<RuleId> {
        &self.skipped
    }

    /// Severity overrides and the per-file cap applied to the final report.
    pub fn severity_policy(&self) -> SeverityPolicy {
        SeverityPolicy {
            error_as_warning: self.config.error_as_warning,
            warning_as_error: self.config.warning_as_error,
            max_issues_per_file: self.config.max_issues_per_file,
        }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    /// Check if a relative path is excluded from source parsing.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        self.exclude_globs.is_match(rel_path)
    }

    /// Check if a relative path is selected by `model_dirs`.
    pub fn is_model_file(&self, rel_path: &str) -> bool {
        self.model_globs.is_match(rel_path)
    }

    /// Check if a relative path is an Alembic revision script.
    pub fn is_migration_file(&self, rel_path: &str) -> bool {
        let mut parts: Vec<&str> = rel_path.split('/').collect();
        let Some(file_name) = parts.pop() else {
            return false;
        };
        if matches!(file_name, "env.py" | "__init__.py") {
            return false;
        }
        parts
            .iter()
            .any(|dir| self.config.migration_dirs.iter().any(|m| m == dir))
    }

    pub fn is_model_marker(&self, base: &str) -> bool {
        self.config.model_base_markers.iter().any(|m| m == base)
    }

    pub fn class_name_ok(&self, name: &str) -> bool {
        self.class_name_regex.is_match(name)
    }

    pub fn table_name_ok(&self, name: &str) -> bool {
        self.table_name_regex.is_match(name)
    }

    pub fn default_methods(&self) -> &BTreeSet<String> {
        &self.default_methods
    }

    /// Check if a decorator name looks like an authentication guard.
    pub fn is_auth_decorator(&self, decorator: &str) -> bool {
        let last = decorator.rsplit('.').next().unwrap_or(decorator);
        let last = last.trim_end_matches("(...)").to_lowercase();
        self.auth_decorators.iter().any(|p| last.contains(p.as_str()))
    }

    /// Check if a configuration key names a credential.
    pub fn is_credential_key(&self, key: &str) -> bool {
        let upper = key.to_uppercase();
        self.credential_markers
            .iter()
            .any(|m| upper.contains(m.as_str()))
    }
}

/// Default `.freview.toml` written by `freview init`.
pub fn default_config_file() -> String {
    let defaults = ReviewConfig::default();
    let list = |items: &[String]| {
        items
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        r#"# freview configuration

[freview]
# Analyzers to skip
skip_structure = false
skip_models = false
skip_api = false
skip_database = false

# Files scanned for models (globs or directory names, relative to the project root)
model_dirs = [{model_dirs}]

# Directory names holding Alembic revision scripts
migration_dirs = [{migration_dirs}]

# Source files left out of the analysis
exclude_patterns = [{exclude}]

# Rule identifiers to skip (run `freview rules` for the list)
skip_checks = []

# Naming conventions (regex)
class_name_pattern = {class:?}
table_name_pattern = {table:?}

# Methods assumed when a route does not list them
default_route_methods = [{methods}]

# Decorator substrings recognised as authentication guards
auth_decorators = [{auth}]

# Report model classes without a docstring
require_docstrings = false

# Severity overrides (at most one of the two)
error_as_warning = false
warning_as_error = false

# Findings kept per file, most severe first (0 = unlimited)
max_issues_per_file = {max_issues}
"#,
        model_dirs = list(&defaults.model_dirs),
        migration_dirs = list(&defaults.migration_dirs),
        exclude = list(&defaults.exclude_patterns),
        class = defaults.class_name_pattern,
        table = defaults.table_name_pattern,
        methods = list(&defaults.default_route_methods),
        auth = list(&defaults.auth_decorators),
        max_issues = defaults.max_issues_per_file,
    )
}

/// Write the default config file into a project. Refuses to overwrite.
pub fn create_default_config(project_root: &Path) -> anyhow::Result<PathBuf> {
    let path = project_root.join(CONFIG_FILE_NAMES[0]);
    if path.exists() {
        anyhow::bail!("file already exists: {}", path.display());
    }
    fs::write(&path, default_config_file())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_compile() {
        let settings = ReviewConfig::default().compile().unwrap();
        assert!(settings.is_enabled(RuleId::ModelMissingPrimaryKey));
        assert!(settings.default_methods().contains("GET"));
        assert_eq!(settings.default_methods().len(), 1);
    }

    #[test]
    fn test_unknown_skip_check_fails_fast() {
        let mut config = ReviewConfig::default();
        config.skip_checks.insert("repr_methods".to_string());
        let err = config.compile().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCheck(ref id) if id == "repr_methods"));
    }

    #[test]
    fn test_malformed_glob_fails_fast() {
        let config = ReviewConfig {
            model_dirs: vec!["models/[".to_string()],
            ..Default::default()
        };
        let err = config.compile().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGlob { field: "model_dirs", .. }));
    }

    #[test]
    fn test_invalid_regex_and_method() {
        let config = ReviewConfig {
            class_name_pattern: "([A-Z".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.compile().unwrap_err(),
            ConfigError::InvalidPattern { .. }
        ));

        let config = ReviewConfig {
            default_route_methods: vec!["FETCH".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            config.compile().unwrap_err(),
            ConfigError::UnknownMethod(_)
        ));
    }

    #[test]
    fn test_conflicting_severity_overrides() {
        let config = ReviewConfig {
            error_as_warning: true,
            warning_as_error: true,
            ..Default::default()
        };
        assert!(matches!(
            config.compile().unwrap_err(),
            ConfigError::ConflictingSeverityOverrides
        ));

        let config = ReviewConfig {
            warning_as_error: true,
            max_issues_per_file: 3,
            ..Default::default()
        };
        let policy = config.compile().unwrap().severity_policy();
        assert!(policy.warning_as_error);
        assert!(!policy.error_as_warning);
        assert_eq!(policy.max_issues_per_file, 3);
    }

    #[test]
    fn test_skip_checks_disable_rules() {
        let mut config = ReviewConfig::default();
        config.skip_checks.insert("model_missing_repr".to_string());
        let settings = config.compile().unwrap();
        assert!(!settings.is_enabled(RuleId::ModelMissingRepr));
        assert!(settings.is_enabled(RuleId::ModelMissingPrimaryKey));
    }

    #[test]
    fn test_model_file_matching() {
        let settings = Settings::default();
        assert!(settings.is_model_file("models.py"));
        assert!(settings.is_model_file("app/models.py"));
        assert!(settings.is_model_file("models/user.py"));
        assert!(settings.is_model_file("app/models/blog/post.py"));
        assert!(!settings.is_model_file("app/views.py"));
    }

    #[test]
    fn test_plain_directory_in_model_dirs() {
        let config = ReviewConfig {
            model_dirs: vec!["domain".to_string()],
            ..Default::default()
        };
        let settings = config.compile().unwrap();
        assert!(settings.is_model_file("domain/user.py"));
        assert!(!settings.is_model_file("models.py"));
    }

    #[test]
    fn test_migration_file_matching() {
        let settings = Settings::default();
        assert!(settings.is_migration_file("migrations/versions/abc_add_users.py"));
        assert!(settings.is_migration_file("alembic/versions/1.py"));
        assert!(!settings.is_migration_file("migrations/env.py"));
        assert!(!settings.is_migration_file("app/models.py"));
    }

    #[test]
    fn test_auth_and_credential_matching() {
        let settings = Settings::default();
        assert!(settings.is_auth_decorator("login_required"));
        assert!(settings.is_auth_decorator("flask_jwt_extended.jwt_required(...)"));
        assert!(!settings.is_auth_decorator("app.route(...)"));
        assert!(settings.is_credential_key("SECRET_KEY"));
        assert!(settings.is_credential_key("mail_password"));
        assert!(!settings.is_credential_key("DEBUG"));
    }

    #[test]
    fn test_parse_toml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".freview.toml");
        fs::write(
            &path,
            r#"
[freview]
skip_api = true
model_dirs = ["app/models"]
skip_checks = ["model_missing_repr"]
"#,
        )
        .unwrap();

        let config = ReviewConfig::parse_file(&path).unwrap();
        assert!(config.skip_api);
        assert_eq!(config.model_dirs, vec!["app/models".to_string()]);
        assert!(config.skip_checks.contains("model_missing_repr"));
        // Unspecified keys keep their defaults
        assert_eq!(config.default_route_methods, vec!["GET".to_string()]);
    }

    #[test]
    fn test_parse_yaml_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("freview.yaml");
        fs::write(&path, "skip_models: true\ndefault_route_methods: [GET, HEAD]\n").unwrap();

        let config = ReviewConfig::parse_file(&path).unwrap();
        assert!(config.skip_models);
        let settings = config.compile().unwrap();
        assert!(settings.default_methods().contains("HEAD"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let (config, path) = ReviewConfig::load(temp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config, ReviewConfig::default());
    }

    #[test]
    fn test_default_config_file_round_trips() {
        let temp = TempDir::new().unwrap();
        let path = create_default_config(temp.path()).unwrap();
        let config = ReviewConfig::parse_file(&path).unwrap();
        assert_eq!(config, ReviewConfig::default());
        assert!(config.compile().is_ok());
        assert!(create_default_config(temp.path()).is_err());
    }
}
