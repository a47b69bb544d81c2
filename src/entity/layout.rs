//! Project layout snapshot for structure rules.

use super::EntityInfo;
use crate::rules::PROJECT_SCOPE;
use crate::source::SourceIndex;

/// Recognised application entry points.
pub const ENTRY_FILES: &[&str] = &["run.py", "main.py", "app.py", "wsgi.py", "app/__init__.py"];

/// Directories that may hold the application package.
const PACKAGE_ROOTS: &[&str] = &["", "app"];

/// Facts about a project's file layout, computed from the index inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    pub name: String,
    pub entry_files: Vec<String>,
    pub models_module: Option<String>,
    /// `models/` directories lacking an `__init__.py`.
    pub models_dirs_without_init: Vec<String>,
    pub has_templates: bool,
    pub has_static: bool,
    pub config_files: Vec<String>,
}

fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

impl ProjectLayout {
    pub fn from_index(index: &SourceIndex) -> Self {
        let name = index
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());

        let entry_files = ENTRY_FILES
            .iter()
            .filter(|f| index.has_file(f))
            .map(|f| f.to_string())
            .collect();

        let mut models_module = None;
        let mut models_dirs_without_init = Vec::new();
        for root in PACKAGE_ROOTS {
            let dir = join(root, "models");
            if index.has_dir(&dir) {
                if !index.has_file(&join(&dir, "__init__.py")) {
                    models_dirs_without_init.push(dir.clone());
                }
                models_module.get_or_insert(dir);
            }
            let module = join(root, "models.py");
            if index.has_file(&module) {
                models_module.get_or_insert(module);
            }
        }

        let has_dir_anywhere = |name: &str| {
            PACKAGE_ROOTS
                .iter()
                .any(|root| index.has_dir(&join(root, name)))
        };

        let config_files = PACKAGE_ROOTS
            .iter()
            .flat_map(|root| [join(root, ".env"), join(root, "config.py")])
            .filter(|f| index.has_file(f))
            .collect();

        Self {
            name,
            entry_files,
            models_module,
            models_dirs_without_init,
            has_templates: has_dir_anywhere("templates"),
            has_static: has_dir_anywhere("static"),
            config_files,
        }
    }
}

/// One Alembic environment directory and the files it is expected to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationEnvironment {
    pub dir: String,
    pub has_versions: bool,
    pub has_env: bool,
    /// `alembic.ini` inside the directory or in its parent.
    pub has_alembic_ini: bool,
}

fn parent_dir(dir: &str) -> &str {
    dir.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Outermost directories named like a migrations root, in path order.
pub fn migration_environments(index: &SourceIndex, names: &[String]) -> Vec<MigrationEnvironment> {
    let is_root = |dir: &str| {
        let last = dir.rsplit('/').next().unwrap_or(dir);
        names.iter().any(|n| n == last)
    };

    let mut roots: Vec<&str> = Vec::new();
    for dir in index.directories() {
        let nested = roots
            .iter()
            .any(|root| dir.starts_with(root) && dir[root.len()..].starts_with('/'));
        if !nested && is_root(dir) {
            roots.push(dir);
        }
    }

    roots
        .into_iter()
        .map(|dir| MigrationEnvironment {
            dir: dir.to_string(),
            has_versions: index.has_dir(&join(dir, "versions")),
            has_env: index.has_file(&join(dir, "env.py")),
            has_alembic_ini: index.has_file(&join(dir, "alembic.ini"))
                || index.has_file(&join(parent_dir(dir), "alembic.ini")),
        })
        .collect()
}

impl EntityInfo for MigrationEnvironment {
    fn file(&self) -> &str {
        &self.dir
    }
    fn line(&self) -> usize {
        0
    }
    fn name(&self) -> &str {
        &self.dir
    }
}

impl EntityInfo for ProjectLayout {
    fn file(&self) -> &str {
        PROJECT_SCOPE
    }
    fn line(&self) -> usize {
        0
    }
    fn name(&self) -> &str {
        &self.name
    }
}
