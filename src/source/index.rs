//! Source index: every candidate file of a project, read once.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::SourceFile;
use crate::config::Settings;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[
    "__pycache__",
    "node_modules",
    "venv",
    "site-packages",
    "dist",
    "build",
];

/// A path that could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputError {
    /// Path relative to the project root (`.` for the root itself).
    pub path: String,
    pub message: String,
}

/// Immutable snapshot of a project tree.
///
/// Holds the text of every source file keyed by relative path, plus the
/// full file and directory inventory (any suffix) used for layout checks.
#[derive(Debug, Default)]
pub struct SourceIndex {
    root: PathBuf,
    files: BTreeMap<String, SourceFile>,
    inventory: BTreeSet<String>,
    directories: BTreeSet<String>,
    input_errors: Vec<InputError>,
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl SourceIndex {
    /// Walk `root` and read every source file selected by the settings.
    ///
    /// Never fails: unreadable paths are recorded as input errors and the
    /// walk carries on.
    pub fn build<P: AsRef<Path>>(root: P, settings: &Settings) -> Self {
        let root = root.as_ref();
        let mut index = Self {
            root: root.to_path_buf(),
            ..Default::default()
        };

        if !root.is_dir() {
            index.input_errors.push(InputError {
                path: ".".to_string(),
                message: format!("{} is not a readable directory", root.display()),
            });
            return index;
        }

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| relative_path(root, p))
                        .unwrap_or_else(|| ".".to_string());
                    tracing::warn!(%path, error = %e, "cannot read path");
                    index.input_errors.push(InputError {
                        path,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            if entry.depth() == 0 {
                continue;
            }

            let rel = relative_path(root, entry.path());
            if entry.file_type().is_dir() {
                index.directories.insert(rel);
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            index.inventory.insert(rel.clone());
            if !index.is_candidate(&rel, settings) {
                continue;
            }

            match fs::read(entry.path()) {
                Ok(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        index.files.insert(rel.clone(), SourceFile::new(rel, text));
                    }
                    Err(_) => {
                        tracing::warn!(path = %rel, "not valid UTF-8");
                        index.input_errors.push(InputError {
                            path: rel,
                            message: "file is not valid UTF-8".to_string(),
                        });
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "cannot read file");
                    index.input_errors.push(InputError {
                        path: rel,
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::debug!(
            root = %root.display(),
            sources = index.files.len(),
            inventory = index.inventory.len(),
            input_errors = index.input_errors.len(),
            "source index built"
        );
        index
    }

    /// Build an index from in-memory sources, keyed by relative path.
    pub fn from_sources<I, P, T>(sources: I) -> Self
    where
        I: IntoIterator<Item = (P, T)>,
        P: Into<String>,
        T: Into<String>,
    {
        let mut index = Self::default();
        for (path, text) in sources {
            let path = path.into();
            index.add_inventory(&path);
            index.files.insert(path.clone(), SourceFile::new(path, text));
        }
        index
    }

    /// Record a non-source file (and its parent directories) in the inventory.
    pub fn add_inventory(&mut self, path: &str) {
        let mut parts: Vec<&str> = path.split('/').collect();
        parts.pop();
        for depth in 1..=parts.len() {
            self.directories.insert(parts[..depth].join("/"));
        }
        self.inventory.insert(path.to_string());
    }

    fn is_candidate(&self, rel: &str, settings: &Settings) -> bool {
        let suffix_ok = Path::new(rel)
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| settings.suffixes().iter().any(|s| s == ext))
            .unwrap_or(false);
        suffix_ok && !settings.is_excluded(rel)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Source files in path order.
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.values()
    }

    pub fn get(&self, path: &str) -> Option<&SourceFile> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn input_errors(&self) -> &[InputError] {
        &self.input_errors
    }

    /// Whether a file of any suffix exists at `path`.
    pub fn has_file(&self, path: &str) -> bool {
        self.inventory.contains(path)
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.directories.contains(path)
    }

    pub fn inventory(&self) -> &BTreeSet<String> {
        &self.inventory
    }

    pub fn directories(&self) -> &BTreeSet<String> {
        &self.directories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_build_collects_sources_and_inventory() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app/__init__.py", b"");
        write(temp.path(), "app/models.py", b"x = 1\n");
        write(temp.path(), "app/templates/index.html", b"<html></html>");
        write(temp.path(), ".env", b"SECRET_KEY=x\n");
        write(temp.path(), ".git/config", b"");
        write(temp.path(), "app/__pycache__/models.cpython-311.pyc", b"\x00");

        let index = SourceIndex::build(temp.path(), &Settings::default());

        let paths: Vec<&str> = index.files().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["app/__init__.py", "app/models.py"]);
        assert!(index.has_file(".env"));
        assert!(index.has_file("app/templates/index.html"));
        assert!(index.has_dir("app/templates"));
        assert!(!index.has_dir(".git"));
        assert!(!index.has_dir("app/__pycache__"));
        assert!(index.input_errors().is_empty());
    }

    #[test]
    fn test_excluded_files_are_not_sources() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app/views.py", b"");
        write(temp.path(), "tests/test_views.py", b"");

        let index = SourceIndex::build(temp.path(), &Settings::default());
        assert!(index.get("app/views.py").is_some());
        assert!(index.get("tests/test_views.py").is_none());
        assert!(index.has_file("tests/test_views.py"));
    }

    #[test]
    fn test_non_utf8_file_is_an_input_error() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "app.py", &[0x66, 0x6f, 0xff, 0xfe]);

        let index = SourceIndex::build(temp.path(), &Settings::default());
        assert!(index.is_empty());
        assert_eq!(index.input_errors().len(), 1);
        assert_eq!(index.input_errors()[0].path, "app.py");
    }

    #[test]
    fn test_missing_root_is_an_input_error() {
        let temp = TempDir::new().unwrap();
        let index = SourceIndex::build(temp.path().join("nope"), &Settings::default());
        assert_eq!(index.input_errors().len(), 1);
        assert_eq!(index.input_errors()[0].path, ".");
    }

    #[test]
    fn test_from_sources_registers_directories() {
        let index = SourceIndex::from_sources([("app/models/user.py", "")]);
        assert!(index.has_dir("app"));
        assert!(index.has_dir("app/models"));
        assert!(index.has_file("app/models/user.py"));
    }
}
