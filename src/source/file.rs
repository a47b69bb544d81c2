//! A single source file held by the index.

use once_cell::sync::OnceCell;
use tree_sitter::{Node, Tree};

use super::python::{self, ParseFailure};

/// Source text plus its lazily parsed syntax tree.
///
/// The tree is built on first access and cached, so every analyzer
/// shares one parse per file.
pub struct SourceFile {
    path: String,
    text: String,
    syntax: OnceCell<Result<Tree, ParseFailure>>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            syntax: OnceCell::new(),
        }
    }

    /// Path relative to the project root, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// File name without its directory or suffix.
    pub fn stem(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        name.split('.').next().unwrap_or(name)
    }

    /// The parsed tree, or why it could not be produced.
    pub fn tree(&self) -> Result<&Tree, &ParseFailure> {
        self.syntax
            .get_or_init(|| {
                tracing::trace!(path = %self.path, "parsing");
                python::parse(&self.text)
            })
            .as_ref()
    }

    pub fn parse_failure(&self) -> Option<&ParseFailure> {
        self.tree().err()
    }

    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: Node) -> &str {
        node.utf8_text(self.text.as_bytes()).unwrap_or("")
    }
}

impl std::fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceFile")
            .field("path", &self.path)
            .field("len", &self.text.len())
            .field("parsed", &self.syntax.get().map(|r| r.is_ok()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_is_cached() {
        let file = SourceFile::new("app/models.py", "x = 1\n");
        let first = file.tree().unwrap() as *const Tree;
        let second = file.tree().unwrap() as *const Tree;
        assert_eq!(first, second);
    }

    #[test]
    fn test_parse_failure_is_retained() {
        let file = SourceFile::new("bad.py", "def f(:\n");
        assert!(file.tree().is_err());
        assert_eq!(file.parse_failure().map(|f| f.line), Some(1));
    }

    #[test]
    fn test_stem() {
        assert_eq!(SourceFile::new("migrations/versions/abc_init.py", "").stem(), "abc_init");
        assert_eq!(SourceFile::new("run.py", "").stem(), "run");
    }
}
