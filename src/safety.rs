use std::path::{Path, PathBuf};
use thiserror::Error;

/// Refuses rewrites of files that resolve outside the allowed roots.
///
/// Used with path-based location, where a symlinked package directory
/// could otherwise point the rewrite at an unrelated tree.
#[derive(Debug, Clone)]
pub struct RootGuard {
    /// Canonical allowed roots
    roots: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside the search roots: {path}")]
    OutsideRoots { path: PathBuf },

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl RootGuard {
    /// Create a guard over `roots`.
    ///
    /// Roots that do not exist are skipped, since nothing can be located
    /// under them anyway.
    pub fn new(roots: impl IntoIterator<Item = impl AsRef<Path>>) -> Self {
        let roots = roots
            .into_iter()
            .filter_map(|root| root.as_ref().canonicalize().ok())
            .collect();
        Self { roots }
    }

    /// Check if a path is safe to rewrite.
    ///
    /// Returns the canonicalized absolute path if safe.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let canonical = path.as_ref().canonicalize()?;

        if !self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Err(SafetyError::OutsideRoots { path: canonical });
        }

        Ok(canonical)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}
