//! Module locator: dotted module name to implementation file.
//!
//! Two strategies are provided. [`SearchPathLocator`] mirrors the
//! interpreter's path-based finder over a fixed list of roots and never
//! executes any code. [`InterpreterLocator`] asks a Python interpreter
//! through `importlib.util.find_spec`, which imports parent packages only.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// Colon-separated (platform path separator) list of search roots.
pub const SEARCH_PATH_ENV: &str = "SITE_PATCHER_PATH";
/// Interpreter used when no search roots are configured.
pub const PYTHON_ENV: &str = "SITE_PATCHER_PYTHON";
pub const DEFAULT_PYTHON: &str = "python3";

/// Exit code the introspection script uses for "no such module".
const NOT_FOUND_EXIT: i32 = 3;

const FIND_SPEC_SCRIPT: &str = r#"import importlib.util, sys
try:
    spec = importlib.util.find_spec(sys.argv[1])
except ImportError:
    spec = None
origin = getattr(spec, "origin", None)
if not origin or not origin.endswith(".py"):
    sys.exit(3)
print(origin)
"#;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("module '{module}' not found")]
    NotFound { module: String },

    #[error("invalid module name '{0}'")]
    InvalidName(String),

    #[error("failed to run {}: {source}", .python.display())]
    Interpreter {
        python: PathBuf,
        source: std::io::Error,
    },

    #[error("{} could not introspect '{module}': {stderr}", .python.display())]
    Introspection {
        python: PathBuf,
        module: String,
        stderr: String,
    },
}

/// Resolves a dotted module name to the absolute path of its source file.
pub trait ModuleLocator {
    fn locate(&self, module: &str) -> Result<PathBuf, LocateError>;
}

/// Split and check a dotted module name.
fn module_parts(module: &str) -> Result<Vec<&str>, LocateError> {
    let parts: Vec<&str> = module.split('.').collect();
    let valid = parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first == '_' || first.is_alphabetic() => {
                chars.all(|c| c == '_' || c.is_alphanumeric())
            }
            _ => false,
        }
    });
    if valid {
        Ok(parts)
    } else {
        Err(LocateError::InvalidName(module.to_string()))
    }
}

/// Path-based finder over an ordered list of roots.
#[derive(Debug, Clone, Default)]
pub struct SearchPathLocator {
    roots: Vec<PathBuf>,
}

impl SearchPathLocator {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Candidate files for `parts` under one root, package first.
    fn candidates(root: &Path, parts: &[&str]) -> [PathBuf; 2] {
        let mut base = root.to_path_buf();
        base.extend(parts);
        let package = base.join("__init__.py");
        let module = base.with_file_name(format!("{}.py", parts[parts.len() - 1]));
        [package, module]
    }
}

impl ModuleLocator for SearchPathLocator {
    fn locate(&self, module: &str) -> Result<PathBuf, LocateError> {
        let parts = module_parts(module)?;
        for root in &self.roots {
            for candidate in Self::candidates(root, &parts) {
                debug!(module, candidate = %candidate.display(), "probing");
                if candidate.is_file() {
                    if let Ok(path) = candidate.canonicalize() {
                        return Ok(path);
                    }
                }
            }
        }
        Err(LocateError::NotFound {
            module: module.to_string(),
        })
    }
}

/// Asks a Python interpreter where a module lives.
#[derive(Debug, Clone)]
pub struct InterpreterLocator {
    python: PathBuf,
}

impl InterpreterLocator {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &Path {
        &self.python
    }
}

impl Default for InterpreterLocator {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

impl ModuleLocator for InterpreterLocator {
    fn locate(&self, module: &str) -> Result<PathBuf, LocateError> {
        module_parts(module)?;

        let output = Command::new(&self.python)
            .args(["-c", FIND_SPEC_SCRIPT, module])
            .output()
            .map_err(|source| LocateError::Interpreter {
                python: self.python.clone(),
                source,
            })?;

        if output.status.code() == Some(NOT_FOUND_EXIT) {
            return Err(LocateError::NotFound {
                module: module.to_string(),
            });
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Last line of a traceback carries the exception.
            let stderr = stderr.trim().lines().last().unwrap_or("").to_string();
            return Err(LocateError::Introspection {
                python: self.python.clone(),
                module: module.to_string(),
                stderr,
            });
        }

        let origin = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(module, origin = %origin, python = %self.python.display(), "find_spec");
        let path = PathBuf::from(origin);
        if !path.is_file() {
            return Err(LocateError::NotFound {
                module: module.to_string(),
            });
        }
        path.canonicalize().map_err(|_| LocateError::NotFound {
            module: module.to_string(),
        })
    }
}

/// The locator strategies available to a fix run.
#[derive(Debug, Clone)]
pub enum Locator {
    SearchPath(SearchPathLocator),
    Interpreter(InterpreterLocator),
}

impl Locator {
    /// Pick a locator from the environment.
    ///
    /// `SITE_PATCHER_PATH` wins when set and non-empty; otherwise the
    /// interpreter named by `SITE_PATCHER_PYTHON` (default `python3`).
    pub fn from_env() -> Self {
        Self::resolve(Vec::new(), None, &[])
    }

    /// Pick a locator with precedence: explicit roots, explicit
    /// interpreter, environment, fix set search paths, default interpreter.
    pub fn resolve(
        search_paths: Vec<PathBuf>,
        python: Option<PathBuf>,
        configured_paths: &[PathBuf],
    ) -> Self {
        if !search_paths.is_empty() {
            return Locator::SearchPath(SearchPathLocator::new(search_paths));
        }
        if let Some(python) = python {
            return Locator::Interpreter(InterpreterLocator::new(python));
        }
        if let Some(paths) = env::var_os(SEARCH_PATH_ENV).filter(|v| !v.is_empty()) {
            return Locator::SearchPath(SearchPathLocator::new(split_search_path(paths)));
        }
        if let Some(python) = env::var_os(PYTHON_ENV).filter(|v| !v.is_empty()) {
            return Locator::Interpreter(InterpreterLocator::new(python));
        }
        if !configured_paths.is_empty() {
            return Locator::SearchPath(SearchPathLocator::new(configured_paths.to_vec()));
        }
        Locator::Interpreter(InterpreterLocator::default())
    }

    /// Search roots, when this is a path-based locator.
    pub fn roots(&self) -> Option<&[PathBuf]> {
        match self {
            Locator::SearchPath(l) => Some(l.roots()),
            Locator::Interpreter(_) => None,
        }
    }
}

impl ModuleLocator for Locator {
    fn locate(&self, module: &str) -> Result<PathBuf, LocateError> {
        match self {
            Locator::SearchPath(l) => l.locate(module),
            Locator::Interpreter(l) => l.locate(module),
        }
    }
}

fn split_search_path(value: OsString) -> Vec<PathBuf> {
    env::split_paths(&value)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}
