use std::fmt;
use std::path::{Path, PathBuf};

use crate::namespace::ROOT_NAMESPACE;

/// Where a manager's workers run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The agent's own network namespace; workers are tasks.
    Root,
    /// A named network namespace; workers are processes that enter `path`.
    Namespace { name: String, path: PathBuf },
}

impl Scope {
    pub fn namespace(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Scope::Namespace {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Registry key of the scope.
    pub fn name(&self) -> &str {
        match self {
            Scope::Root => ROOT_NAMESPACE,
            Scope::Namespace { name, .. } => name,
        }
    }

    pub fn netns_path(&self) -> Option<&Path> {
        match self {
            Scope::Root => None,
            Scope::Namespace { path, .. } => Some(path),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Root => write!(f, "root namespace"),
            Scope::Namespace { name, .. } => write!(f, "namespace {}", name),
        }
    }
}
