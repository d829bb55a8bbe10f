//! Build outputs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Absolute paths of every file a build read: the entry, local modules and
/// package files. Builtin runtime modules never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyManifest {
    files: BTreeSet<PathBuf>,
}

impl DependencyManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>) -> bool {
        self.files.insert(path.into())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_vec(&self) -> Vec<PathBuf> {
        self.files.iter().cloned().collect()
    }
}

impl FromIterator<PathBuf> for DependencyManifest {
    fn from_iter<T: IntoIterator<Item = PathBuf>>(iter: T) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Output of one successful build, replaced wholesale on the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub output_code: String,
    pub manifest: Arc<DependencyManifest>,
}

impl BuildResult {
    /// Same manifest, new code.
    pub fn with_output_code(&self, output_code: String) -> Self {
        Self {
            output_code,
            manifest: Arc::clone(&self.manifest),
        }
    }
}
