//! The seam between the adapter and a compiler implementation.

use std::path::Path;

use tsrun_resolver::{ResolveError, ResolvedModule};

use crate::diagnostic::Diagnostic;
use crate::error::BuildError;

/// Resolves specifiers on behalf of a compiler service.
///
/// Every file handed out is recorded into the build's dependency manifest.
pub trait ModuleLookup {
    fn resolve(&mut self, importer: &Path, specifier: &str) -> Result<ResolvedModule, ResolveError>;
}

#[derive(Debug, Clone, Default)]
pub struct CompilerOutput {
    pub code: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns an entry file and its imports into one executable script.
pub trait CompilerService: Send + Sync {
    fn compile(&self, entry: &Path, lookup: &mut dyn ModuleLookup) -> Result<CompilerOutput, BuildError>;
}
