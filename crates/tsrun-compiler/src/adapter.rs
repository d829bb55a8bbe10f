//! The compiler adapter: one entry in, one [`BuildResult`] out.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use tsrun_resolver::{ModuleFormat, ModuleResolver, ResolveError, ResolvedModule};

use crate::error::{BuildError, CompileError};
use crate::manifest::{BuildResult, DependencyManifest};
use crate::script::ScriptCompiler;
use crate::service::{CompilerService, ModuleLookup};

/// Resolves through a fresh [`ModuleResolver`] and records every file it
/// hands out.
struct RecordingLookup {
    resolver: ModuleResolver,
    formats: HashMap<PathBuf, ModuleFormat>,
    files: BTreeSet<PathBuf>,
}

impl RecordingLookup {
    fn format_of(&mut self, importer: &Path) -> ModuleFormat {
        if let Some(format) = self.formats.get(importer) {
            return *format;
        }
        let format = self.resolver.detect_format(importer, None);
        self.formats.insert(importer.to_path_buf(), format);
        format
    }
}

impl ModuleLookup for RecordingLookup {
    fn resolve(&mut self, importer: &Path, specifier: &str) -> Result<ResolvedModule, ResolveError> {
        let consumer = self.format_of(importer);
        let resolved = self.resolver.resolve(specifier, importer, consumer)?;
        if let Some(path) = resolved.path() {
            self.files.insert(path.to_path_buf());
        }
        Ok(resolved)
    }
}

#[derive(Clone)]
pub struct Compiler {
    service: Arc<dyn CompilerService>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(Arc::new(ScriptCompiler::default()))
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").finish_non_exhaustive()
    }
}

impl Compiler {
    pub fn new(service: Arc<dyn CompilerService>) -> Self {
        Self { service }
    }

    /// Compile `entry` and everything it imports.
    ///
    /// Error diagnostics fail the build; warnings are logged.
    pub fn compile(&self, entry: &Path) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let resolver = ModuleResolver::new();
        let entry = resolver.resolve_entry(entry)?;

        let mut lookup = RecordingLookup {
            resolver,
            formats: HashMap::new(),
            files: BTreeSet::from([entry.clone()]),
        };
        let output = self.service.compile(&entry, &mut lookup)?;

        if output.diagnostics.iter().any(|d| d.is_error()) {
            return Err(CompileError {
                entry,
                diagnostics: output.diagnostics,
            }
            .into());
        }
        for diag in &output.diagnostics {
            warn!(entry = %entry.display(), "{diag}");
        }

        let manifest: DependencyManifest = lookup.files.into_iter().collect();
        info!(
            entry = %entry.display(),
            files = manifest.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(BuildResult {
            output_code: output.code,
            manifest: Arc::new(manifest),
        })
    }
}
