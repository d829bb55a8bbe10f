//! The built-in compiler service.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};
use tsrun_resolver::ResolvedModule;

use crate::bundle::{self, BundleModule, Link};
use crate::dep_graph::DepGraph;
use crate::diagnostic::Diagnostic;
use crate::error::BuildError;
use crate::rewrite::rewrite;
use crate::scanner::mask;
use crate::service::{CompilerOutput, CompilerService, ModuleLookup};
use crate::transpile::{Passthrough, Transpiler};

pub const INVALID_JSON: &str = "E0004";
pub const IMPORT_CYCLE: &str = "W0001";

/// Compiles an entry and every local module it reaches into one script.
pub struct ScriptCompiler {
    transpiler: Arc<dyn Transpiler>,
}

impl Default for ScriptCompiler {
    fn default() -> Self {
        Self::new(Arc::new(Passthrough))
    }
}

impl ScriptCompiler {
    pub fn new(transpiler: Arc<dyn Transpiler>) -> Self {
        Self { transpiler }
    }

    /// Source to module body, or the diagnostics explaining why not.
    fn compile_module(&self, path: &Path, source: &str) -> Result<(String, Vec<String>), Vec<Diagnostic>> {
        if path.extension().is_some_and(|ext| ext == "json") {
            return match serde_json::from_str::<serde_json::Value>(source) {
                Ok(value) => Ok((format!("module.exports = {value};"), Vec::new())),
                Err(e) => Err(vec![Diagnostic::error(format!("invalid JSON module: {e}"))
                    .with_code(INVALID_JSON)
                    .with_file(path)]),
            };
        }

        let source = self.transpiler.transpile(path, &strip_hashbang(source))?;
        let masked = mask(&source).map_err(|diag| vec![diag.with_file(path)])?;
        let out = rewrite(&source, &masked.masked);
        Ok((out.code, out.specifiers))
    }
}

/// `#!` is only legal on the first line of a file; turn it into a comment.
fn strip_hashbang(source: &str) -> String {
    match source.strip_prefix("#!") {
        Some(rest) => format!("//{rest}"),
        None => source.to_string(),
    }
}

impl CompilerService for ScriptCompiler {
    fn compile(&self, entry: &Path, lookup: &mut dyn ModuleLookup) -> Result<CompilerOutput, BuildError> {
        let mut modules: BTreeMap<PathBuf, BundleModule> = BTreeMap::new();
        let mut graph = DepGraph::new();
        let mut diagnostics = Vec::new();
        let mut queue = VecDeque::from([entry.to_path_buf()]);
        graph.set_entry(entry.to_path_buf());

        // Breadth-first discovery of every reachable local module
        while let Some(path) = queue.pop_front() {
            if modules.contains_key(&path) {
                continue;
            }
            trace!(file = %path.display(), "compiling module");

            let source = fs::read_to_string(&path).map_err(|source| BuildError::Read {
                path: path.clone(),
                source,
            })?;

            let (code, specifiers) = match self.compile_module(&path, &source) {
                Ok(compiled) => compiled,
                Err(diags) => {
                    diagnostics.extend(diags);
                    modules.insert(
                        path,
                        BundleModule {
                            code: String::new(),
                            links: BTreeMap::new(),
                        },
                    );
                    continue;
                }
            };

            let mut links = BTreeMap::new();
            let mut local_deps = Vec::new();
            for specifier in specifiers {
                let link = match lookup.resolve(&path, &specifier)? {
                    ResolvedModule::LocalFile(dep) => {
                        local_deps.push(dep.clone());
                        if !modules.contains_key(&dep) {
                            queue.push_back(dep.clone());
                        }
                        Link::Local(dep)
                    }
                    ResolvedModule::Package(file) => Link::External(file.to_string_lossy().into_owned()),
                    ResolvedModule::Builtin(name) => Link::External(name),
                };
                links.insert(specifier, link);
            }

            graph.add_module(path.clone(), local_deps);
            modules.insert(path, BundleModule { code, links });
        }

        for cycle in graph.cycles() {
            let chain = cycle
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            diagnostics.push(
                Diagnostic::warning(format!("import cycle: {chain}"))
                    .with_code(IMPORT_CYCLE)
                    .with_file(&cycle[0]),
            );
        }

        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(CompilerOutput {
                code: String::new(),
                diagnostics,
            });
        }

        debug!(modules = modules.len(), "emitting bundle");
        Ok(CompilerOutput {
            code: bundle::emit(entry, &modules),
            diagnostics,
        })
    }
}
