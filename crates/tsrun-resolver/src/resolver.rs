//! Module resolution logic for import statements

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::error::{ResolveError, ResolveResult};
use crate::format::ModuleFormat;
use crate::npm_resolver::NpmResolver;
use crate::probe::{canonical, normalize, probe_file};
use crate::tsconfig::PathAliases;

/// Represents a resolved module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolvedModule {
    /// Local source file (relative, absolute or aliased specifier)
    LocalFile(PathBuf),
    /// File inside a package under `node_modules`
    Package(PathBuf),
    /// Runtime builtin (`fs`, `node:path`, ...), loaded by the runtime itself
    Builtin(String),
}

impl ResolvedModule {
    /// The file behind this module, if it is one.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ResolvedModule::LocalFile(path) | ResolvedModule::Package(path) => Some(path),
            ResolvedModule::Builtin(_) => None,
        }
    }
}

/// Module resolver handles import path resolution.
///
/// One instance lives for one build; parsed `tsconfig.json` files are cached
/// per directory for its lifetime.
#[derive(Debug, Default)]
pub struct ModuleResolver {
    aliases: Mutex<HashMap<PathBuf, Option<Arc<PathAliases>>>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve an import specifier written in `from_file`.
    ///
    /// `consumer` is the module format of `from_file`; it picks the entry
    /// point of dual-format packages.
    pub fn resolve(
        &self,
        specifier: &str,
        from_file: &Path,
        consumer: ModuleFormat,
    ) -> ResolveResult<ResolvedModule> {
        if Self::is_builtin(specifier) {
            return Ok(ResolvedModule::Builtin(specifier.to_string()));
        }

        if Self::is_relative(specifier) {
            let from_dir = from_file.parent().unwrap_or(Path::new("/"));
            let target = normalize(&from_dir.join(specifier));
            return Self::resolve_file(&target, specifier, from_file);
        }

        if Path::new(specifier).is_absolute() {
            return Self::resolve_file(&normalize(Path::new(specifier)), specifier, from_file);
        }

        if let Some(aliases) = self.aliases_for(from_file)? {
            for candidate in aliases.candidates(specifier) {
                if let Some(found) = probe_file(&normalize(&candidate)) {
                    trace!(specifier, target = %found.display(), "resolved through path alias");
                    return Ok(ResolvedModule::LocalFile(canonical(&found)?));
                }
            }
        }

        let path = NpmResolver::resolve(specifier, from_file, consumer)?;
        debug!(specifier, package = %path.display(), ?consumer, "resolved package");
        Ok(ResolvedModule::Package(path))
    }

    /// Resolve the entry path given by the caller, relative to the
    /// current directory.
    pub fn resolve_entry(&self, target: &Path) -> ResolveResult<PathBuf> {
        let absolute = if target.is_absolute() {
            target.to_path_buf()
        } else {
            let cwd = std::env::current_dir().map_err(|source| ResolveError::Io {
                path: target.to_path_buf(),
                source,
            })?;
            cwd.join(target)
        };

        match probe_file(&normalize(&absolute)) {
            Some(found) => canonical(&found),
            None => Err(ResolveError::unresolved(
                target,
                target.display().to_string(),
                "entry file does not exist",
            )),
        }
    }

    /// Module format of `file`; `source` avoids a re-read when already loaded.
    pub fn detect_format(&self, file: &Path, source: Option<&str>) -> ModuleFormat {
        ModuleFormat::detect(file, source)
    }

    /// Check if a specifier is a runtime builtin module
    pub fn is_builtin(specifier: &str) -> bool {
        if specifier.starts_with("node:") {
            return true;
        }
        let root = specifier.split('/').next().unwrap_or(specifier);
        matches!(
            root,
            "fs" | "path" | "http" | "https" | "http2" | "os" | "process" | "events"
                | "url" | "crypto" | "util" | "stream" | "buffer" | "child_process"
                | "cluster" | "net" | "tls" | "dgram" | "dns" | "querystring"
                | "readline" | "assert" | "zlib" | "timers" | "vm" | "worker_threads"
                | "perf_hooks" | "string_decoder" | "tty" | "v8" | "module" | "async_hooks"
                | "console" | "inspector" | "diagnostics_channel" | "punycode" | "constants"
                | "domain" | "repl" | "trace_events" | "wasi" | "sys"
        )
    }

    fn is_relative(specifier: &str) -> bool {
        specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
    }

    fn resolve_file(target: &Path, specifier: &str, from_file: &Path) -> ResolveResult<ResolvedModule> {
        match probe_file(target) {
            Some(found) => Ok(ResolvedModule::LocalFile(canonical(&found)?)),
            None => Err(ResolveError::unresolved(
                from_file,
                specifier,
                format!("no file matches {}", target.display()),
            )),
        }
    }

    fn aliases_for(&self, from_file: &Path) -> ResolveResult<Option<Arc<PathAliases>>> {
        let dir = from_file.parent().unwrap_or(Path::new("/")).to_path_buf();

        let mut cache = self.aliases.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = cache.get(&dir) {
            return Ok(cached.clone());
        }
        let loaded = PathAliases::find(&dir)?.map(Arc::new);
        cache.insert(dir, loaded.clone());
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn local(path: &Path) -> ResolvedModule {
        ResolvedModule::LocalFile(canonical(path).unwrap())
    }

    #[test]
    fn test_sibling_resolves_at_any_depth() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("a.ts"), "");
        write(&root.join("b.ts"), "");
        write(&root.join("x/y/z/a.ts"), "");
        write(&root.join("x/y/z/b.ts"), "");

        let resolver = ModuleResolver::new();
        assert_eq!(
            resolver.resolve("./b", &root.join("a.ts"), ModuleFormat::Esm).unwrap(),
            local(&root.join("b.ts"))
        );
        assert_eq!(
            resolver.resolve("./b", &root.join("x/y/z/a.ts"), ModuleFormat::Esm).unwrap(),
            local(&root.join("x/y/z/b.ts"))
        );
    }

    #[test]
    fn test_parent_specifier_ascends_one_directory() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("a/b/c.ts"), "");
        write(&root.join("a/d.ts"), "");
        write(&root.join("d.ts"), "");

        let resolver = ModuleResolver::new();
        assert_eq!(
            resolver.resolve("../d", &root.join("a/b/c.ts"), ModuleFormat::Esm).unwrap(),
            local(&root.join("a/d.ts"))
        );
    }

    #[test]
    fn test_dot_and_dotdot_resolve_to_index() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("lib/index.ts"), "");
        write(&root.join("lib/inner/user.ts"), "");
        write(&root.join("lib/inner/index.ts"), "");

        let resolver = ModuleResolver::new();
        let importer = root.join("lib/inner/user.ts");
        assert_eq!(
            resolver.resolve(".", &importer, ModuleFormat::Esm).unwrap(),
            local(&root.join("lib/inner/index.ts"))
        );
        assert_eq!(
            resolver.resolve("..", &importer, ModuleFormat::Esm).unwrap(),
            local(&root.join("lib/index.ts"))
        );
    }

    #[test]
    fn test_js_extension_maps_to_typescript_source() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(&root.join("util.ts"), "");
        let resolver = ModuleResolver::new();
        assert_eq!(
            resolver.resolve("./util.js", &root.join("main.ts"), ModuleFormat::Esm).unwrap(),
            local(&root.join("util.ts"))
        );
    }

    #[test]
    fn test_builtin_modules() {
        let resolver = ModuleResolver::new();
        let from = Path::new("/project/main.ts");
        for name in ["fs", "node:fs", "fs/promises", "path", "child_process", "node:test"] {
            assert_eq!(
                resolver.resolve(name, from, ModuleFormat::CommonJs).unwrap(),
                ResolvedModule::Builtin(name.to_string())
            );
        }
        assert!(!ModuleResolver::is_builtin("lodash"));
    }

    #[test]
    fn test_builtins_cover_runtime_modules() {
        let resolver = ModuleResolver::new();
        let from = Path::new("/project/main.ts");
        for name in [
            "console",
            "inspector",
            "inspector/promises",
            "diagnostics_channel",
            "punycode",
            "constants",
            "domain",
            "repl",
            "trace_events",
            "wasi",
            "sys",
        ] {
            assert_eq!(
                resolver.resolve(name, from, ModuleFormat::Esm).unwrap(),
                ResolvedModule::Builtin(name.to_string()),
                "{name} should be a builtin"
            );
        }
        assert!(!ModuleResolver::is_builtin("consoles"));
    }

    #[test]
    fn test_unresolved_carries_importer_and_specifier() {
        let temp = tempfile::tempdir().unwrap();
        let importer = temp.path().join("main.ts");
        let err = ModuleResolver::new()
            .resolve("./missing", &importer, ModuleFormat::Esm)
            .unwrap_err();
        match err {
            ResolveError::UnresolvedModule { importer: i, specifier, .. } => {
                assert_eq!(i, importer);
                assert_eq!(specifier, "./missing");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tsconfig_path_alias() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(
            &root.join("tsconfig.json"),
            r#"{ "compilerOptions": { "paths": { "~/*": ["./test/*"] } } }"#,
        );
        write(&root.join("test/Zabu.ts"), "");
        write(&root.join("src/main.ts"), "");

        let resolver = ModuleResolver::new();
        assert_eq!(
            resolver.resolve("~/Zabu", &root.join("src/main.ts"), ModuleFormat::Esm).unwrap(),
            local(&root.join("test/Zabu.ts"))
        );
    }

    #[test]
    fn test_esm_consumer_falls_back_to_main() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        write(
            &root.join("node_modules/cjs-only/package.json"),
            r#"{ "name": "cjs-only", "main": "./lib/entry.js" }"#,
        );
        write(&root.join("node_modules/cjs-only/lib/entry.js"), "module.exports = 1");

        let resolved = ModuleResolver::new()
            .resolve("cjs-only", &root.join("main.ts"), ModuleFormat::Esm)
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedModule::Package(canonical(&root.join("node_modules/cjs-only/lib/entry.js")).unwrap())
        );
    }

    #[test]
    fn test_dual_package_follows_consumer_format() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let pkg = root.join("node_modules/dual");
        write(
            &pkg.join("package.json"),
            r#"{ "name": "dual", "main": "./cjs.js", "module": "./esm.js" }"#,
        );
        write(&pkg.join("cjs.js"), "");
        write(&pkg.join("esm.js"), "");

        let resolver = ModuleResolver::new();
        let from = root.join("main.ts");
        assert_eq!(
            resolver.resolve("dual", &from, ModuleFormat::Esm).unwrap().path(),
            Some(canonical(&pkg.join("esm.js")).unwrap().as_path())
        );
        assert_eq!(
            resolver.resolve("dual", &from, ModuleFormat::CommonJs).unwrap().path(),
            Some(canonical(&pkg.join("cjs.js")).unwrap().as_path())
        );
    }

    #[test]
    fn test_scoped_package_subpath() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        let pkg = root.join("node_modules/@scope/tools");
        write(&pkg.join("package.json"), r#"{ "name": "@scope/tools" }"#);
        write(&pkg.join("fmt/index.js"), "");

        let resolved = ModuleResolver::new()
            .resolve("@scope/tools/fmt", &root.join("main.ts"), ModuleFormat::CommonJs)
            .unwrap();
        assert_eq!(resolved, ResolvedModule::Package(canonical(&pkg.join("fmt/index.js")).unwrap()));
    }

    #[test]
    fn test_resolve_entry_tries_extensions() {
        let temp = tempfile::tempdir().unwrap();
        write(&temp.path().join("main.ts"), "");
        let resolver = ModuleResolver::new();
        assert_eq!(
            resolver.resolve_entry(&temp.path().join("main")).unwrap(),
            canonical(&temp.path().join("main.ts")).unwrap()
        );
        assert!(resolver.resolve_entry(&temp.path().join("nope.ts")).is_err());
    }
}
