//! NPM package resolution
//!
//! Implements the Node.js `node_modules` lookup for bare specifiers. The
//! package entry point is chosen from `exports`, `module` and `main` in the
//! order given by the consumer's [`ModuleFormat`].

use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::{ResolveError, ResolveResult};
use crate::format::ModuleFormat;
use crate::package_json::{parse_package_json, PackageJson};
use crate::probe::{canonical, probe_file};

pub struct NpmResolver;

impl NpmResolver {
    /// Resolve a package specifier imported from `from_file`.
    ///
    /// Algorithm:
    /// 1. Split the package name from its subpath (`lodash/fp` is `lodash` + `fp`)
    /// 2. Starting at the importer's directory, look for `node_modules/<name>`
    /// 3. If absent, go up one directory and repeat until the filesystem root
    /// 4. Pick the entry file for the consumer's format
    pub fn resolve(specifier: &str, from_file: &Path, consumer: ModuleFormat) -> ResolveResult<PathBuf> {
        let (pkg_name, subpath) = Self::parse_package_specifier(specifier);
        let start = from_file.parent().unwrap_or(Path::new("/"));

        for dir in start.ancestors() {
            let package_dir = dir.join("node_modules").join(pkg_name);
            if package_dir.is_dir() {
                trace!(package = pkg_name, dir = %package_dir.display(), "found package");
                return Self::resolve_package_entry(&package_dir, subpath, consumer)
                    .map_err(|reason| match reason {
                        EntryFailure::Error(e) => e,
                        EntryFailure::Missing(reason) => ResolveError::unresolved(from_file, specifier, reason),
                    });
            }
        }

        Err(ResolveError::unresolved(
            from_file,
            specifier,
            format!("package '{pkg_name}' not found in node_modules"),
        ))
    }

    /// Parse a package specifier into package name and subpath
    ///
    /// Examples:
    /// - "lodash" → ("lodash", None)
    /// - "lodash/fp" → ("lodash", Some("fp"))
    /// - "@types/node" → ("@types/node", None)
    /// - "@types/node/fs" → ("@types/node", Some("fs"))
    pub fn parse_package_specifier(specifier: &str) -> (&str, Option<&str>) {
        let name_segments = if specifier.starts_with('@') { 2 } else { 1 };
        let split = specifier
            .match_indices('/')
            .nth(name_segments - 1)
            .map(|(pos, _)| pos);

        match split {
            Some(pos) => (&specifier[..pos], Some(&specifier[pos + 1..])),
            None => (specifier, None),
        }
    }

    fn resolve_package_entry(
        package_dir: &Path,
        subpath: Option<&str>,
        consumer: ModuleFormat,
    ) -> Result<PathBuf, EntryFailure> {
        let manifest_path = package_dir.join("package.json");
        let pkg = if manifest_path.is_file() {
            parse_package_json(&manifest_path).map_err(EntryFailure::Error)?
        } else {
            PackageJson::default()
        };
        let conditions = consumer.export_conditions();

        if let Some(sub) = subpath {
            let candidate = match pkg.export_target(&format!("./{sub}"), conditions) {
                Some(target) => package_dir.join(target),
                None => package_dir.join(sub),
            };
            return match probe_file(&candidate) {
                Some(found) => canonical(&found).map_err(EntryFailure::Error),
                None => Err(EntryFailure::Missing(format!(
                    "subpath '{sub}' not found in package {}",
                    package_dir.display()
                ))),
            };
        }

        for field in consumer.entry_fields() {
            let Some(target) = pkg.entry(*field, conditions) else {
                continue;
            };
            if let Some(found) = probe_file(&package_dir.join(&target)) {
                trace!(?field, target = %target, "selected package entry");
                return canonical(&found).map_err(EntryFailure::Error);
            }
        }

        match probe_file(&package_dir.join("index")) {
            Some(found) => canonical(&found).map_err(EntryFailure::Error),
            None => Err(EntryFailure::Missing(format!(
                "no entry point found in package {}",
                package_dir.display()
            ))),
        }
    }
}

enum EntryFailure {
    Error(ResolveError),
    Missing(String),
}
