//! File candidate probing shared by relative, alias and package resolution.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use crate::error::{ResolveError, ResolveResult};

/// Extensions tried, in order, when a specifier names a file without one.
pub const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs", "json"];

/// TypeScript sources that may stand behind a JavaScript import path
/// (`import "./util.js"` written against `util.ts`).
fn typescript_counterparts(ext: &str) -> &'static [&'static str] {
    match ext {
        "js" => &["ts", "tsx"],
        "jsx" => &["tsx"],
        "mjs" => &["mts"],
        "cjs" => &["cts"],
        _ => &[],
    }
}

/// Try to resolve a path to an existing file.
///
/// Order: the literal path, the TypeScript counterpart of a JavaScript
/// extension, the path with each supported extension appended, then the path
/// as a directory holding an `index` file.
pub fn probe_file(target: &Path) -> Option<PathBuf> {
    if target.is_file() {
        return Some(target.to_path_buf());
    }

    if let Some(ext) = target.extension().and_then(|e| e.to_str()) {
        for ts_ext in typescript_counterparts(ext) {
            let candidate = target.with_extension(ts_ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    for ext in SOURCE_EXTENSIONS {
        let candidate = with_appended_extension(target, ext);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if target.is_dir() {
        for ext in SOURCE_EXTENSIONS {
            let index_path = target.join(format!("index.{ext}"));
            if index_path.is_file() {
                return Some(index_path);
            }
        }
    }

    None
}

/// `foo.config` + `ts` is `foo.config.ts`, not `foo.ts`.
fn with_appended_extension(path: &Path, ext: &str) -> PathBuf {
    let mut raw: OsString = path.as_os_str().to_owned();
    raw.push(".");
    raw.push(ext);
    PathBuf::from(raw)
}

/// Lexically remove `.` and `..` components.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonical absolute form used for manifests and module ids.
pub fn canonical(path: &Path) -> ResolveResult<PathBuf> {
    dunce::canonicalize(path).map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    })
}
