//! Package.json reader
//!
//! Extracts the fields that decide a package's entry point: `main`, `module`,
//! `type` and the `exports` map with its conditions.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::{ResolveError, ResolveResult};
use crate::format::EntryField;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PackageJson {
    pub name: String,
    pub version: String,
    pub main: Option<String>,
    pub module: Option<String>,
    /// The `"type"` field: `"module"` or `"commonjs"`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub exports: Option<Value>,
}

/// Parse a package.json file
pub fn parse_package_json(path: &Path) -> ResolveResult<PackageJson> {
    let content = fs::read_to_string(path).map_err(|source| ResolveError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_package_json_str(&content).map_err(|e| ResolveError::InvalidManifest {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse_package_json_str(content: &str) -> Result<PackageJson, serde_json::Error> {
    serde_json::from_str(content)
}

impl PackageJson {
    /// The closest `package.json` at or above `dir`.
    pub fn find_nearest(dir: &Path) -> Option<(PathBuf, PackageJson)> {
        for ancestor in dir.ancestors() {
            let candidate = ancestor.join("package.json");
            if !candidate.is_file() {
                continue;
            }
            return match parse_package_json(&candidate) {
                Ok(pkg) => Some((candidate, pkg)),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable package.json");
                    None
                }
            };
        }
        None
    }

    /// Whether files of this package default to ES module semantics.
    pub fn is_module(&self) -> bool {
        self.kind.as_deref() == Some("module")
    }

    /// The relative target named by `field`, if the package declares one.
    pub fn entry(&self, field: EntryField, conditions: &[&str]) -> Option<String> {
        match field {
            EntryField::Exports => self.export_target(".", conditions),
            EntryField::Module => self.module.clone(),
            EntryField::Main => self.main.clone(),
        }
    }

    /// Look up `subpath` (`"."` or `"./feature"`) in the `exports` map.
    ///
    /// Handles the string shorthand, subpath maps with `*` patterns, nested
    /// condition objects and fallback arrays.
    pub fn export_target(&self, subpath: &str, conditions: &[&str]) -> Option<String> {
        let exports = self.exports.as_ref()?;

        match exports {
            Value::Object(map) if map.keys().any(|k| k.starts_with('.')) => {
                if let Some(target) = map.get(subpath) {
                    return resolve_conditions(target, conditions);
                }
                for (key, target) in map {
                    let Some((prefix, suffix)) = key.split_once('*') else {
                        continue;
                    };
                    let matched = subpath
                        .strip_prefix(prefix)
                        .and_then(|rest| rest.strip_suffix(suffix));
                    if let Some(matched) = matched {
                        return resolve_conditions(target, conditions).map(|t| t.replace('*', matched));
                    }
                }
                None
            }
            other if subpath == "." => resolve_conditions(other, conditions),
            _ => None,
        }
    }
}

/// Conditions are matched in the map's declaration order.
fn resolve_conditions(target: &Value, conditions: &[&str]) -> Option<String> {
    match target {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|item| resolve_conditions(item, conditions)),
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| conditions.contains(&key.as_str()))
            .find_map(|(_, value)| resolve_conditions(value, conditions)),
        _ => None,
    }
}
