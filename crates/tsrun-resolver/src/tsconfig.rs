//! `tsconfig.json` path aliases (`compilerOptions.baseUrl` and `paths`).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ResolveError, ResolveResult};

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TsConfig {
    compiler_options: CompilerOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CompilerOptions {
    base_url: Option<String>,
    paths: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AliasPattern {
    prefix: String,
    /// `None` for exact (non-wildcard) patterns.
    suffix: Option<String>,
    targets: Vec<String>,
}

/// Alias table loaded from one `tsconfig.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAliases {
    base_dir: PathBuf,
    has_base_url: bool,
    patterns: Vec<AliasPattern>,
}

impl PathAliases {
    /// Load the nearest `tsconfig.json` at or above `dir`.
    pub fn find(dir: &Path) -> ResolveResult<Option<PathAliases>> {
        for ancestor in dir.ancestors() {
            let candidate = ancestor.join("tsconfig.json");
            if candidate.is_file() {
                return Self::load(&candidate);
            }
        }
        Ok(None)
    }

    /// `None` when the file declares neither `baseUrl` nor `paths`.
    pub fn load(path: &Path) -> ResolveResult<Option<PathAliases>> {
        let content = fs::read_to_string(path).map_err(|source| ResolveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TsConfig =
            serde_json::from_str(&strip_jsonc(&content)).map_err(|e| ResolveError::InvalidManifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let options = config.compiler_options;
        if options.base_url.is_none() && options.paths.is_empty() {
            return Ok(None);
        }

        let config_dir = path.parent().unwrap_or(Path::new("."));
        let base_dir = config_dir.join(options.base_url.as_deref().unwrap_or("."));

        let mut patterns: Vec<AliasPattern> = options
            .paths
            .into_iter()
            .map(|(key, targets)| match key.split_once('*') {
                Some((prefix, suffix)) => AliasPattern {
                    prefix: prefix.to_string(),
                    suffix: Some(suffix.to_string()),
                    targets,
                },
                None => AliasPattern {
                    prefix: key,
                    suffix: None,
                    targets,
                },
            })
            .collect();
        // exact patterns first, then the longest prefix
        patterns.sort_by(|a, b| {
            a.suffix
                .is_some()
                .cmp(&b.suffix.is_some())
                .then_with(|| b.prefix.len().cmp(&a.prefix.len()))
        });

        Ok(Some(PathAliases {
            base_dir,
            has_base_url: options.base_url.is_some(),
            patterns,
        }))
    }

    /// Candidate paths for a bare specifier, most specific first.
    pub fn candidates(&self, specifier: &str) -> Vec<PathBuf> {
        let mut out = Vec::new();

        for pattern in &self.patterns {
            let matched = match &pattern.suffix {
                None if specifier == pattern.prefix => Some(""),
                None => None,
                Some(suffix) => specifier
                    .strip_prefix(pattern.prefix.as_str())
                    .and_then(|rest| rest.strip_suffix(suffix.as_str())),
            };
            if let Some(matched) = matched {
                out.extend(
                    pattern
                        .targets
                        .iter()
                        .map(|target| self.base_dir.join(target.replace('*', matched))),
                );
                break;
            }
        }

        if self.has_base_url {
            out.push(self.base_dir.join(specifier));
        }
        out
    }
}

/// Remove comments and trailing commas so `serde_json` accepts the file.
pub fn strip_jsonc(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            ',' => {
                let rest = chars.clone().find(|c| !c.is_whitespace());
                if !matches!(rest, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }

    out
}
