//! Resolution errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while resolving an import specifier.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No candidate file exists for the specifier.
    #[error("cannot resolve '{specifier}' imported from {}: {reason}", .importer.display())]
    UnresolvedModule {
        importer: PathBuf,
        specifier: String,
        reason: String,
    },

    /// A `package.json` or `tsconfig.json` could not be parsed.
    #[error("invalid manifest {}: {message}", .path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    pub(crate) fn unresolved(
        importer: impl Into<PathBuf>,
        specifier: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvedModule {
            importer: importer.into(),
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
