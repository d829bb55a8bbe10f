//! Build errors

use std::fmt;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tsrun_resolver::ResolveError;

use crate::diagnostic::Diagnostic;

/// The compiler service reported at least one error diagnostic.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub entry: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    /// Render every diagnostic against its file's current contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for diag in &self.diagnostics {
            let source = diag.file().and_then(|f| fs::read_to_string(f).ok());
            match source {
                Some(source) => out.push_str(&diag.render(&source)),
                None => {
                    out.push_str(&diag.to_string());
                    out.push('\n');
                }
            }
        }
        out
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.errors().count();
        write!(
            f,
            "compilation of {} failed with {count} error{}",
            self.entry.display(),
            if count == 1 { "" } else { "s" }
        )?;
        for diag in self.errors() {
            write!(f, "\n  {diag}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_errors_only() {
        let err = CompileError {
            entry: PathBuf::from("/p/main.ts"),
            diagnostics: vec![
                Diagnostic::warning("import cycle").with_code("W0001"),
                Diagnostic::error("unterminated comment").with_code("E0003"),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("compilation of /p/main.ts failed with 1 error"));
        assert!(text.contains("E0003"));
        assert!(!text.contains("W0001"));
    }
}
