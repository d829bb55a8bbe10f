//! Type stripping.
//!
//! The script compiler does not understand type annotations; it hands every
//! TypeScript-family file to a [`Transpiler`] first. The transpiler is a black
//! box: either nothing at all ([`Passthrough`], for sources that are already
//! plain JavaScript) or an external command such as `esbuild --loader=ts`.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::diagnostic::Diagnostic;

pub const TRANSPILER_FAILED: &str = "E0010";

pub trait Transpiler: Send + Sync {
    fn transpile(&self, path: &Path, source: &str) -> Result<String, Vec<Diagnostic>>;
}

/// Returns the source unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transpiler for Passthrough {
    fn transpile(&self, _path: &Path, source: &str) -> Result<String, Vec<Diagnostic>> {
        Ok(source.to_string())
    }
}

/// Runs an external program with the source on stdin and reads JavaScript
/// from its stdout. Only `.ts`, `.tsx`, `.mts` and `.cts` files are sent.
#[derive(Debug, Clone)]
pub struct CommandTranspiler {
    program: String,
    args: Vec<String>,
}

impl CommandTranspiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split a shell-style command line on whitespace.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn failure(&self, path: &Path, message: String) -> Vec<Diagnostic> {
        vec![Diagnostic::error(format!("{}: {message}", self.program))
            .with_code(TRANSPILER_FAILED)
            .with_file(path)]
    }
}

fn is_typescript(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("ts" | "tsx" | "mts" | "cts")
    )
}

impl Transpiler for CommandTranspiler {
    fn transpile(&self, path: &Path, source: &str) -> Result<String, Vec<Diagnostic>> {
        if !is_typescript(path) {
            return Ok(source.to_string());
        }
        debug!(program = %self.program, file = %path.display(), "transpiling");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.failure(path, format!("failed to start: {e}")))?;

        // stdin is fed from a second thread so a chatty child cannot fill its
        // stdout pipe while we are still writing
        let stdin = child.stdin.take();
        let output = std::thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(mut stdin) = stdin {
                    // a child that exits early closes the pipe; its status reports why
                    let _ = stdin.write_all(source.as_bytes());
                }
            });
            child.wait_with_output()
        })
        .map_err(|e| self.failure(path, format!("failed to run: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.failure(path, format!("exited with {}: {}", output.status, stderr.trim())));
        }

        String::from_utf8(output.stdout).map_err(|_| self.failure(path, "produced non-UTF-8 output".to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        assert_eq!(Passthrough.transpile(Path::new("a.ts"), "let a = 1").unwrap(), "let a = 1");
    }

    #[test]
    fn test_command_transpiler_pipes_typescript_only() {
        let upper = CommandTranspiler::from_command_line("tr a-z A-Z").unwrap();
        assert_eq!(upper.transpile(Path::new("a.ts"), "abc").unwrap(), "ABC");
        assert_eq!(upper.transpile(Path::new("a.js"), "abc").unwrap(), "abc");
    }

    #[test]
    fn test_command_failure_is_a_diagnostic() {
        let failing = CommandTranspiler::new("sh", vec!["-c".into(), "echo bad types >&2; exit 3".into()]);
        let diags = failing.transpile(Path::new("a.ts"), "x").unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(TRANSPILER_FAILED));
        assert!(diags[0].message.contains("bad types"));
    }
}
