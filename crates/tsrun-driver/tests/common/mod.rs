#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tsrun_compiler::{BuildError, CompilerOutput, CompilerService, ModuleLookup};
use tsrun_driver::{Runner, RunnerOptions, RuntimeConfig};

/// Compiles shell scripts: `#include <specifier>` lines are resolved through
/// the lookup and replaced with the included file's contents.
pub struct ShellCompiler;

impl CompilerService for ShellCompiler {
    fn compile(&self, entry: &Path, lookup: &mut dyn ModuleLookup) -> Result<CompilerOutput, BuildError> {
        let source = read(entry)?;
        let mut code = String::new();
        for line in source.lines() {
            match line.strip_prefix("#include ") {
                Some(specifier) => {
                    let resolved = lookup.resolve(entry, specifier.trim())?;
                    if let Some(path) = resolved.path() {
                        code.push_str(&read(path)?);
                        code.push('\n');
                    }
                }
                None => {
                    code.push_str(line);
                    code.push('\n');
                }
            }
        }
        Ok(CompilerOutput {
            code,
            diagnostics: Vec::new(),
        })
    }
}

fn read(path: &Path) -> Result<String, BuildError> {
    fs::read_to_string(path).map_err(|source| BuildError::Read {
        path: path.to_path_buf(),
        source,
    })
}

pub fn create_project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
    dir
}

/// Canonical path of `name` inside `dir`.
pub fn canonical(dir: &TempDir, name: &str) -> PathBuf {
    fs::canonicalize(dir.path().join(name)).unwrap()
}

pub fn sh_options() -> RunnerOptions {
    RunnerOptions::default().with_runtime(RuntimeConfig::new("/bin/sh").with_extension("sh"))
}

pub fn shell_runner(entry: impl Into<PathBuf>, options: RunnerOptions) -> Runner {
    Runner::with_compiler(entry, options, Arc::new(ShellCompiler))
}

pub fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Whether `pid` names a live process. Zombies count as gone.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat.contains(") Z "),
        Err(_) if Path::new("/proc/self").exists() => false,
        Err(_) => (unsafe { libc::kill(pid, 0) }) == 0,
    }
}

/// Poll until `pid` is gone or `timeout` elapses.
#[cfg(unix)]
pub async fn wait_until_gone(pid: i32, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    !process_alive(pid)
}
