//! Runner configuration

use std::path::PathBuf;
use std::time::Duration;

/// The program that executes built scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub program: String,
    /// Arguments placed before the script path.
    pub args: Vec<String>,
    /// Extension of the transient script file, without the dot.
    pub extension: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: Vec::new(),
            extension: "cjs".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Open a structured message channel to the child.
    pub inter_process_communication: bool,
    /// The caller intends to drive a watch loop.
    pub watch: bool,
    pub runtime: RuntimeConfig,
    /// Forwarded to the child after the script path.
    pub args: Vec<String>,
    /// Child working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Tee child stdout/stderr to ours while capturing.
    pub echo: bool,
    /// Watch debounce window.
    pub debounce: Duration,
    /// Respawn the child after each successful watch rebuild.
    pub reexecute: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            inter_process_communication: false,
            watch: false,
            runtime: RuntimeConfig::default(),
            args: Vec::new(),
            cwd: None,
            echo: false,
            debounce: Duration::from_millis(100),
            reexecute: true,
        }
    }
}

impl RunnerOptions {
    pub fn with_ipc(mut self, enabled: bool) -> Self {
        self.inter_process_communication = enabled;
        self
    }

    pub fn with_watch(mut self, enabled: bool) -> Self {
        self.watch = enabled;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeConfig) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_reexecute(mut self, reexecute: bool) -> Self {
        self.reexecute = reexecute;
        self
    }
}
