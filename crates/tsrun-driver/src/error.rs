//! Driver errors

use std::path::PathBuf;

use thiserror::Error;
use tsrun_compiler::{BuildError, CompileError};
use tsrun_resolver::ResolveError;

/// A transform stage rejected the code.
#[derive(Debug, Error)]
#[error("transform stage {stage} failed: {source}")]
pub struct TransformError {
    /// Zero-based position of the stage in the pipeline.
    pub stage: usize,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The child exited unsuccessfully. `code` is `None` when it was killed
    /// by a signal.
    #[error("process exited with {}: {stderr}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Execution { code: Option<i32>, stderr: String },

    #[error("inter-process communication is not supported on this platform")]
    IpcUnsupported,

    #[error("ipc channel error: {0}")]
    Ipc(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    UnresolvedModule(ResolveError),

    #[error(transparent)]
    Compile(CompileError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with {}: {stderr}", .code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    Execution { code: Option<i32>, stderr: String },

    #[error("{} has not been built yet", .0.display())]
    NotBuilt(PathBuf),

    #[error("no child process is running")]
    NotRunning,

    #[error("ipc: {0}")]
    Ipc(String),

    #[error("build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<BuildError> for RunnerError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Resolve(e) => RunnerError::UnresolvedModule(e),
            BuildError::Compile(e) => RunnerError::Compile(e),
            BuildError::Read { path, source } => {
                RunnerError::Io(std::io::Error::new(source.kind(), format!("{}: {source}", path.display())))
            }
        }
    }
}

impl From<ExecuteError> for RunnerError {
    fn from(err: ExecuteError) -> Self {
        match err {
            ExecuteError::Spawn { program, source } => RunnerError::Spawn { program, source },
            ExecuteError::Execution { code, stderr } => RunnerError::Execution { code, stderr },
            ExecuteError::IpcUnsupported => RunnerError::Ipc(ExecuteError::IpcUnsupported.to_string()),
            ExecuteError::Ipc(message) => RunnerError::Ipc(message),
            ExecuteError::Io(e) => RunnerError::Io(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("watch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
