//! tsrun driver
//!
//! The [`Runner`] builds an entry file through the compiler adapter, folds
//! registered transforms over the output and executes it in a child process,
//! optionally with a JSON message channel. A [`watch`] loop rebuilds and
//! re-runs on change.

pub mod error;
pub mod executor;
pub mod ipc;
pub mod options;
pub mod runner;
pub mod transform;
pub mod watch;

pub use error::{ExecuteError, RunnerError, TransformError, WatchError};
pub use executor::{ChildProcessHandle, Output, ProcessExecutor};
pub use options::{RunnerOptions, RuntimeConfig};
pub use runner::Runner;
pub use transform::{TransformPipeline, TransformStage};
pub use watch::{ChangeSource, ChangeTrigger, ChannelSource, NotifySource, WatchEvent, WatchHandle, WatchState};
