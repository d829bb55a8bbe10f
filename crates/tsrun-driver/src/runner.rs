//! The runner: build, transform and execute one entry file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};
use tsrun_compiler::{BuildResult, Compiler, CompilerService, DependencyManifest};

use crate::error::RunnerError;
use crate::executor::{ChildProcessHandle, Output, ProcessExecutor};
use crate::options::RunnerOptions;
use crate::transform::{run_stage, TransformPipeline, TransformStage};
use crate::watch::{ChangeSource, WatchHandle, WatchLoop};

/// Owns everything about one entry: the latest build, the registered
/// transforms, the live child process and the last execution's output.
///
/// Each operation is a separately invokable stage; `execute` does not build.
#[derive(Debug)]
pub struct Runner {
    target: PathBuf,
    options: RunnerOptions,
    compiler: Compiler,
    executor: ProcessExecutor,
    pipeline: TransformPipeline,
    build: Option<BuildResult>,
    child: Option<ChildProcessHandle>,
    output: Option<Output>,
}

impl Runner {
    /// A runner over the built-in script compiler.
    ///
    /// That compiler rewrites module syntax but passes everything else
    /// through untouched, so entries with type annotations need a real
    /// transpiler: build one with [`Runner::with_compiler`] and a
    /// `ScriptCompiler` over a `CommandTranspiler`, or pass `--transpiler`
    /// (`TSRUN_TRANSPILER`) on the command line.
    pub fn new(target: impl Into<PathBuf>, options: RunnerOptions) -> Self {
        Self::from_parts(target.into(), options, Compiler::default())
    }

    /// A runner that compiles through `service` instead of the built-in
    /// script compiler.
    pub fn with_compiler(target: impl Into<PathBuf>, options: RunnerOptions, service: Arc<dyn CompilerService>) -> Self {
        Self::from_parts(target.into(), options, Compiler::new(service))
    }

    fn from_parts(target: PathBuf, options: RunnerOptions, compiler: Compiler) -> Self {
        let executor = ProcessExecutor::new(&options);
        Self {
            target,
            options,
            compiler,
            executor,
            pipeline: TransformPipeline::new(),
            build: None,
            child: None,
            output: None,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Compile the entry and fold every registered transform over it.
    ///
    /// Nothing is published unless every step succeeds.
    pub async fn build(&mut self) -> Result<&BuildResult, RunnerError> {
        let compiler = self.compiler.clone();
        let pipeline = self.pipeline.clone();
        let target = self.target.clone();
        info!(entry = %target.display(), transforms = pipeline.len(), "building");

        let result = tokio::task::spawn_blocking(move || -> Result<BuildResult, RunnerError> {
            let built = compiler.compile(&target)?;
            if pipeline.is_empty() {
                return Ok(built);
            }
            let code = pipeline.apply(&built.output_code)?;
            Ok(built.with_output_code(code))
        })
        .await??;

        Ok(self.build.insert(result))
    }

    /// Register an infallible transform. See [`Runner::add_transform`].
    pub fn transform<F>(&mut self, f: F) -> Result<(), RunnerError>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.add_transform(TransformStage::new(f))
    }

    pub fn try_transform<F>(&mut self, f: F) -> Result<(), RunnerError>
    where
        F: Fn(&str) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.add_transform(TransformStage::fallible(f))
    }

    /// Apply `stage` to the current output and remember it for later builds.
    ///
    /// On failure the current output is untouched and the stage is not
    /// registered. Before the first build the stage is only registered.
    pub fn add_transform(&mut self, stage: TransformStage) -> Result<(), RunnerError> {
        if let Some(build) = self.build.as_mut() {
            let code = run_stage(&stage, self.pipeline.len(), &build.output_code)?;
            build.output_code = code;
        }
        self.pipeline.register(stage);
        debug!(transforms = self.pipeline.len(), "transform registered");
        Ok(())
    }

    /// Start the current output in a new child, replacing any previous one.
    ///
    /// Returns the child's pid when the platform reports one.
    pub async fn spawn(&mut self) -> Result<Option<u32>, RunnerError> {
        self.terminate().await?;
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| RunnerError::NotBuilt(self.target.clone()))?;
        let child = self
            .executor
            .spawn(&build.output_code, self.options.inter_process_communication)
            .await?;
        let pid = child.id();
        self.child = Some(child);
        Ok(pid)
    }

    /// Wait for the current child to exit and publish its output.
    ///
    /// With inter-process communication enabled, the last message the child
    /// sent is the output even if it also wrote to stdout. A failed
    /// execution clears the previous output.
    pub async fn wait(&mut self) -> Result<Output, RunnerError> {
        let child = self.child.as_mut().ok_or(RunnerError::NotRunning)?;
        match child.wait().await {
            Ok(output) => {
                self.output = Some(output.clone());
                Ok(output)
            }
            Err(e) => {
                self.output = None;
                Err(e.into())
            }
        }
    }

    /// Run the current output to completion.
    pub async fn execute(&mut self) -> Result<Output, RunnerError> {
        self.spawn().await?;
        self.wait().await
    }

    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), RunnerError> {
        let message = serde_json::to_value(message).map_err(|e| RunnerError::Ipc(e.to_string()))?;
        let child = self.child.as_mut().ok_or(RunnerError::NotRunning)?;
        child.send(&message).await?;
        Ok(())
    }

    /// Next message from the child, `None` once it closed the channel.
    pub async fn recv(&mut self) -> Result<Option<Value>, RunnerError> {
        let child = self.child.as_mut().ok_or(RunnerError::NotRunning)?;
        Ok(child.recv().await?)
    }

    /// Kill the current child, if any. Idempotent.
    pub async fn terminate(&mut self) -> Result<(), RunnerError> {
        if let Some(mut child) = self.child.take() {
            debug!(pid = child.id(), "terminating child process");
            child.kill().await?;
        }
        Ok(())
    }

    pub fn output_code(&self) -> Option<&str> {
        self.build.as_ref().map(|b| b.output_code.as_str())
    }

    pub fn build_result(&self) -> Option<&BuildResult> {
        self.build.as_ref()
    }

    /// Output of the last successful execution.
    ///
    /// With inter-process communication enabled this is the last message
    /// received, taking precedence over stdout.
    pub fn output(&self) -> Option<&Output> {
        self.output.as_ref()
    }

    pub fn manifest(&self) -> Option<Arc<DependencyManifest>> {
        self.build.as_ref().map(|b| Arc::clone(&b.manifest))
    }

    /// Whether a child has been spawned and not torn down.
    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Whether the current child is still running.
    pub fn is_running(&mut self) -> bool {
        self.child.as_mut().is_some_and(ChildProcessHandle::is_running)
    }

    pub fn child(&self) -> Option<&ChildProcessHandle> {
        self.child.as_ref()
    }

    /// Hand this runner to a watch loop driven by `source`.
    ///
    /// [`WatchHandle::stop`] gives the runner back.
    pub fn watch<S: ChangeSource>(self, source: S) -> WatchHandle {
        WatchLoop::new(self, source).spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_before_build_is_not_built() {
        let mut runner = Runner::new("main.ts", RunnerOptions::default());
        assert!(matches!(runner.spawn().await, Err(RunnerError::NotBuilt(_))));
        assert!(matches!(runner.wait().await, Err(RunnerError::NotRunning)));
        assert!(matches!(runner.recv().await, Err(RunnerError::NotRunning)));
        runner.terminate().await.unwrap();
    }

    #[test]
    fn test_transform_before_build_only_registers() {
        let mut runner = Runner::new("main.ts", RunnerOptions::default());
        runner.transform(|c| c.to_uppercase()).unwrap();
        assert!(runner.output_code().is_none());
        assert_eq!(runner.pipeline.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_publishes_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let mut runner = Runner::new(temp.path().join("absent.ts"), RunnerOptions::default());
        assert!(matches!(runner.build().await, Err(RunnerError::UnresolvedModule(_))));
        assert!(runner.output_code().is_none());
        assert!(runner.manifest().is_none());
    }
}
