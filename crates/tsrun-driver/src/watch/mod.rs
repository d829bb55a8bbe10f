//! Watch loop: rebuild (and re-run) when a dependency changes.
//!
//! ```text
//! Idle -> Building -> Watching -> (debounced change) -> Building -> ...
//!   any state -> Stopped
//! ```

mod source;

pub use source::{ChangeSource, ChangeTrigger, ChannelSource, NotifySource};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tsrun_compiler::DependencyManifest;

use crate::error::{RunnerError, WatchError};
use crate::executor::Output;
use crate::runner::Runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Building,
    Watching,
    Stopped,
}

/// Progress reported by a running watch loop.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A rebuild is starting; `changed` is empty for the initial build.
    BuildStarted { changed: Vec<PathBuf> },
    BuildSucceeded { manifest: Arc<DependencyManifest> },
    /// The previous output and subscriptions stay in place.
    BuildFailed { error: Arc<RunnerError> },
    ProcessSpawned { pid: Option<u32> },
    SpawnFailed { error: Arc<RunnerError> },
    ProcessExited { result: Result<Output, Arc<RunnerError>> },
    /// The change source refused the new subscription set.
    SubscribeFailed { error: Arc<WatchError> },
}

/// Owns a [`Runner`] and a [`ChangeSource`] until stopped.
pub struct WatchLoop<S> {
    runner: Runner,
    source: S,
    debounce: Duration,
    token: CancellationToken,
    state: watch::Sender<WatchState>,
    events: mpsc::UnboundedSender<WatchEvent>,
    subscribed: Option<BTreeSet<PathBuf>>,
    child_live: bool,
}

/// Control side of a spawned [`WatchLoop`].
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    state: watch::Receiver<WatchState>,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    task: JoinHandle<Runner>,
}

impl<S: ChangeSource> WatchLoop<S> {
    pub fn new(runner: Runner, source: S) -> Self {
        let debounce = runner.options().debounce;
        let (state, _) = watch::channel(WatchState::Idle);
        // replaced in spawn
        let (events, _) = mpsc::unbounded_channel();
        Self {
            runner,
            source,
            debounce,
            token: CancellationToken::new(),
            state,
            events,
            subscribed: None,
            child_live: false,
        }
    }

    pub fn spawn(mut self) -> WatchHandle {
        let (events, rx) = mpsc::unbounded_channel();
        self.events = events;
        let state = self.state.subscribe();
        let token = self.token.clone();
        let task = tokio::spawn(self.run());
        WatchHandle {
            token,
            state,
            events: rx,
            task,
        }
    }

    async fn run(mut self) -> Runner {
        let (sink, mut changes) = mpsc::unbounded_channel::<PathBuf>();
        let token = self.token.clone();
        info!(entry = %self.runner.target().display(), debounce_ms = self.debounce.as_millis() as u64, "watch started");

        'watch: {
            tokio::select! {
                _ = token.cancelled() => break 'watch,
                _ = self.rebuild(Vec::new()) => {}
            }

            loop {
                self.resubscribe(&sink);
                self.set_state(WatchState::Watching);

                let first = tokio::select! {
                    _ = token.cancelled() => break 'watch,
                    Some(path) = changes.recv() => path,
                    result = self.runner.wait(), if self.child_live => {
                        self.child_live = false;
                        debug!("child process exited");
                        self.emit(WatchEvent::ProcessExited { result: result.map_err(Arc::new) });
                        continue;
                    }
                };

                // trailing edge: restart the window on every event
                let mut changed = BTreeSet::from([first]);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break 'watch,
                        Some(path) = changes.recv() => {
                            changed.insert(path);
                        }
                        _ = tokio::time::sleep(self.debounce) => break,
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break 'watch,
                    _ = self.rebuild(changed.into_iter().collect()) => {}
                }
            }
        }

        self.shutdown().await;
        self.runner
    }

    async fn rebuild(&mut self, changed: Vec<PathBuf>) {
        self.set_state(WatchState::Building);
        if !changed.is_empty() {
            info!(files = changed.len(), "change detected, rebuilding");
        }
        self.emit(WatchEvent::BuildStarted { changed });

        let manifest = match self.runner.build().await {
            Ok(result) => Arc::clone(&result.manifest),
            Err(e) => {
                warn!(error = %e, "rebuild failed");
                self.emit(WatchEvent::BuildFailed { error: Arc::new(e) });
                return;
            }
        };
        self.emit(WatchEvent::BuildSucceeded { manifest });

        if !(self.runner.options().reexecute || self.runner.has_child()) {
            return;
        }
        match self.runner.spawn().await {
            Ok(pid) => {
                self.child_live = true;
                self.emit(WatchEvent::ProcessSpawned { pid });
            }
            Err(e) => {
                self.child_live = false;
                warn!(error = %e, "failed to start child process");
                self.emit(WatchEvent::SpawnFailed { error: Arc::new(e) });
            }
        }
    }

    /// Subscribe to the manifest plus the entry, when that set changed.
    fn resubscribe(&mut self, sink: &mpsc::UnboundedSender<PathBuf>) {
        let target = self.runner.target();
        let entry = std::fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        let mut paths: BTreeSet<PathBuf> = self
            .runner
            .manifest()
            .map(|m| m.iter().map(|p| p.to_path_buf()).collect())
            .unwrap_or_default();
        paths.insert(entry);

        if self.subscribed.as_ref() == Some(&paths) {
            return;
        }
        match self.source.subscribe(&paths, sink.clone()) {
            Ok(()) => self.subscribed = Some(paths),
            Err(e) => {
                warn!(error = %e, "failed to subscribe to changes");
                self.emit(WatchEvent::SubscribeFailed { error: Arc::new(e) });
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.source.unsubscribe() {
            debug!(error = %e, "unsubscribe failed");
        }
        if let Err(e) = self.runner.terminate().await {
            warn!(error = %e, "failed to terminate child process");
        }
        self.child_live = false;
        self.set_state(WatchState::Stopped);
        info!("watch stopped");
    }

    fn set_state(&self, state: WatchState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: WatchEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

impl WatchHandle {
    pub fn state(&self) -> WatchState {
        *self.state.borrow()
    }

    /// Wait until the loop reaches `state`. Returns the state actually
    /// reached, `Stopped` if the loop ended first.
    pub async fn wait_for(&mut self, state: WatchState) -> WatchState {
        match self
            .state
            .wait_for(|s| *s == state || *s == WatchState::Stopped)
            .await
        {
            Ok(reached) => *reached,
            Err(_) => WatchState::Stopped,
        }
    }

    /// Next event, `None` after the loop ended and every event was taken.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<WatchEvent> {
        self.events.try_recv().ok()
    }

    /// A token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop the loop and take the runner back.
    pub async fn stop(self) -> Result<Runner, WatchError> {
        self.token.cancel();
        self.join().await
    }

    /// Wait for the loop to end on its own (its token was cancelled).
    pub async fn join(self) -> Result<Runner, WatchError> {
        Ok(self.task.await?)
    }
}
