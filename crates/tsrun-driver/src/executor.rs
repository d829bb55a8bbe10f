//! Process executor: runs built code in a child process.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecuteError;
use crate::ipc::IpcChannel;
use crate::options::{RunnerOptions, RuntimeConfig};

/// How long pipe readers may keep draining after the process exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Result of a finished execution.
///
/// When the message channel is enabled and the child sent at least one
/// message, the last message is the output even if the child also printed
/// to stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Captured stdout.
    Text(String),
    /// Last message received over the channel.
    Message(Value),
}

impl Output {
    /// The text form: stdout, or a string message's contents.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Output::Text(text) => Some(text),
            Output::Message(Value::String(text)) => Some(text),
            Output::Message(_) => None,
        }
    }
}

impl PartialEq<str> for Output {
    fn eq(&self, other: &str) -> bool {
        self.as_text() == Some(other)
    }
}

impl PartialEq<&str> for Output {
    fn eq(&self, other: &&str) -> bool {
        self.as_text() == Some(*other)
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Text(text) => f.write_str(text),
            Output::Message(Value::String(text)) => f.write_str(text),
            Output::Message(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Spawns runtime processes for built code.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    runtime: RuntimeConfig,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    echo: bool,
}

impl ProcessExecutor {
    pub fn new(options: &RunnerOptions) -> Self {
        Self {
            runtime: options.runtime.clone(),
            args: options.args.clone(),
            cwd: options.cwd.clone(),
            echo: options.echo,
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    /// Write `code` to a temporary script and start the runtime on it.
    pub async fn spawn(&self, code: &str, ipc: bool) -> Result<ChildProcessHandle, ExecuteError> {
        if ipc && cfg!(not(unix)) {
            return Err(ExecuteError::IpcUnsupported);
        }

        let script = tempfile::Builder::new()
            .prefix("tsrun-")
            .suffix(&format!(".{}", self.runtime.extension))
            .tempfile()?;
        tokio::fs::write(script.path(), code).await?;

        let mut command = Command::new(&self.runtime.program);
        command
            .args(&self.runtime.args)
            .arg(script.path())
            .args(&self.args)
            .stdin(if self.echo { Stdio::inherit() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        #[cfg(unix)]
        let (channel, child_end) = if ipc {
            let (channel, child_end) = crate::ipc::pair()?;
            child_end.install(&mut command);
            (Some(channel), Some(child_end))
        } else {
            (None, None)
        };
        #[cfg(not(unix))]
        let channel: Option<IpcChannel> = None;

        // Create new process group so we can kill entire tree
        let mut child = command.group_spawn().map_err(|source| ExecuteError::Spawn {
            program: self.runtime.program.clone(),
            source,
        })?;
        // our copy of the child's end must close, or EOF never arrives
        #[cfg(unix)]
        drop(child_end);

        let pid = child.id();
        info!(
            program = %self.runtime.program,
            script = %script.path().display(),
            pid,
            ipc,
            "spawned child process"
        );

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let mut readers = Vec::new();
        if let Some(out) = child.inner().stdout.take() {
            readers.push(capture(out, Arc::clone(&stdout), self.echo.then_some(Stream::Stdout)));
        }
        if let Some(err) = child.inner().stderr.take() {
            readers.push(capture(err, Arc::clone(&stderr), self.echo.then_some(Stream::Stderr)));
        }

        Ok(ChildProcessHandle {
            child,
            pid,
            _script: script,
            stdout,
            stderr,
            readers,
            ipc: channel,
            status: None,
        })
    }
}

fn capture<R>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>, echo: Option<Stream>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "child pipe closed with error");
                    break;
                }
            };
            if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(&chunk[..n]);
            }
            // echo failures only affect our own terminal
            let _ = match echo {
                Some(Stream::Stdout) => tokio::io::stdout().write_all(&chunk[..n]).await,
                Some(Stream::Stderr) => tokio::io::stderr().write_all(&chunk[..n]).await,
                None => Ok(()),
            };
        }
    })
}

fn snapshot(buf: &Mutex<Vec<u8>>) -> String {
    buf.lock()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// One running (or finished) execution.
///
/// Owns the process group, the transient script file, the captured output
/// and the message channel. Dropping the handle kills whatever is left of
/// the group.
pub struct ChildProcessHandle {
    child: AsyncGroupChild,
    pid: Option<u32>,
    _script: NamedTempFile,
    stdout: Arc<Mutex<Vec<u8>>>,
    stderr: Arc<Mutex<Vec<u8>>>,
    readers: Vec<JoinHandle<()>>,
    ipc: Option<IpcChannel>,
    status: Option<ExitStatus>,
}

impl fmt::Debug for ChildProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcessHandle")
            .field("pid", &self.pid)
            .field("ipc", &self.ipc.is_some())
            .field("status", &self.status)
            .finish()
    }
}

impl ChildProcessHandle {
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_ipc(&self) -> bool {
        self.ipc.is_some()
    }

    pub async fn send(&mut self, message: &Value) -> Result<(), ExecuteError> {
        let channel = self
            .ipc
            .as_mut()
            .ok_or_else(|| ExecuteError::Ipc("inter-process communication is not enabled".to_string()))?;
        channel
            .send(message)
            .await
            .map_err(|e| ExecuteError::Ipc(e.to_string()))
    }

    /// Next message from the child, `None` once the channel closed.
    pub async fn recv(&mut self) -> Result<Option<Value>, ExecuteError> {
        let channel = self
            .ipc
            .as_mut()
            .ok_or_else(|| ExecuteError::Ipc("inter-process communication is not enabled".to_string()))?;
        Ok(channel.recv().await)
    }

    pub fn stdout_text(&self) -> String {
        snapshot(&self.stdout)
    }

    pub fn stderr_text(&self) -> String {
        snapshot(&self.stderr)
    }

    /// Whether the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /// Wait for the process to exit and collect its output.
    ///
    /// Cancel-safe: dropping the future leaves the handle waitable.
    pub async fn wait(&mut self) -> Result<Output, ExecuteError> {
        let status = match self.status {
            Some(status) => status,
            None => {
                let status = self.child.wait().await?;
                self.status = Some(status);
                status
            }
        };

        // pop only after the await so a dropped future leaves the rest queued
        while let Some(reader) = self.readers.last_mut() {
            if tokio::time::timeout(DRAIN_GRACE, &mut *reader).await.is_err() {
                warn!(pid = self.pid, "child output still open after exit; detaching reader");
                reader.abort();
            }
            self.readers.pop();
        }
        if let Some(channel) = &mut self.ipc {
            let reader = channel.reader_mut();
            if !reader.is_finished() {
                // a grandchild may hold the channel open
                let _ = tokio::time::timeout(DRAIN_GRACE, async {
                    while !reader.is_finished() {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                })
                .await;
            }
        }

        debug!(pid = self.pid, %status, "child process exited");
        if !status.success() {
            return Err(ExecuteError::Execution {
                code: status.code(),
                stderr: self.stderr_text(),
            });
        }

        if let Some(message) = self.ipc.as_ref().and_then(IpcChannel::last_message) {
            return Ok(Output::Message(message));
        }
        Ok(Output::Text(self.stdout_text()))
    }

    /// Kill the whole process group and reap the leader.
    ///
    /// The group is signalled even after the leader exited, so background
    /// processes the script started do not outlive the handle.
    pub async fn kill(&mut self) -> Result<(), ExecuteError> {
        debug!(pid = self.pid, "killing child process group");
        self.signal_group();
        if self.status.is_none() {
            self.status = Some(self.child.wait().await?);
        }
        Ok(())
    }

    /// The group id is the leader's pid; it stays valid while any member lives.
    #[cfg(unix)]
    fn signal_group(&mut self) {
        let Some(pgid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return;
        };
        // SAFETY: killpg has no memory-safety preconditions.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
            let err = std::io::Error::last_os_error();
            // ESRCH: every member is already gone
            if err.raw_os_error() != Some(libc::ESRCH) {
                debug!(pgid, error = %err, "failed to signal process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self) {
        if self.status.is_none() {
            let _ = self.child.start_kill();
        }
    }
}

impl Drop for ChildProcessHandle {
    fn drop(&mut self) {
        self.signal_group();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh() -> ProcessExecutor {
        let options = RunnerOptions::default().with_runtime(RuntimeConfig::new("/bin/sh").with_extension("sh"));
        ProcessExecutor::new(&options)
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let mut child = sh().spawn("echo hello", false).await.unwrap();
        assert_eq!(child.wait().await.unwrap(), Output::Text("hello\n".to_string()));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_execution_error() {
        let mut child = sh().spawn("echo boom >&2; exit 3", false).await.unwrap();
        match child.wait().await.unwrap_err() {
            ExecuteError::Execution { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let options = RunnerOptions::default().with_runtime(RuntimeConfig::new("/definitely/not/a/runtime"));
        let err = ProcessExecutor::new(&options).spawn("", false).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_script_file_lives_with_the_handle() {
        let mut child = sh().spawn("echo \"$0\"", false).await.unwrap();
        let path = match child.wait().await.unwrap() {
            Output::Text(text) => PathBuf::from(text.trim()),
            other => panic!("unexpected output: {other:?}"),
        };
        assert!(path.starts_with(std::env::temp_dir()));
        assert_eq!(path.extension().unwrap(), "sh");
        assert!(path.exists());
        drop(child);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ipc_message_wins_over_stdout() {
        let mut child = sh()
            .spawn("echo printed; printf '\"Hello\"\\n' >&3", true)
            .await
            .unwrap();
        let output = child.wait().await.unwrap();
        assert_eq!(output, "Hello");
        assert_eq!(child.stdout_text(), "printed\n");
    }

    #[tokio::test]
    async fn test_ipc_internal_messages_are_ignored() {
        let mut child = sh()
            .spawn("printf '{\"n\":1}\\n{\"cmd\":\"NODE_HANDLE\"}\\n' >&3", true)
            .await
            .unwrap();
        assert_eq!(child.wait().await.unwrap(), Output::Message(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn test_ipc_round_trip() {
        let mut child = sh()
            .spawn("read line <&3; printf '{\"echo\":%s}\\n' \"$line\" >&3", true)
            .await
            .unwrap();
        child.send(&json!({ "ping": true })).await.unwrap();
        let reply = child.recv().await.unwrap().unwrap();
        assert_eq!(reply, json!({ "echo": { "ping": true } }));
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_terminates_group() {
        let mut child = sh().spawn("sleep 30", false).await.unwrap();
        assert!(child.is_running());
        child.kill().await.unwrap();
        assert!(!child.is_running());
    }

    #[tokio::test]
    async fn test_send_without_ipc_fails() {
        let mut child = sh().spawn("true", false).await.unwrap();
        assert!(matches!(child.send(&json!(1)).await, Err(ExecuteError::Ipc(_))));
        child.wait().await.unwrap();
    }
}
