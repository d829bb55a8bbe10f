//! Structured message channel to a child process.
//!
//! A Unix socket pair; the child's end becomes its fd 3 and the runtime is
//! told so through `NODE_CHANNEL_FD`. Both directions carry newline-delimited
//! JSON, which is what Node.js speaks with `NODE_CHANNEL_SERIALIZATION_MODE=json`.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The fd number the child sees its end of the channel on.
pub const CHILD_FD: i32 = 3;

/// `true` for the runtime's own control messages (`{"cmd": "NODE_..."}`).
pub fn is_internal(message: &Value) -> bool {
    message
        .get("cmd")
        .and_then(Value::as_str)
        .is_some_and(|cmd| cmd.starts_with("NODE_"))
}

/// Parent side of an open channel.
#[derive(Debug)]
pub struct IpcChannel {
    #[cfg(unix)]
    writer: tokio::net::unix::OwnedWriteHalf,
    incoming: mpsc::UnboundedReceiver<Value>,
    last: Arc<Mutex<Option<Value>>>,
    reader: JoinHandle<()>,
}

impl IpcChannel {
    /// Serialize `message` and write it as one line.
    pub async fn send(&mut self, message: &Value) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::io::AsyncWriteExt;

            let mut line = serde_json::to_vec(message)?;
            line.push(b'\n');
            self.writer.write_all(&line).await?;
            self.writer.flush().await
        }
        #[cfg(not(unix))]
        {
            let _ = message;
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "ipc"))
        }
    }

    /// Next message from the child; `None` once the child closed its end
    /// and every buffered message was taken.
    pub async fn recv(&mut self) -> Option<Value> {
        self.incoming.recv().await
    }

    /// The most recent message received, whether or not it was `recv`'d.
    pub fn last_message(&self) -> Option<Value> {
        self.last.lock().ok().and_then(|last| last.clone())
    }

    /// Completes when the child's end is closed and all input was read.
    pub(crate) fn reader_mut(&mut self) -> &mut JoinHandle<()> {
        &mut self.reader
    }
}

impl Drop for IpcChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(unix)]
pub use unix::{pair, ChildEnd};

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::os::unix::net::UnixStream;
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;
    use tokio::sync::mpsc;
    use tracing::{debug, trace};

    use super::{is_internal, IpcChannel, CHILD_FD};

    /// The child's end, alive until the child has been spawned.
    #[derive(Debug)]
    pub struct ChildEnd(OwnedFd);

    impl ChildEnd {
        /// Have `command` inherit this end as fd 3.
        pub fn install(&self, command: &mut Command) {
            let fd = self.0.as_raw_fd();
            command
                .env("NODE_CHANNEL_FD", CHILD_FD.to_string())
                .env("NODE_CHANNEL_SERIALIZATION_MODE", "json");

            // SAFETY: only async-signal-safe calls between fork and exec.
            unsafe {
                command.pre_exec(move || {
                    if fd == CHILD_FD {
                        // already in place; just let it survive exec
                        let flags = libc::fcntl(fd, libc::F_GETFD);
                        if flags == -1 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                            return Err(io::Error::last_os_error());
                        }
                    } else if libc::dup2(fd, CHILD_FD) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
    }

    /// Open a channel. Must run inside a tokio runtime.
    pub fn pair() -> io::Result<(IpcChannel, ChildEnd)> {
        let (parent, child) = UnixStream::pair()?;
        parent.set_nonblocking(true)?;
        let parent = tokio::net::UnixStream::from_std(parent)?;
        let (read_half, writer) = parent.into_split();

        let (tx, incoming) = mpsc::unbounded_channel();
        let last = Arc::new(Mutex::new(None));
        let last_seen = Arc::clone(&last);

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "ipc channel closed with error");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let message: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(error = %e, "ignoring malformed ipc message");
                        continue;
                    }
                };
                if is_internal(&message) {
                    trace!(?message, "ignoring runtime control message");
                    continue;
                }
                if let Ok(mut last) = last_seen.lock() {
                    *last = Some(message.clone());
                }
                // the handle may have stopped listening; `last` still records it
                let _ = tx.send(message);
            }
        });

        Ok((
            IpcChannel {
                writer,
                incoming,
                last,
                reader,
            },
            ChildEnd(OwnedFd::from(child)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_internal_messages() {
        assert!(is_internal(&json!({ "cmd": "NODE_HANDLE_ACK" })));
        assert!(!is_internal(&json!({ "cmd": "build" })));
        assert!(!is_internal(&json!("Hello")));
    }
}
