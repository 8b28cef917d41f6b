//! Platform process backends.
//!
//! A backend spawns one child with its stdin and stdout (stderr merged into
//! stdout) on pipes, and exposes blocking write / read-line / stop. The
//! [`EngineProcess`](crate::EngineProcess) shares its backend with the reader
//! thread, so every method takes `&self` and the backend guards its own state.

use std::io::{BufRead, BufReader, PipeReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

#[cfg(test)]
pub(crate) mod scripted;
#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use unix::UnixBackend as NativeBackend;
#[cfg(windows)]
pub use windows::WindowsBackend as NativeBackend;

/// Default time a child gets to exit on its own after stdin is closed.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_millis(300);

/// How often `stop` checks whether the child has exited during the grace period.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Spawn-and-pipe contract shared by every platform.
pub trait ProcessBackend: Send + Sync + 'static {
    /// Spawn `path`. Returns false (with nothing left open) if it cannot run.
    fn start(&self, path: &std::path::Path) -> bool;

    /// Close stdin, give the child a grace period, then kill and reap it.
    /// Safe to call repeatedly or before any `start`.
    fn stop(&self);

    /// Write all of `bytes` to the child's stdin.
    fn write(&self, bytes: &[u8]) -> bool;

    /// Block until one line (newline included, or the final unterminated
    /// chunk) is available. False on EOF with nothing buffered or on error.
    fn read_line(&self, out: &mut String) -> bool;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Child process plus the pipe ends the parent keeps.
///
/// Both OS backends drive their child through this; they differ only in how
/// the `Command` is prepared before [`ChildPipes::spawn`].
#[derive(Default)]
pub(crate) struct ChildPipes {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<BufReader<PipeReader>>>,
}

impl ChildPipes {
    /// Wire stdin/stdout/stderr and spawn. `cmd` is consumed so the parent's
    /// copies of the child-side pipe ends are closed before anyone reads.
    pub(crate) fn spawn(&self, mut cmd: Command) -> std::io::Result<u32> {
        let (reader, writer) = std::io::pipe()?;
        cmd.stdin(Stdio::piped())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        let mut child = cmd.spawn()?;
        drop(cmd);

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        };

        let pid = child.id();
        *lock(&self.stdin) = Some(stdin);
        *lock(&self.stdout) = Some(BufReader::new(reader));
        *lock(&self.child) = Some(child);
        Ok(pid)
    }

    pub(crate) fn write(&self, bytes: &[u8]) -> bool {
        let mut guard = lock(&self.stdin);
        let Some(stdin) = guard.as_mut() else {
            return false;
        };
        match stdin.write_all(bytes).and_then(|()| stdin.flush()) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "write to engine failed");
                false
            }
        }
    }

    pub(crate) fn read_line(&self, out: &mut String) -> bool {
        let mut guard = lock(&self.stdout);
        let Some(reader) = guard.as_mut() else {
            return false;
        };
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => false,
            Ok(_) => {
                out.clear();
                out.push_str(&String::from_utf8_lossy(&buf));
                true
            }
            Err(e) => {
                debug!(error = %e, "read from engine failed");
                false
            }
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        lock(&self.child).is_some()
    }

    /// Close stdin, wait up to `grace` for a natural exit, then kill and reap.
    pub(crate) fn shutdown(&self, grace: Duration) {
        drop(lock(&self.stdin).take());

        if let Some(mut child) = lock(&self.child).take() {
            let pid = child.id();
            let deadline = Instant::now() + grace;
            let mut exited = false;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!(pid, %status, "engine exited");
                        exited = true;
                        break;
                    }
                    Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
                    Err(e) => {
                        warn!(pid, error = %e, "failed to poll engine process");
                        break;
                    }
                }
            }
            if !exited {
                info!(pid, "engine did not exit in time, killing it");
                let _ = child.kill();
            }
            let _ = child.wait();
        }

        // A reader blocked on the pipe holds this lock; it sees EOF now that
        // the child is gone and the next `spawn` replaces the reader anyway.
        match self.stdout.try_lock() {
            Ok(mut guard) => *guard = None,
            Err(TryLockError::Poisoned(poisoned)) => *poisoned.into_inner() = None,
            Err(TryLockError::WouldBlock) => {}
        }
    }
}
