//! fork/exec backend for Unix-like systems.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};

use super::{ChildPipes, ProcessBackend, DEFAULT_STOP_GRACE};

pub struct UnixBackend {
    pipes: ChildPipes,
    grace: Duration,
}

impl UnixBackend {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_STOP_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            pipes: ChildPipes::default(),
            grace,
        }
    }
}

impl Default for UnixBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Regular file with at least one execute bit set.
fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

impl ProcessBackend for UnixBackend {
    fn start(&self, path: &Path) -> bool {
        if self.pipes.is_started() {
            self.stop();
        }
        if !is_executable(path) {
            debug!(engine = %path.display(), "not an executable file");
            return false;
        }
        // The child runs from its own folder, so a relative program path
        // would resolve against the wrong directory.
        let Ok(program) = path.canonicalize() else {
            return false;
        };

        let mut cmd = Command::new(&program);
        // Own process group: a Ctrl-C aimed at the host must not reach the
        // engine halfway through a protocol exchange.
        cmd.process_group(0);
        if let Some(dir) = program.parent() {
            cmd.current_dir(dir);
        }

        match self.pipes.spawn(cmd) {
            Ok(pid) => {
                info!(engine = %path.display(), pid, "engine started");
                true
            }
            Err(e) => {
                debug!(engine = %path.display(), error = %e, "failed to spawn engine");
                false
            }
        }
    }

    fn stop(&self) {
        self.pipes.shutdown(self.grace);
    }

    fn write(&self, bytes: &[u8]) -> bool {
        self.pipes.write(bytes)
    }

    fn read_line(&self, out: &mut String) -> bool {
        self.pipes.read_line(out)
    }
}

impl Drop for UnixBackend {
    fn drop(&mut self) {
        self.pipes.shutdown(Duration::ZERO);
    }
}
