//! CreateProcess backend for Windows.

use std::os::windows::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};

use super::{ChildPipes, ProcessBackend, DEFAULT_STOP_GRACE};

/// Console engines would otherwise pop up a window of their own.
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct WindowsBackend {
    pipes: ChildPipes,
    grace: Duration,
}

impl WindowsBackend {
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

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessBackend for WindowsBackend {
    fn start(&self, path: &Path) -> bool {
        if self.pipes.is_started() {
            self.stop();
        }
        if !path.is_file() {
            debug!(engine = %path.display(), "engine binary not found");
            return false;
        }
        // The child runs from its own folder, so a relative program path
        // would resolve against the wrong directory.
        let Ok(program) = path.canonicalize() else {
            return false;
        };

        let mut cmd = Command::new(&program);
        cmd.creation_flags(CREATE_NO_WINDOW);
        if let Some(dir) = program.parent() {
            cmd.current_dir(dir);
        }

        match self.pipes.spawn(cmd) {
            Ok(pid) => {
                info!(engine = %path.display(), pid, "engine started");
                true
            }
            Err(e) => {
                debug!(engine = %path.display(), error = %e, "CreateProcess failed");
                false
            }
        }
    }

    fn stop(&self) {
        // TerminateProcess is the only forced exit on this platform; the
        // grace period is what gives `quit` a chance first.
        self.pipes.shutdown(self.grace);
    }

    fn write(&self, bytes: &[u8]) -> bool {
        self.pipes.write(bytes)
    }

    fn read_line(&self, out: &mut String) -> bool {
        self.pipes.read_line(out)
    }
}

impl Drop for WindowsBackend {
    fn drop(&mut self) {
        self.pipes.shutdown(Duration::ZERO);
    }
}
