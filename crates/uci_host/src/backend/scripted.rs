//! In-memory backend that plays back canned engine replies.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use super::{lock, ProcessBackend};

#[derive(Default)]
struct Pipe {
    running: bool,
    outbox: VecDeque<String>,
}

/// Answers each written command with the lines registered for its first word.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    replies: Vec<(String, Vec<String>)>,
    fail_start: bool,
    pipe: Mutex<Pipe>,
    ready: Condvar,
    written: Mutex<Vec<String>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ScriptedBackend {
    /// Backend that never says anything.
    pub(crate) fn silent() -> Self {
        Self::default()
    }

    /// A well-behaved engine named `X` by `Y` that plays `bestmove` on `go`.
    pub(crate) fn engine(bestmove: &str) -> Self {
        Self::silent()
            .reply("uci", &["id name X", "id author Y", "uciok"])
            .reply("isready", &["readyok"])
            .reply("go", &[bestmove])
    }

    pub(crate) fn reply(mut self, command: &str, lines: &[&str]) -> Self {
        self.replies.push((
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        ));
        self
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    /// Every line written so far, without the newline.
    pub(crate) fn written(&self) -> Vec<String> {
        lock(&self.written).clone()
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Emit a line as if the engine printed it unprompted.
    pub(crate) fn emit(&self, line: &str) {
        let mut pipe = lock(&self.pipe);
        pipe.outbox.push_back(line.to_string());
        self.ready.notify_all();
    }
}

impl ProcessBackend for ScriptedBackend {
    fn start(&self, _path: &Path) -> bool {
        if self.fail_start {
            return false;
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let mut pipe = lock(&self.pipe);
        pipe.running = true;
        pipe.outbox.clear();
        true
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut pipe = lock(&self.pipe);
        pipe.running = false;
        self.ready.notify_all();
    }

    fn write(&self, bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut pipe = lock(&self.pipe);
        if !pipe.running {
            return false;
        }
        for line in text.lines() {
            lock(&self.written).push(line.to_string());
            let word = line.split_whitespace().next().unwrap_or_default();
            for (command, lines) in &self.replies {
                if command == word {
                    pipe.outbox.extend(lines.iter().cloned());
                }
            }
        }
        self.ready.notify_all();
        true
    }

    fn read_line(&self, out: &mut String) -> bool {
        let mut pipe = lock(&self.pipe);
        loop {
            if let Some(line) = pipe.outbox.pop_front() {
                out.clear();
                out.push_str(&line);
                out.push_str("\r\n");
                return true;
            }
            if !pipe.running {
                return false;
            }
            pipe = self
                .ready
                .wait(pipe)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Write a `/bin/sh` UCI responder into `dir` and make it executable.
///
/// It answers the handshake as `Fake Engine` by `Tester` with one spin option
/// and replies `bestmove e2e4` to every `go`.
#[cfg(unix)]
pub(crate) fn write_fake_engine(dir: &Path, file_name: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    const SCRIPT: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci)
      echo "id name Fake Engine"
      echo "id author Tester"
      echo "option name Depth type spin default 3 min 1 max 8"
      echo "option name Style type combo default Solid var Solid var Wild"
      echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) echo "info depth 1 score cp 12"; echo "bestmove e2e4 ponder e7e5" ;;
    quit) exit 0 ;;
  esac
done
"#;
    std::fs::create_dir_all(dir).expect("create fake engine dir");
    let path = dir.join(file_name);
    std::fs::write(&path, SCRIPT).expect("write fake engine");
    let mut perms = std::fs::metadata(&path).expect("stat fake engine").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod fake engine");
    path
}

/// Fresh, empty directory under the system temp dir.
pub(crate) fn temp_dir(tag: &str) -> std::path::PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "uci_host-{tag}-{}-{n}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}
