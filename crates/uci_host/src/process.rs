//! One UCI engine child process.
//!
//! [`EngineProcess`] owns the child through a [`ProcessBackend`], runs a reader
//! thread that sorts incoming lines into two queues, and implements the
//! handshake and search commands on top of them.
//!
//! The reader thread and callers share nothing but [`Shared`]: a mutex around
//! both queues and one condition variable per queue. Blocking calls are
//! condition-variable waits, never polling loops.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{lock, NativeBackend, ProcessBackend};
use crate::codec::{classify_line, is_bestmove_line, Command, EngineLine, GoLimit};
use crate::codec::{OptionDescriptor, OptionValue};
use crate::config::HostConfig;

/// Name and author an engine reports during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: String,
    pub author: String,
}

/// Everything learned from a successful `uci` / `isready` exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub identity: EngineIdentity,
    pub options: Vec<OptionDescriptor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Starting,
    Handshaking,
    Ready,
    Searching,
    Stopped,
}

/// Deadlines for the two halves of the handshake, measured from send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    /// `uci` until `uciok`
    pub uci: Duration,
    /// `isready` until `readyok`
    pub ready: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            uci: Duration::from_secs(5),
            ready: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct Queues {
    /// Every line the engine printed, oldest first
    lines: VecDeque<String>,
    /// The `bestmove` subset of `lines`
    bestmoves: VecDeque<String>,
    /// Reader alive and child not known to have exited
    running: bool,
}

#[derive(Default)]
struct Shared {
    queues: Mutex<Queues>,
    line_ready: Condvar,
    bestmove_ready: Condvar,
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, Queues> {
        lock(&self.queues)
    }

    fn mark_stopped(&self) {
        self.queues().running = false;
        self.line_ready.notify_all();
        self.bestmove_ready.notify_all();
    }
}

pub struct EngineProcess<B: ProcessBackend = NativeBackend> {
    backend: Arc<B>,
    shared: Arc<Shared>,
    reader: Option<JoinHandle<()>>,
    state: ProcessState,
    path: Option<PathBuf>,
    timeouts: HandshakeTimeouts,
    handshake: Handshake,
    /// `bestmove` lines still due from searches whose wait gave up
    abandoned_searches: usize,
}

impl EngineProcess<NativeBackend> {
    pub fn new() -> Self {
        Self::with_backend(NativeBackend::new())
    }

    /// Native backend with the grace period and handshake deadlines from `config`.
    pub fn from_config(config: &HostConfig) -> Self {
        Self::with_backend(NativeBackend::with_grace(config.stop_grace()))
            .with_timeouts(config.handshake_timeouts())
    }
}

impl Default for EngineProcess<NativeBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ProcessBackend> EngineProcess<B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            shared: Arc::new(Shared::default()),
            reader: None,
            state: ProcessState::Idle,
            path: None,
            timeouts: HandshakeTimeouts::default(),
            handshake: Handshake::default(),
            abandoned_searches: 0,
        }
    }

    pub fn with_timeouts(mut self, timeouts: HandshakeTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub(crate) fn backend_handle(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// True while the reader thread is alive and the child has not hung up.
    pub fn is_running(&self) -> bool {
        self.shared.queues().running
    }

    /// Identity captured by the last successful handshake.
    pub fn identity(&self) -> &EngineIdentity {
        &self.handshake.identity
    }

    /// Options captured by the last successful handshake.
    pub fn options(&self) -> &[OptionDescriptor] {
        &self.handshake.options
    }

    /// Spawn the engine and start the reader thread. A previous child, if
    /// any, is stopped first.
    pub fn start(&mut self, path: &Path) -> bool {
        let idle = matches!(self.state, ProcessState::Idle | ProcessState::Stopped);
        if self.reader.is_some() || !idle {
            self.stop();
        }
        let previous = self.state;
        self.state = ProcessState::Starting;

        if !self.backend.start(path) {
            warn!(engine = %path.display(), "failed to start engine");
            self.state = previous;
            return false;
        }

        {
            let mut queues = self.shared.queues();
            queues.lines.clear();
            queues.bestmoves.clear();
            queues.running = true;
        }

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("uci-reader".to_string())
            .spawn(move || reader_loop(backend.as_ref(), &shared));

        match spawned {
            Ok(handle) => {
                self.reader = Some(handle);
                self.path = Some(path.to_path_buf());
                self.handshake = Handshake::default();
                self.abandoned_searches = 0;
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to spawn reader thread");
                self.shared.mark_stopped();
                self.backend.stop();
                self.state = previous;
                false
            }
        }
    }

    /// Run `uci` ... `uciok`, then `isready` ... `readyok`.
    ///
    /// Returns `None` if either deadline passes or the engine goes away.
    pub fn uci_handshake(&mut self) -> Option<Handshake> {
        self.shared.queues().lines.clear();
        self.state = ProcessState::Handshaking;

        let mut result = Handshake::default();
        let mut have_name = false;
        let mut have_author = false;

        if !self.send(&Command::Uci) {
            return None;
        }
        let deadline = Instant::now() + self.timeouts.uci;
        loop {
            let Some(line) = self.next_line(deadline) else {
                warn!(engine = ?self.path, "no uciok before deadline");
                return None;
            };
            match classify_line(&line) {
                EngineLine::IdName(name) if !have_name => {
                    result.identity.name = name;
                    have_name = true;
                }
                EngineLine::IdAuthor(author) if !have_author => {
                    result.identity.author = author;
                    have_author = true;
                }
                EngineLine::Option(opt) => {
                    if result.options.iter().all(|o| o.name != opt.name) {
                        result.options.push(opt);
                    }
                }
                EngineLine::UciOk => break,
                _ => {}
            }
        }

        if !self.send(&Command::IsReady) {
            return None;
        }
        let deadline = Instant::now() + self.timeouts.ready;
        loop {
            let Some(line) = self.next_line(deadline) else {
                warn!(engine = ?self.path, "no readyok before deadline");
                return None;
            };
            if classify_line(&line) == EngineLine::ReadyOk {
                break;
            }
        }

        info!(
            name = %result.identity.name,
            author = %result.identity.author,
            options = result.options.len(),
            "handshake complete"
        );
        self.state = ProcessState::Ready;
        self.handshake = result.clone();
        Some(result)
    }

    pub fn set_option(&mut self, name: &str, value: &OptionValue) {
        self.send(&Command::SetOption {
            name: name.to_string(),
            value: value.clone(),
        });
    }

    /// `ucinewgame` followed by an `isready` nobody waits for here.
    pub fn new_game(&mut self) {
        self.send(&Command::UciNewGame);
        self.send(&Command::IsReady);
    }

    pub fn position(&mut self, fen: &str, moves: &[String]) {
        self.send(&Command::Position {
            fen: fen.to_string(),
            moves: moves.to_vec(),
        });
    }

    pub fn go_time(&mut self, wtime_ms: u64, btime_ms: u64, winc_ms: u64, binc_ms: u64) {
        self.go(GoLimit::Clock {
            wtime: wtime_ms,
            btime: btime_ms,
            winc: winc_ms,
            binc: binc_ms,
        });
    }

    pub fn go_fixed_movetime(&mut self, ms: u64) {
        self.go(GoLimit::MoveTime(ms));
    }

    pub fn go_fixed_depth(&mut self, depth: u32) {
        self.go(GoLimit::Depth(depth));
    }

    fn go(&mut self, limit: GoLimit) {
        // Nothing reads the general queue during a search; drop what the
        // previous one left behind so `info` spam does not pile up.
        self.shared.queues().lines.clear();
        if self.send(&Command::Go(limit)) {
            self.state = ProcessState::Searching;
        }
    }

    /// Ask for the search to end. The engine still owes a `bestmove` line.
    pub fn stop_search(&mut self) {
        self.send(&Command::Stop);
    }

    /// Block until a `bestmove` line is available and take it. `None` once
    /// the engine is gone with nothing pending.
    pub fn wait_bestmove(&mut self) -> Option<String> {
        let line = {
            let mut queues = self.shared.queues();
            loop {
                if let Some(line) = take_bestmove(&mut queues, &mut self.abandoned_searches) {
                    break Some(line);
                }
                if !queues.running {
                    break None;
                }
                queues = self
                    .shared
                    .bestmove_ready
                    .wait(queues)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };
        self.finish_search(line)
    }

    /// Like [`wait_bestmove`](Self::wait_bestmove) but gives up after `timeout`.
    ///
    /// A search given up on is remembered: its `bestmove`, whenever it turns
    /// up, is discarded instead of answering a later search.
    pub fn wait_bestmove_timeout(&mut self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let line = {
            let mut queues = self.shared.queues();
            loop {
                if let Some(line) = take_bestmove(&mut queues, &mut self.abandoned_searches) {
                    break Some(line);
                }
                let now = Instant::now();
                if !queues.running || now >= deadline {
                    break None;
                }
                queues = self
                    .shared
                    .bestmove_ready
                    .wait_timeout(queues, deadline - now)
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .0;
            }
        };
        if line.is_none() && self.is_running() && self.state == ProcessState::Searching {
            // The engine still owes this search's answer; it must not be
            // taken for the next one.
            warn!(engine = ?self.path, ?timeout, "no bestmove before deadline");
            self.abandoned_searches += 1;
        }
        self.finish_search(line)
    }

    fn finish_search(&mut self, line: Option<String>) -> Option<String> {
        if line.is_some() && self.state == ProcessState::Searching {
            self.state = ProcessState::Ready;
        }
        line
    }

    /// Send `quit`, terminate the child, join the reader and clear both
    /// queues. Does nothing harmful when called twice.
    pub fn stop(&mut self) {
        if self.reader.is_some() {
            self.send(&Command::Quit);
        }
        self.shared.mark_stopped();
        self.backend.stop();

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!("engine reader thread panicked");
            }
            info!(engine = ?self.path, "engine stopped");
        }

        let mut queues = self.shared.queues();
        queues.lines.clear();
        queues.bestmoves.clear();
        self.abandoned_searches = 0;
        self.state = ProcessState::Stopped;
    }

    fn send(&self, command: &Command) -> bool {
        let text = format!("{command}\n");
        debug!(">> {command}");
        let ok = self.backend.write(text.as_bytes());
        if !ok {
            debug!(%command, "engine did not accept command");
        }
        ok
    }

    /// Pop the oldest line, waiting until `deadline` for one to arrive.
    fn next_line(&self, deadline: Instant) -> Option<String> {
        let mut queues = self.shared.queues();
        loop {
            if let Some(line) = queues.lines.pop_front() {
                return Some(line);
            }
            let now = Instant::now();
            if !queues.running || now >= deadline {
                return None;
            }
            queues = self
                .shared
                .line_ready
                .wait_timeout(queues, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }
}

impl<B: ProcessBackend> Drop for EngineProcess<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pop the next `bestmove` line, skipping answers to abandoned searches.
fn take_bestmove(queues: &mut Queues, abandoned: &mut usize) -> Option<String> {
    while let Some(line) = queues.bestmoves.pop_front() {
        if *abandoned == 0 {
            return Some(line);
        }
        *abandoned -= 1;
        debug!(%line, "dropping answer to an abandoned search");
    }
    None
}

fn reader_loop<B: ProcessBackend>(backend: &B, shared: &Shared) {
    let mut buf = String::new();
    while backend.read_line(&mut buf) {
        let line = buf.trim_end_matches(['\r', '\n']).to_string();
        debug!("<< {line}");

        let mut queues = shared.queues();
        if !queues.running {
            break;
        }
        if is_bestmove_line(&line) {
            queues.bestmoves.push_back(line.clone());
            shared.bestmove_ready.notify_all();
        }
        queues.lines.push_back(line);
        shared.line_ready.notify_all();
    }
    shared.mark_stopped();
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod process_tests;
