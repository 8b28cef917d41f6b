//! Engine-backed player: "propose a move for this position".
//!
//! An [`EnginePlayer`] starts and configures its engine once, then answers
//! each [`request_move`](EnginePlayer::request_move) on a short-lived worker
//! thread. The host polls or awaits the returned [`MoveRequest`].

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::{lock, NativeBackend, ProcessBackend};
use crate::codec::{match_legal_move, parse_bestmove, OptionValue};
use crate::config::HostConfig;
use crate::process::{EngineIdentity, EngineProcess};
use crate::registry::EngineReference;
use crate::types::{Move, PositionSnapshot};

/// How long the engine may think per move. At most one field is set; with
/// neither, the host's default move time applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchLimits {
    pub movetime_ms: Option<u64>,
    pub depth: Option<u32>,
}

impl SearchLimits {
    pub fn movetime(ms: u64) -> Self {
        Self {
            movetime_ms: Some(ms),
            depth: None,
        }
    }

    pub fn depth(depth: u32) -> Self {
        Self {
            movetime_ms: None,
            depth: Some(depth),
        }
    }
}

/// Everything needed to start and configure one engine for a game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub engine: EngineReference,
    pub limits: SearchLimits,
    #[serde(default)]
    pub option_values: BTreeMap<String, OptionValue>,
}

/// Shared cancellation flag. Cheap to clone; all clones see the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Pending answer to one [`EnginePlayer::request_move`] call.
///
/// Resolves to `None` when the engine has no move for us: cancelled,
/// unusable, gone, or answering with something that is not legal here.
pub struct MoveRequest {
    rx: oneshot::Receiver<Option<Move>>,
    resolved: Option<Option<Move>>,
}

impl MoveRequest {
    fn resolved(mv: Option<Move>) -> Self {
        let (_tx, rx) = oneshot::channel();
        Self {
            rx,
            resolved: Some(mv),
        }
    }

    /// `Some(answer)` once the worker is done, `None` while it still thinks.
    pub fn try_result(&mut self) -> Option<Option<Move>> {
        if self.resolved.is_none() {
            match self.rx.try_recv() {
                Ok(mv) => self.resolved = Some(mv),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => self.resolved = Some(None),
            }
        }
        self.resolved
    }

    /// Block the current thread until the answer is in. Must not be called
    /// from inside an async runtime; `.await` the request there instead.
    pub fn wait(mut self) -> Option<Move> {
        match self.resolved.take() {
            Some(mv) => mv,
            None => self.rx.blocking_recv().ok().flatten(),
        }
    }
}

impl Future for MoveRequest {
    type Output = Option<Move>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(mv) = self.resolved {
            return Poll::Ready(mv);
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(result) => {
                let mv = result.ok().flatten();
                self.resolved = Some(mv);
                Poll::Ready(mv)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct EnginePlayer<B: ProcessBackend = NativeBackend> {
    engine: Arc<Mutex<EngineProcess<B>>>,
    functional: bool,
    limits: SearchLimits,
    fallback_movetime_ms: u64,
    bestmove_timeout: Option<Duration>,
    identity: EngineIdentity,
}

impl EnginePlayer<NativeBackend> {
    pub fn new(config: &BotConfiguration, host: &HostConfig) -> Self {
        Self::with_process(config, host, EngineProcess::from_config(host))
    }
}

impl<B: ProcessBackend> EnginePlayer<B> {
    /// Start, handshake and configure `engine` for `config`. Never fails: an
    /// engine that does not come up leaves a player that always passes.
    pub fn with_process(
        config: &BotConfiguration,
        host: &HostConfig,
        mut engine: EngineProcess<B>,
    ) -> Self {
        let path = &config.engine.executable_path;
        let mut identity = EngineIdentity::default();

        let functional = if path.as_os_str().is_empty() {
            warn!(id = %config.engine.engine_id, "engine has no executable path");
            false
        } else if !engine.start(path) {
            false
        } else if let Some(handshake) = engine.uci_handshake() {
            for (name, value) in &config.option_values {
                let declared = handshake.options.iter().find(|o| &o.name == name);
                if declared.is_some_and(|opt| !opt.accepts(value)) {
                    warn!(option = %name, %value, "value does not fit the engine's option, skipping");
                    continue;
                }
                engine.set_option(name, value);
            }
            engine.new_game();
            identity = handshake.identity;
            true
        } else {
            engine.stop();
            false
        };

        Self {
            engine: Arc::new(Mutex::new(engine)),
            functional,
            limits: config.limits,
            fallback_movetime_ms: host.default_movetime_ms,
            bestmove_timeout: host.bestmove_timeout(),
            identity,
        }
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    /// Ask the engine for a move in `position` on a worker thread.
    ///
    /// `cancel` is looked at twice: when the request starts (an already
    /// cancelled request still searches, but is told to stop at once) and
    /// after the engine answered (a cancelled answer is thrown away). The
    /// engine's `bestmove` line is always read so the next request starts
    /// from a clean protocol state.
    pub fn request_move(&self, position: PositionSnapshot, cancel: CancelToken) -> MoveRequest {
        if !self.functional {
            return MoveRequest::resolved(None);
        }

        let (tx, rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let limits = self.limits;
        let fallback_movetime_ms = self.fallback_movetime_ms;
        let bestmove_timeout = self.bestmove_timeout;

        let spawned = thread::Builder::new()
            .name("engine-move".to_string())
            .spawn(move || {
                let mut engine = lock(&engine);
                engine.position(&position.fen, &[]);
                match (limits.movetime_ms, limits.depth) {
                    (Some(ms), _) => engine.go_fixed_movetime(ms),
                    (None, Some(depth)) => engine.go_fixed_depth(depth),
                    (None, None) => engine.go_fixed_movetime(fallback_movetime_ms),
                }

                let stop_sent = cancel.is_cancelled();
                if stop_sent {
                    engine.stop_search();
                }
                let line = match bestmove_timeout {
                    Some(timeout) if stop_sent => engine.wait_bestmove_timeout(timeout),
                    _ => engine.wait_bestmove(),
                };
                drop(engine);

                let _ = tx.send(resolve_bestmove(line, &position, &cancel));
            });

        if let Err(e) = spawned {
            warn!(error = %e, "failed to spawn move worker");
        }
        MoveRequest { rx, resolved: None }
    }
}

fn resolve_bestmove(
    line: Option<String>,
    position: &PositionSnapshot,
    cancel: &CancelToken,
) -> Option<Move> {
    if cancel.is_cancelled() {
        debug!(?line, "move request cancelled, discarding answer");
        return None;
    }
    let best = parse_bestmove(line.as_deref()?)?;
    let mv = match_legal_move(&best.mv, &position.legal_moves);
    if mv.is_none() {
        warn!(bestmove = %best.mv, fen = %position.fen, "engine proposed an illegal move");
    }
    mv
}

#[cfg(test)]
#[path = "player_tests.rs"]
mod player_tests;
