use super::*;
use crate::backend::scripted::ScriptedBackend;
use crate::codec::OptionKind;
use std::path::Path;

fn fast_timeouts() -> HandshakeTimeouts {
    HandshakeTimeouts {
        uci: Duration::from_millis(150),
        ready: Duration::from_millis(150),
    }
}

fn started(backend: ScriptedBackend) -> EngineProcess<ScriptedBackend> {
    let mut engine = EngineProcess::with_backend(backend).with_timeouts(fast_timeouts());
    assert!(engine.start(Path::new("scripted")));
    engine
}

#[test]
fn test_handshake_captures_identity() {
    let mut engine = started(ScriptedBackend::engine("bestmove e2e4"));

    let handshake = engine.uci_handshake().expect("handshake");
    assert_eq!(
        handshake.identity,
        EngineIdentity {
            name: "X".to_string(),
            author: "Y".to_string()
        }
    );
    assert!(handshake.options.is_empty());
    assert_eq!(engine.state(), ProcessState::Ready);
    assert_eq!(engine.identity().name, "X");
    assert_eq!(engine.backend().written(), vec!["uci", "isready"]);
}

#[test]
fn test_handshake_collects_options_once_per_name() {
    let backend = ScriptedBackend::silent()
        .reply(
            "uci",
            &[
                "id name Stockfish 16",
                "id author the Stockfish developers",
                "option name Hash type spin default 16 min 1 max 33554432",
                "option name Ponder type check default false",
                "option name Hash type spin default 64 min 1 max 128",
                "uciok",
            ],
        )
        .reply("isready", &["readyok"]);
    let mut engine = started(backend);

    let handshake = engine.uci_handshake().expect("handshake");
    assert_eq!(handshake.identity.name, "Stockfish 16");
    assert_eq!(handshake.options.len(), 2);
    assert_eq!(handshake.options[0].name, "Hash");
    assert_eq!(handshake.options[0].default_int(), 16);
    assert_eq!(handshake.options[1].kind, OptionKind::Check);
}

#[test]
fn test_handshake_times_out_on_silent_engine() {
    let mut engine = started(ScriptedBackend::silent());

    let began = Instant::now();
    assert!(engine.uci_handshake().is_none());
    let elapsed = began.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(3));
    assert_ne!(engine.state(), ProcessState::Ready);
}

#[test]
fn test_handshake_times_out_without_readyok() {
    let backend = ScriptedBackend::silent().reply("uci", &["id name X", "uciok"]);
    let mut engine = started(backend);
    assert!(engine.uci_handshake().is_none());
    assert_eq!(engine.backend().written(), vec!["uci", "isready"]);
}

#[test]
fn test_handshake_fails_when_engine_exits() {
    let mut engine = started(ScriptedBackend::silent());
    engine.backend().stop();

    let began = Instant::now();
    assert!(engine.uci_handshake().is_none());
    assert!(began.elapsed() < Duration::from_secs(1));
}

#[test]
fn test_start_failure_leaves_engine_idle() {
    let mut engine = EngineProcess::with_backend(ScriptedBackend::failing());
    assert!(!engine.start(Path::new("missing")));
    assert_eq!(engine.state(), ProcessState::Idle);
    assert!(!engine.is_running());
}

#[test]
fn test_second_start_stops_first_child() {
    let mut engine = started(ScriptedBackend::engine("bestmove e2e4"));
    assert!(engine.uci_handshake().is_some());

    assert!(engine.start(Path::new("scripted")));
    assert_eq!(engine.backend().starts(), 2);
    assert_eq!(engine.backend().stops(), 1);
    assert!(engine.backend().written().contains(&"quit".to_string()));
    assert!(engine.is_running());

    // The fresh instance handshakes from a clean queue.
    assert!(engine.uci_handshake().is_some());
}

#[test]
fn test_search_commands_and_bestmove() {
    let mut engine = started(ScriptedBackend::engine("bestmove e2e4 ponder e7e5"));
    assert!(engine.uci_handshake().is_some());

    engine.set_option("Ponder", &OptionValue::Bool(true));
    engine.set_option("Threads", &OptionValue::Int(4));
    engine.set_option("Style", &OptionValue::Str("Wild Attack".to_string()));
    engine.new_game();
    engine.position(
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        &["e2e4".to_string(), "e7e5".to_string()],
    );
    engine.go_fixed_movetime(250);
    assert_eq!(engine.state(), ProcessState::Searching);

    assert_eq!(
        engine.wait_bestmove().as_deref(),
        Some("bestmove e2e4 ponder e7e5")
    );
    assert_eq!(engine.state(), ProcessState::Ready);

    let written = engine.backend().written();
    assert_eq!(
        &written[2..],
        &[
            "setoption name Ponder value true",
            "setoption name Threads value 4",
            "setoption name Style value Wild Attack",
            "ucinewgame",
            "isready",
            "position fen rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1 moves e2e4 e7e5",
            "go movetime 250",
        ]
    );
}

#[test]
fn test_go_variants_write_expected_commands() {
    let mut engine = started(ScriptedBackend::engine("bestmove a2a3"));
    engine.go_time(60000, 55000, 1000, 2000);
    assert!(engine.wait_bestmove().is_some());
    engine.go_fixed_depth(9);
    assert!(engine.wait_bestmove().is_some());
    engine.stop_search();

    assert_eq!(
        engine.backend().written(),
        vec![
            "go wtime 60000 btime 55000 winc 1000 binc 2000",
            "go depth 9",
            "stop",
        ]
    );
}

#[test]
fn test_bestmove_lines_are_consumed_in_order() {
    let mut engine = started(ScriptedBackend::silent());
    engine.backend().emit("info depth 1");
    engine.backend().emit("bestmove e2e4");
    engine.backend().emit("info depth 2");
    engine.backend().emit("bestmove d2d4");

    assert_eq!(engine.wait_bestmove().as_deref(), Some("bestmove e2e4"));
    assert_eq!(engine.wait_bestmove().as_deref(), Some("bestmove d2d4"));
    assert_eq!(
        engine.wait_bestmove_timeout(Duration::from_millis(50)),
        None
    );
}

#[test]
fn test_late_answer_to_abandoned_search_is_skipped() {
    let mut engine = started(ScriptedBackend::silent());
    engine.go_fixed_movetime(10_000);
    engine.stop_search();
    assert_eq!(engine.wait_bestmove_timeout(Duration::from_millis(30)), None);

    // The abandoned search answers only after the next one has started.
    engine.go_fixed_depth(4);
    engine.backend().emit("bestmove d2d4");
    engine.backend().emit("bestmove e2e4");
    assert_eq!(engine.wait_bestmove().as_deref(), Some("bestmove e2e4"));
    assert_eq!(engine.state(), ProcessState::Ready);
}

#[test]
fn test_timeout_outside_a_search_owes_nothing() {
    let mut engine = started(ScriptedBackend::silent());
    assert_eq!(engine.wait_bestmove_timeout(Duration::from_millis(20)), None);
    engine.backend().emit("bestmove g1f3");
    assert_eq!(engine.wait_bestmove().as_deref(), Some("bestmove g1f3"));
}

#[test]
fn test_wait_bestmove_returns_none_after_exit() {
    let mut engine = started(ScriptedBackend::silent());
    engine.go_fixed_movetime(100);
    engine.backend().stop();
    assert_eq!(engine.wait_bestmove(), None);
    assert!(!engine.is_running());
}

#[test]
fn test_wait_bestmove_unblocks_when_line_arrives_later() {
    let mut engine = started(ScriptedBackend::silent());
    let backend = engine.backend_handle();
    let emitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        backend.emit("bestmove g1f3");
    });
    assert_eq!(engine.wait_bestmove().as_deref(), Some("bestmove g1f3"));
    emitter.join().unwrap();
}

#[test]
fn test_stop_is_idempotent() {
    let mut engine = started(ScriptedBackend::engine("bestmove e2e4"));
    engine.stop();
    engine.stop();
    assert_eq!(engine.state(), ProcessState::Stopped);
    assert!(!engine.is_running());
    let quits = engine
        .backend()
        .written()
        .iter()
        .filter(|l| l.as_str() == "quit")
        .count();
    assert_eq!(quits, 1);

    let mut idle = EngineProcess::with_backend(ScriptedBackend::silent());
    idle.stop();
    assert_eq!(idle.state(), ProcessState::Stopped);
}

#[cfg(unix)]
mod native {
    use super::*;
    use crate::backend::scripted::{temp_dir, write_fake_engine};

    #[test]
    fn test_real_child_round_trip() {
        let dir = temp_dir("process");
        let path = write_fake_engine(&dir, "fake-engine");

        let mut engine = EngineProcess::new();
        assert!(engine.start(&path));
        let handshake = engine.uci_handshake().expect("handshake");
        assert_eq!(handshake.identity.name, "Fake Engine");
        assert_eq!(handshake.identity.author, "Tester");
        assert_eq!(handshake.options.len(), 2);

        engine.new_game();
        engine.position("8/8/8/8/8/8/8/K6k w - - 0 1", &[]);
        engine.go_fixed_movetime(10);
        assert_eq!(
            engine.wait_bestmove().as_deref(),
            Some("bestmove e2e4 ponder e7e5")
        );

        engine.stop();
        assert!(!engine.is_running());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_missing_binary_does_not_start() {
        let dir = temp_dir("missing");
        let mut engine = EngineProcess::new();
        assert!(!engine.start(&dir.join("no-such-engine")));
        assert_eq!(engine.state(), ProcessState::Idle);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_non_executable_file_does_not_start() {
        let dir = temp_dir("noexec");
        let path = dir.join("plain.txt");
        std::fs::write(&path, "not an engine").unwrap();
        let mut engine = EngineProcess::new();
        assert!(!engine.start(&path));
        let _ = std::fs::remove_dir_all(dir);
    }
}
