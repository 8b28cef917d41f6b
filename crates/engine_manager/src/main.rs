//! Engine manager CLI
//!
//! Install, inspect and try out UCI engines kept in the host's registry.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uci_host::{
    default_data_dir, EngineEntry, EngineProcess, EngineRegistry, HostConfig, OptionKind,
};

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn print_usage() {
    println!("UCI engine manager");
    println!();
    println!("Usage:");
    println!("  engine_manager [--config FILE] [--data-dir DIR] <command> [args]");
    println!();
    println!("Commands:");
    println!("  list                      - List registered engines");
    println!("  show <id>                 - Show identity and options of an engine");
    println!("  install <path>            - Copy, probe and register an engine binary");
    println!("  remove <id>               - Unregister an installed engine and delete its copy");
    println!("  probe <path>              - Handshake with a binary without registering it");
    println!("  config <id>               - Print the default bot configuration as JSON");
    println!("  bestmove <id> [--fen F] [--movetime MS | --depth N]");
    println!("                            - Ask an engine for one move");
    println!();
    println!("Logging goes to stderr and is filtered with RUST_LOG (default: info).");
}

/// Global options that come before the command.
struct Globals {
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

fn split_globals(args: &[String]) -> Result<(Globals, &[String])> {
    let mut globals = Globals {
        config: None,
        data_dir: None,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                let value = args.get(i + 1).ok_or_else(|| anyhow!("--config needs a file"))?;
                globals.config = Some(PathBuf::from(value));
                i += 2;
            }
            "--data-dir" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("--data-dir needs a directory"))?;
                globals.data_dir = Some(PathBuf::from(value));
                i += 2;
            }
            _ => break,
        }
    }
    Ok((globals, &args[i..]))
}

fn load_config(globals: &Globals) -> Result<HostConfig> {
    let path = match &globals.config {
        Some(path) => path.clone(),
        None => globals
            .data_dir
            .clone()
            .unwrap_or_else(default_data_dir)
            .join("host.toml"),
    };
    let mut config = HostConfig::load(&path)?;
    if let Some(dir) = &globals.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

fn open_registry(config: HostConfig) -> Result<EngineRegistry> {
    let mut registry = EngineRegistry::new(config);
    registry.load().context("failed to load engine registry")?;
    Ok(registry)
}

fn required<'a>(args: &'a [String], what: &str) -> Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {what}"))
}

fn lookup<'a>(registry: &'a EngineRegistry, id: &str) -> Result<&'a EngineEntry> {
    registry
        .get(id)
        .ok_or_else(|| anyhow!("no engine with id {id:?}; see `engine_manager list`"))
}

fn run_list(registry: &EngineRegistry) {
    let engines = registry.list();
    if engines.is_empty() {
        println!("No engines registered.");
        return;
    }
    println!("{:<32} {:<8} {:<24} PATH", "ID", "KIND", "NAME");
    for entry in engines {
        println!(
            "{:<32} {:<8} {:<24} {}",
            entry.id(),
            if entry.builtin() { "builtin" } else { "external" },
            entry.reference.display_name,
            entry.reference.executable_path.display()
        );
    }
}

fn print_entry(entry: &EngineEntry) {
    println!("=== {} ===", entry.reference.display_name);
    println!("Id:       {}", entry.id());
    println!("Builtin:  {}", entry.builtin());
    if !entry.reference.version.is_empty() {
        println!("Version:  {}", entry.reference.version);
    }
    println!("Path:     {}", entry.reference.executable_path.display());
    println!("Engine:   {}", entry.identity.name);
    println!("Author:   {}", entry.identity.author);
    if entry.options.is_empty() {
        return;
    }
    println!();
    println!("Options:");
    for opt in &entry.options {
        match opt.kind {
            OptionKind::Button => println!("  {:<24} button", opt.name),
            OptionKind::Spin => println!(
                "  {:<24} spin   default {} [{}..{}]",
                opt.name, opt.default, opt.min, opt.max
            ),
            OptionKind::Combo => println!(
                "  {:<24} combo  default {} ({})",
                opt.name,
                opt.default,
                opt.choices.join(" | ")
            ),
            kind => println!("  {:<24} {:<6} default {}", opt.name, kind.as_str(), opt.default),
        }
    }
}

fn run_probe(registry: &EngineRegistry, path: &Path) -> Result<()> {
    let handshake = registry.probe(path)?;
    println!("Engine: {}", handshake.identity.name);
    println!("Author: {}", handshake.identity.author);
    println!("Options: {}", handshake.options.len());
    for opt in &handshake.options {
        println!("  {} ({})", opt.name, opt.kind);
    }
    Ok(())
}

fn run_bestmove(config: &HostConfig, entry: &EngineEntry, args: &[String]) -> Result<()> {
    let mut fen = START_FEN.to_string();
    let mut movetime: Option<u64> = None;
    let mut depth: Option<u32> = None;

    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--fen", Some(v)) => fen = v.clone(),
            ("--movetime" | "-t", Some(v)) => {
                movetime = Some(v.parse().with_context(|| format!("bad movetime {v:?}"))?)
            }
            ("--depth" | "-d", Some(v)) => {
                depth = Some(v.parse().with_context(|| format!("bad depth {v:?}"))?)
            }
            (flag, _) => bail!("unexpected argument {flag:?}"),
        }
        i += 2;
    }

    let path = &entry.reference.executable_path;
    let mut engine = EngineProcess::from_config(config);
    if !engine.start(path) {
        bail!("could not start {}", path.display());
    }
    if engine.uci_handshake().is_none() {
        bail!("{} did not complete the UCI handshake", path.display());
    }
    engine.new_game();
    engine.position(&fen, &[]);
    match (movetime, depth) {
        (Some(ms), _) => engine.go_fixed_movetime(ms),
        (None, Some(d)) => engine.go_fixed_depth(d),
        (None, None) => engine.go_fixed_movetime(config.default_movetime_ms),
    }
    let line = engine
        .wait_bestmove()
        .ok_or_else(|| anyhow!("engine exited before answering"))?;
    engine.stop();

    println!("{line}");
    Ok(())
}

fn run(args: &[String]) -> Result<()> {
    let (globals, rest) = split_globals(args)?;
    let Some((command, rest)) = rest.split_first() else {
        print_usage();
        return Ok(());
    };
    let config = load_config(&globals)?;
    debug!(%command, data_dir = %config.data_dir().display(), "running command");

    match command.as_str() {
        "list" | "ls" => run_list(&open_registry(config)?),
        "show" => {
            let registry = open_registry(config)?;
            print_entry(lookup(&registry, required(rest, "engine id")?)?);
        }
        "install" => {
            let mut registry = open_registry(config)?;
            let entry = registry.install_external(Path::new(required(rest, "engine path")?))?;
            println!("Installed {} as {}", entry.reference.display_name, entry.id());
        }
        "remove" | "rm" => {
            let mut registry = open_registry(config)?;
            let entry = registry.remove(required(rest, "engine id")?)?;
            println!("Removed {}", entry.id());
        }
        "probe" => {
            let registry = EngineRegistry::new(config);
            run_probe(&registry, Path::new(required(rest, "engine path")?))?;
        }
        "config" => {
            let registry = open_registry(config)?;
            let id = required(rest, "engine id")?;
            let bot = registry
                .make_default_bot_config(id)
                .ok_or_else(|| anyhow!("no engine with id {id:?}"))?;
            println!("{}", serde_json::to_string_pretty(&bot)?);
        }
        "bestmove" => {
            let registry = open_registry(config)?;
            let entry = lookup(&registry, required(rest, "engine id")?)?;
            run_bestmove(registry.config(), entry, &rest[1..])?;
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            print_usage();
            bail!("unknown command {other:?}");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    run(&args)
}
