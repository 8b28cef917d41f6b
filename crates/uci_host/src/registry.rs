//! Persistent catalog of known engines.
//!
//! Built-in engines ship with the host and are registered by id; external
//! engines are copied into the engines directory and probed once with a
//! handshake. Everything is kept in a small block file that is easy to read
//! and diff:
//!
//! ```text
//! [engine stockfish]
//! builtin=true
//! exe=/opt/host/engines/stockfish
//! name=Stockfish
//! version=16
//! id_name=Stockfish 16
//! id_author=the Stockfish developers
//! opt:Hash=option name Hash type spin default 16 min 1 max 33554432
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::backend::{NativeBackend, ProcessBackend};
use crate::codec::{parse_option_line, serialize_option_line, OptionDescriptor};
use crate::config::HostConfig;
use crate::player::{BotConfiguration, SearchLimits};
use crate::process::{EngineIdentity, EngineProcess, Handshake};

/// Portable pointer to one engine install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineReference {
    pub builtin: bool,
    pub engine_id: String,
    pub executable_path: PathBuf,
    pub display_name: String,
    pub version: String,
}

/// One row of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEntry {
    pub reference: EngineReference,
    pub identity: EngineIdentity,
    pub options: Vec<OptionDescriptor>,
}

impl EngineEntry {
    pub fn id(&self) -> &str {
        &self.reference.engine_id
    }

    pub fn builtin(&self) -> bool {
        self.reference.builtin
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("engine binary not found: {0}")]
    SourceMissing(PathBuf),
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("could not start engine {0}")]
    SpawnFailed(PathBuf),
    #[error("engine {0} did not complete the UCI handshake")]
    HandshakeFailed(PathBuf),
    #[error("no engine with id {0:?}")]
    UnknownEngine(String),
    #[error("engine id must not be empty")]
    EmptyId,
    #[error("engine id {0:?} has surrounding whitespace or control characters")]
    InvalidId(String),
    #[error("built-in engine {0:?} cannot be removed")]
    BuiltinRemoval(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// In-memory engine catalog with explicit [`load`](Self::load) and
/// [`save`](Self::save). Not synchronized: one owner, one thread.
pub struct EngineRegistry<B: ProcessBackend = NativeBackend> {
    config: HostConfig,
    entries: BTreeMap<String, EngineEntry>,
    make_backend: fn(&HostConfig) -> B,
}

impl EngineRegistry<NativeBackend> {
    pub fn new(config: HostConfig) -> Self {
        Self::with_backend_factory(config, |config| {
            NativeBackend::with_grace(config.stop_grace())
        })
    }
}

impl<B: ProcessBackend> EngineRegistry<B> {
    /// Registry whose probes spawn engines through backends built by `make_backend`.
    pub fn with_backend_factory(config: HostConfig, make_backend: fn(&HostConfig) -> B) -> Self {
        Self {
            config,
            entries: BTreeMap::new(),
            make_backend,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Replace the in-memory set with the store on disk. A missing or empty
    /// store gives an empty catalog.
    pub fn load(&mut self) -> Result<(), RegistryError> {
        let path = self.config.store_path();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_error(&path)(e)),
        };
        self.entries = parse_store(&contents);
        info!(path = %path.display(), engines = self.entries.len(), "engine registry loaded");
        Ok(())
    }

    /// Write every entry back to the store.
    pub fn save(&self) -> Result<(), RegistryError> {
        let path = self.config.store_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        let tmp = path.with_extension("ini.tmp");
        std::fs::write(&tmp, render_store(self.entries.values())).map_err(io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_error(&path))?;
        Ok(())
    }

    pub fn list(&self) -> Vec<&EngineEntry> {
        self.entries.values().collect()
    }

    pub fn get(&self, id: &str) -> Option<&EngineEntry> {
        self.entries.get(id)
    }

    /// Start `path` once, handshake, and shut it down again.
    pub fn probe(&self, path: &Path) -> Result<Handshake, RegistryError> {
        let mut engine = EngineProcess::with_backend((self.make_backend)(&self.config))
            .with_timeouts(self.config.handshake_timeouts());
        if !engine.start(path) {
            return Err(RegistryError::SpawnFailed(path.to_path_buf()));
        }
        let handshake = engine.uci_handshake();
        engine.stop();
        handshake.ok_or_else(|| RegistryError::HandshakeFailed(path.to_path_buf()))
    }

    /// Register an engine shipped with the host. Known ids only get their
    /// path and labels refreshed; cached options are trusted, not re-probed.
    pub fn ensure_builtin(
        &mut self,
        id: &str,
        display_name: &str,
        version: &str,
        path: &Path,
    ) -> Result<&EngineEntry, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if id.trim() != id || id.chars().any(char::is_control) {
            return Err(RegistryError::InvalidId(id.to_string()));
        }

        if let Some(entry) = self.entries.get_mut(id) {
            entry.reference.builtin = true;
            entry.reference.executable_path = path.to_path_buf();
            entry.reference.display_name = display_name.to_string();
            entry.reference.version = version.to_string();
        } else {
            let handshake = self.probe(path)?;
            info!(id, engine = %path.display(), "registered built-in engine");
            self.entries.insert(
                id.to_string(),
                EngineEntry {
                    reference: EngineReference {
                        builtin: true,
                        engine_id: id.to_string(),
                        executable_path: path.to_path_buf(),
                        display_name: display_name.to_string(),
                        version: version.to_string(),
                    },
                    identity: handshake.identity,
                    options: handshake.options,
                },
            );
        }

        self.save()?;
        self.entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownEngine(id.to_string()))
    }

    /// Copy a user-chosen engine into the engines directory, probe it and
    /// register it. Installing the same binary again returns the existing
    /// entry. On failure nothing is registered and the copy is removed.
    pub fn install_external(&mut self, source: &Path) -> Result<EngineEntry, RegistryError> {
        if let Some(existing) = self.find_by_path(source) {
            info!(id = existing.id(), "engine already installed");
            return Ok(existing.clone());
        }

        let meta = match std::fs::metadata(source) {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(RegistryError::SourceMissing(source.to_path_buf())),
        };
        let file_name = source
            .file_name()
            .ok_or_else(|| RegistryError::SourceMissing(source.to_path_buf()))?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let base_id = derive_engine_id(&file_name.to_string_lossy(), modified);

        // Same name and mtime is not proof of the same binary: only a copy
        // with identical contents counts as already installed.
        let mut id = base_id.clone();
        let mut suffix = 1;
        while let Some(existing) = self.entries.get(&id) {
            if same_contents(&existing.reference.executable_path, source) {
                info!(id, "engine already installed");
                return Ok(existing.clone());
            }
            suffix += 1;
            id = format!("{base_id}_{suffix}");
        }
        if suffix > 1 {
            info!(id, taken = %base_id, "engine id already used by another binary");
        }

        let install_dir = self.config.engines_dir().join(&id);
        let dest = install_dir.join(file_name);
        let installed = self.copy_and_probe(source, &install_dir, &dest);
        let handshake = match installed {
            Ok(handshake) => handshake,
            Err(e) => {
                error!(engine = %source.display(), error = %e, "engine install failed");
                let _ = std::fs::remove_dir_all(&install_dir);
                return Err(e);
            }
        };

        let display_name = if handshake.identity.name.is_empty() {
            Path::new(file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| id.clone())
        } else {
            handshake.identity.name.clone()
        };

        let entry = EngineEntry {
            reference: EngineReference {
                builtin: false,
                engine_id: id.clone(),
                executable_path: dest,
                display_name,
                version: String::new(),
            },
            identity: handshake.identity,
            options: handshake.options,
        };
        self.entries.insert(id.clone(), entry.clone());

        if let Err(e) = self.save() {
            self.entries.remove(&id);
            let _ = std::fs::remove_dir_all(&install_dir);
            return Err(e);
        }
        info!(id, name = %entry.reference.display_name, "installed engine");
        Ok(entry)
    }

    fn copy_and_probe(
        &self,
        source: &Path,
        install_dir: &Path,
        dest: &Path,
    ) -> Result<Handshake, RegistryError> {
        let copy_error = |source_err| RegistryError::Copy {
            from: source.to_path_buf(),
            to: dest.to_path_buf(),
            source: source_err,
        };
        std::fs::create_dir_all(install_dir).map_err(copy_error)?;
        std::fs::copy(source, dest).map_err(copy_error)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))
                .map_err(copy_error)?;
        }
        self.probe(dest)
    }

    fn find_by_path(&self, path: &Path) -> Option<&EngineEntry> {
        let wanted = std::fs::canonicalize(path).ok()?;
        self.entries.values().find(|entry| {
            std::fs::canonicalize(&entry.reference.executable_path)
                .map(|p| p == wanted)
                .unwrap_or(false)
        })
    }

    /// Forget an installed engine and delete its copy.
    pub fn remove(&mut self, id: &str) -> Result<EngineEntry, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| RegistryError::UnknownEngine(id.to_string()))?;
        if entry.builtin() {
            return Err(RegistryError::BuiltinRemoval(id.to_string()));
        }

        let install_dir = self.config.engines_dir().join(id);
        match std::fs::remove_dir_all(&install_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&install_dir)(e)),
        }

        let removed = self
            .entries
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownEngine(id.to_string()))?;
        self.save()?;
        info!(id, "removed engine");
        Ok(removed)
    }

    /// Configuration with the default move time and every option at its
    /// declared default.
    pub fn make_default_bot_config(&self, id: &str) -> Option<BotConfiguration> {
        let entry = self.entries.get(id)?;
        let option_values = entry
            .options
            .iter()
            .filter_map(|opt| Some((opt.name.clone(), opt.default_value()?)))
            .collect();
        Some(BotConfiguration {
            engine: entry.reference.clone(),
            limits: SearchLimits::movetime(self.config.default_movetime_ms),
            option_values,
        })
    }
}

/// `"Stockfish 17.exe"`, mtime 1712345678 -> `"Stockfish_17_exe_1712345678"`.
pub fn derive_engine_id(file_name: &str, modified_secs: u64) -> String {
    let mut id: String = file_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if id.is_empty() {
        id.push_str("engine");
    }
    write!(id, "_{modified_secs}").ok();
    id
}

fn same_contents(a: &Path, b: &Path) -> bool {
    let same_len = match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.len() == mb.len(),
        _ => false,
    };
    same_len
        && matches!(
            (std::fs::read(a), std::fs::read(b)),
            (Ok(x), Ok(y)) if x == y
        )
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn render_store<'a>(entries: impl Iterator<Item = &'a EngineEntry>) -> String {
    let mut out = String::new();
    for entry in entries {
        let r = &entry.reference;
        writeln!(out, "[engine {}]", r.engine_id).ok();
        writeln!(out, "builtin={}", r.builtin).ok();
        writeln!(out, "exe={}", single_line(&r.executable_path.to_string_lossy())).ok();
        writeln!(out, "name={}", single_line(&r.display_name)).ok();
        writeln!(out, "version={}", single_line(&r.version)).ok();
        writeln!(out, "id_name={}", single_line(&entry.identity.name)).ok();
        writeln!(out, "id_author={}", single_line(&entry.identity.author)).ok();
        for opt in &entry.options {
            writeln!(out, "opt:{}={}", opt.name, serialize_option_line(opt)).ok();
        }
        out.push('\n');
    }
    out
}

fn parse_store(contents: &str) -> BTreeMap<String, EngineEntry> {
    let mut entries = BTreeMap::new();
    let mut current: Option<EngineEntry> = None;

    for (number, raw) in contents.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix("[engine ").and_then(|h| h.strip_suffix(']')) {
            if let Some(done) = current.take() {
                entries.insert(done.reference.engine_id.clone(), done);
            }
            let id = header.trim();
            if id.is_empty() {
                warn!(line = number + 1, "engine block without an id, skipping");
                continue;
            }
            current = Some(EngineEntry {
                reference: EngineReference {
                    engine_id: id.to_string(),
                    ..EngineReference::default()
                },
                ..EngineEntry::default()
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            warn!(line = number + 1, "line outside of an engine block, skipping");
            continue;
        };

        if let Some(rest) = line.strip_prefix("opt:") {
            // The option name may contain anything but the serialized line
            // always starts with "option ".
            match rest.find("=option ").and_then(|i| parse_option_line(&rest[i + 1..])) {
                Some(opt) => entry.options.push(opt),
                None => warn!(line = number + 1, "unreadable option line, skipping"),
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            warn!(line = number + 1, "expected key=value, skipping");
            continue;
        };
        match key {
            "builtin" => entry.reference.builtin = value.trim() == "true",
            "exe" => entry.reference.executable_path = PathBuf::from(value),
            "name" => entry.reference.display_name = value.to_string(),
            "version" => entry.reference.version = value.to_string(),
            "id_name" => entry.identity.name = value.to_string(),
            "id_author" => entry.identity.author = value.to_string(),
            _ => {}
        }
    }

    if let Some(done) = current.take() {
        entries.insert(done.reference.engine_id.clone(), done);
    }
    entries
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
