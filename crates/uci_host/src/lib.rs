pub mod backend;
pub mod codec;
pub mod config;
pub mod player;
pub mod process;
pub mod registry;
pub mod types;

// Re-export the host-facing surface
pub use backend::{NativeBackend, ProcessBackend};
pub use codec::{
    classify_line, match_legal_move, move_to_uci, parse_bestmove, parse_option_line,
    parse_uci_move, serialize_option_line, square_from_text, square_to_text, BestMove, Command,
    EngineLine, GoLimit, OptionDescriptor, OptionKind, OptionValue,
};
pub use config::{default_data_dir, ConfigError, HostConfig};
pub use player::{BotConfiguration, CancelToken, EnginePlayer, MoveRequest, SearchLimits};
pub use process::{EngineIdentity, EngineProcess, Handshake, HandshakeTimeouts, ProcessState};
pub use registry::{derive_engine_id, EngineEntry, EngineReference, EngineRegistry, RegistryError};
pub use types::*;
