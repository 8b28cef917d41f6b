//! UCI line codec.
//!
//! Pure functions over single protocol lines: option declarations, square and
//! move text, and the handful of commands a host sends to an engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Move, PieceKind, Square};

/// Keywords that terminate a free-text field inside an `option` line.
const OPTION_KEYWORDS: [&str; 6] = ["name", "type", "default", "min", "max", "var"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Check,
    Spin,
    Combo,
    String,
    Button,
}

impl OptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OptionKind::Check => "check",
            OptionKind::Spin => "spin",
            OptionKind::Combo => "combo",
            OptionKind::String => "string",
            OptionKind::Button => "button",
        }
    }

    fn parse(s: &str) -> Option<OptionKind> {
        match s {
            "check" => Some(OptionKind::Check),
            "spin" => Some(OptionKind::Spin),
            "combo" => Some(OptionKind::Combo),
            "string" => Some(OptionKind::String),
            "button" => Some(OptionKind::Button),
            _ => None,
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value for `setoption`. The variant must agree with the option's kind:
/// `Check` takes `Bool`, `Spin` takes `Int`, everything else takes `Str`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            OptionValue::Int(n) => write!(f, "{n}"),
            OptionValue::Str(s) => f.write_str(s),
        }
    }
}

/// One `option name ... type ...` declaration captured during the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub name: String,
    pub kind: OptionKind,
    /// Raw default text, empty when the engine declared none
    pub default: String,
    pub min: i64,
    pub max: i64,
    /// `var` entries in declaration order (combo options)
    pub choices: Vec<String>,
}

impl OptionDescriptor {
    pub fn default_bool(&self) -> bool {
        self.default == "true"
    }

    pub fn default_int(&self) -> i64 {
        self.default.parse().unwrap_or(0)
    }

    /// The declared default as a value of the matching variant.
    /// Buttons carry no value and yield `None`.
    pub fn default_value(&self) -> Option<OptionValue> {
        match self.kind {
            OptionKind::Check => Some(OptionValue::Bool(self.default_bool())),
            OptionKind::Spin => Some(OptionValue::Int(self.default_int())),
            OptionKind::Combo | OptionKind::String => Some(OptionValue::Str(self.default.clone())),
            OptionKind::Button => None,
        }
    }

    /// Whether `value` can be sent for this option.
    pub fn accepts(&self, value: &OptionValue) -> bool {
        match (self.kind, value) {
            (OptionKind::Check, OptionValue::Bool(_)) => true,
            (OptionKind::Spin, OptionValue::Int(n)) => (self.min..=self.max).contains(n),
            (OptionKind::Combo, OptionValue::Str(s)) => {
                self.choices.is_empty() || self.choices.iter().any(|c| c == s)
            }
            (OptionKind::String, OptionValue::Str(_)) => true,
            _ => false,
        }
    }
}

/// Parse an `option ...` line. Returns `None` for anything that is not a
/// well-formed option declaration.
pub fn parse_option_line(line: &str) -> Option<OptionDescriptor> {
    let mut tokens = line.split_whitespace().peekable();
    if tokens.next()? != "option" {
        return None;
    }

    let mut name: Option<String> = None;
    let mut kind: Option<OptionKind> = None;
    let mut default = String::new();
    let mut min: i64 = 0;
    let mut max: i64 = 0;
    let mut choices = Vec::new();

    while let Some(keyword) = tokens.next() {
        let mut words = Vec::new();
        while let Some(&tok) = tokens.peek() {
            if OPTION_KEYWORDS.contains(&tok) {
                break;
            }
            words.push(tok);
            tokens.next();
        }
        let text = words.join(" ");

        match keyword {
            "name" => name = Some(text),
            "type" => kind = Some(OptionKind::parse(&text)?),
            "default" => default = text,
            "min" => min = text.parse().ok()?,
            "max" => max = text.parse().ok()?,
            "var" => choices.push(text),
            _ => return None,
        }
    }

    let name = name.filter(|n| !n.is_empty())?;
    let kind = kind?;
    if kind == OptionKind::Spin && min > max {
        std::mem::swap(&mut min, &mut max);
    }

    Some(OptionDescriptor {
        name,
        kind,
        default,
        min,
        max,
        choices,
    })
}

/// Render a descriptor as a line [`parse_option_line`] reads back unchanged.
pub fn serialize_option_line(opt: &OptionDescriptor) -> String {
    let mut line = format!("option name {} type {}", opt.name, opt.kind);
    if !opt.default.is_empty() {
        line.push_str(" default ");
        line.push_str(&opt.default);
    }
    if opt.kind == OptionKind::Spin || opt.min != 0 || opt.max != 0 {
        line.push_str(&format!(" min {} max {}", opt.min, opt.max));
    }
    for choice in &opt.choices {
        line.push_str(" var ");
        line.push_str(choice);
    }
    line
}

/// `"e2"` -> `Some(12)`. Anything outside `a1..h8` is `None`.
pub fn square_from_text(text: &str) -> Option<Square> {
    let b = text.as_bytes();
    if b.len() != 2 {
        return None;
    }
    let (f, r) = (b[0], b[1]);
    if !(b'a'..=b'h').contains(&f) || !(b'1'..=b'8').contains(&r) {
        return None;
    }
    Some((r - b'1') * 8 + (f - b'a'))
}

pub fn square_to_text(sq: Square) -> Option<String> {
    if sq >= 64 {
        return None;
    }
    let f = (b'a' + (sq % 8)) as char;
    let r = (b'1' + (sq / 8)) as char;
    Some(format!("{f}{r}"))
}

pub fn move_to_uci(mv: Move) -> String {
    let mut s = String::with_capacity(5);
    s.push_str(&square_to_text(mv.from).unwrap_or_default());
    s.push_str(&square_to_text(mv.to).unwrap_or_default());
    if let Some(c) = mv.promo.and_then(PieceKind::promo_char) {
        s.push(c);
    }
    s
}

/// Parse `<from><to>[promo]` move text. Says nothing about legality.
pub fn parse_uci_move(text: &str) -> Option<Move> {
    if !text.is_ascii() || !(4..=5).contains(&text.len()) {
        return None;
    }
    let from = square_from_text(&text[0..2])?;
    let to = square_from_text(&text[2..4])?;
    let promo = match text[4..].chars().next() {
        Some(c) => Some(PieceKind::from_promo_char(c)?),
        None => None,
    };
    Some(Move { from, to, promo })
}

/// Find the legal move that `text` names. The promotion piece has to agree.
pub fn match_legal_move(text: &str, legal: &[Move]) -> Option<Move> {
    let parsed = parse_uci_move(text)?;
    legal
        .iter()
        .copied()
        .find(|m| m.from == parsed.from && m.to == parsed.to && m.promo == parsed.promo)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestMove {
    pub mv: String,
    pub ponder: Option<String>,
}

/// Parse a `bestmove <move> [ponder <move>]` line. `(none)` and `0000`
/// mean the engine had nothing to play.
pub fn parse_bestmove(line: &str) -> Option<BestMove> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    let mv = tokens.next()?;
    if mv == "(none)" || mv == "0000" {
        return None;
    }
    let ponder = match (tokens.next(), tokens.next()) {
        (Some("ponder"), Some(p)) => Some(p.to_string()),
        _ => None,
    };
    Some(BestMove {
        mv: mv.to_string(),
        ponder,
    })
}

/// Search limit attached to a `go` command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoLimit {
    Clock {
        wtime: u64,
        btime: u64,
        winc: u64,
        binc: u64,
    },
    MoveTime(u64),
    Depth(u32),
}

/// Commands a host writes to an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Uci,
    IsReady,
    UciNewGame,
    SetOption { name: String, value: OptionValue },
    Position { fen: String, moves: Vec<String> },
    Go(GoLimit),
    Stop,
    Quit,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Uci => f.write_str("uci"),
            Command::IsReady => f.write_str("isready"),
            Command::UciNewGame => f.write_str("ucinewgame"),
            Command::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            Command::Position { fen, moves } => {
                write!(f, "position fen {fen}")?;
                if !moves.is_empty() {
                    write!(f, " moves {}", moves.join(" "))?;
                }
                Ok(())
            }
            Command::Go(GoLimit::Clock {
                wtime,
                btime,
                winc,
                binc,
            }) => write!(f, "go wtime {wtime} btime {btime} winc {winc} binc {binc}"),
            Command::Go(GoLimit::MoveTime(ms)) => write!(f, "go movetime {ms}"),
            Command::Go(GoLimit::Depth(n)) => write!(f, "go depth {n}"),
            Command::Stop => f.write_str("stop"),
            Command::Quit => f.write_str("quit"),
        }
    }
}

/// Classification of one line read from an engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineLine {
    IdName(String),
    IdAuthor(String),
    Option(OptionDescriptor),
    UciOk,
    ReadyOk,
    BestMove,
    Other,
}

pub fn classify_line(line: &str) -> EngineLine {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix("id name ") {
        return EngineLine::IdName(rest.trim().to_string());
    }
    if let Some(rest) = trimmed.strip_prefix("id author ") {
        return EngineLine::IdAuthor(rest.trim().to_string());
    }
    match trimmed.split_whitespace().next() {
        Some("uciok") => EngineLine::UciOk,
        Some("readyok") => EngineLine::ReadyOk,
        Some("bestmove") => EngineLine::BestMove,
        Some("option") => parse_option_line(trimmed)
            .map(EngineLine::Option)
            .unwrap_or(EngineLine::Other),
        _ => EngineLine::Other,
    }
}

/// True when the line starts with the `bestmove` token.
pub fn is_bestmove_line(line: &str) -> bool {
    line.split_whitespace().next() == Some("bestmove")
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod codec_tests;
