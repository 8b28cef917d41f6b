//! Move and position types shared with the host's rules engine.
//!
//! The host owns chess rules. This crate only needs a move's squares and
//! promotion piece, plus a snapshot of "where are we and what is legal".

use serde::{Deserialize, Serialize};

/// Square index, `0..64`, a1 = 0, h1 = 7, a8 = 56.
pub type Square = u8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Lowercase letter used as the promotion suffix in move text.
    pub fn promo_char(self) -> Option<char> {
        match self {
            PieceKind::Knight => Some('n'),
            PieceKind::Bishop => Some('b'),
            PieceKind::Rook => Some('r'),
            PieceKind::Queen => Some('q'),
            PieceKind::Pawn | PieceKind::King => None,
        }
    }

    pub fn from_promo_char(c: char) -> Option<PieceKind> {
        match c.to_ascii_lowercase() {
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promo: Option<PieceKind>,
}

impl Move {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promo: None,
        }
    }

    pub fn with_promo(from: Square, to: Square, promo: PieceKind) -> Self {
        Self {
            from,
            to,
            promo: Some(promo),
        }
    }
}

/// What the rules engine knows about the position an engine should move in.
///
/// Built by the host once per turn and handed to
/// [`EnginePlayer::request_move`](crate::EnginePlayer::request_move).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// FEN of the current position
    pub fen: String,
    /// Every legal move in that position
    pub legal_moves: Vec<Move>,
}

impl PositionSnapshot {
    pub fn new(fen: impl Into<String>, legal_moves: Vec<Move>) -> Self {
        Self {
            fen: fen.into(),
            legal_moves,
        }
    }
}
