//! Immutable move records and their replay.

use serde::{Deserialize, Serialize};

use super::board::{Board, Square};
use super::piece::PieceKind;
use crate::error::GameError;

/// One committed move. Records are append-only; replaying a history from
/// the initial position reproduces the board it was captured from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub ply: u32,
    pub from: Square,
    pub to: Square,
    pub piece: PieceKind,
    pub captured: Option<PieceKind>,
    pub promotion: Option<PieceKind>,
}

/// What applying a move did to the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveOutcome {
    pub captured: Option<PieceKind>,
    pub en_passant: bool,
    pub castled: bool,
    pub promoted: Option<PieceKind>,
}

/// Replays a history onto a fresh board.
pub fn replay(history: &[MoveRecord]) -> Result<Board, GameError> {
    let mut board = Board::new();
    for record in history {
        board.apply_move(record.from, record.to, record.promotion)?;
    }
    Ok(board)
}
