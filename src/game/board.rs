//! Board representation and move legality.
//!
//! Every legality question is answered by pure functions on `Board`; the
//! self-check rule is evaluated by trial-applying the candidate on a scratch
//! clone, never by mutating the live board.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::moves::MoveOutcome;
use super::piece::{Color, Piece, PieceKind};
use crate::error::GameError;

pub const BOARD_SIZE: u8 = 8;

/// A board coordinate. Rank 0 is white's back rank, file 0 is the a-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    pub rank: u8,
    pub file: u8,
}

impl Square {
    pub fn new(rank: u8, file: u8) -> Option<Square> {
        if rank < BOARD_SIZE && file < BOARD_SIZE {
            Some(Square { rank, file })
        } else {
            None
        }
    }

    pub fn offset(self, rank_delta: i8, file_delta: i8) -> Option<Square> {
        let rank = self.rank as i8 + rank_delta;
        let file = self.file as i8 + file_delta;
        if (0..BOARD_SIZE as i8).contains(&rank) && (0..BOARD_SIZE as i8).contains(&file) {
            Some(Square {
                rank: rank as u8,
                file: file as u8,
            })
        } else {
            None
        }
    }

    /// Parses algebraic notation such as `e4`.
    pub fn from_algebraic(s: &str) -> Option<Square> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let file = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(rank, file)
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            (b'a' + self.file) as char,
            (b'1' + self.rank) as char
        )
    }
}

// Squares travel as algebraic strings on the wire and in snapshots.
impl Serialize for Square {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Square {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Square, D::Error> {
        let s = String::deserialize(deserializer)?;
        Square::from_algebraic(&s).ok_or_else(|| de::Error::custom(format!("invalid square: {}", s)))
    }
}

/// Game phase from the point of view of the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Playing,
    Check,
    Checkmate,
    Stalemate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    squares: [[Option<Piece>; 8]; 8],
    side_to_move: Color,
    /// Valid only for the ply immediately following a double pawn advance.
    en_passant_target: Option<Square>,
}

impl Default for Board {
    fn default() -> Board {
        Board::new()
    }
}

impl Board {
    /// The standard starting position, white to move.
    pub fn new() -> Board {
        const BACK_RANK: [PieceKind; 8] = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];
        let mut board = Board::empty();
        for (file, &kind) in BACK_RANK.iter().enumerate() {
            board.squares[0][file] = Some(Piece::new(kind, Color::White));
            board.squares[7][file] = Some(Piece::new(kind, Color::Black));
        }
        for file in 0..8 {
            board.squares[1][file] = Some(Piece::new(PieceKind::Pawn, Color::White));
            board.squares[6][file] = Some(Piece::new(PieceKind::Pawn, Color::Black));
        }
        board
    }

    pub fn empty() -> Board {
        Board {
            squares: [[None; 8]; 8],
            side_to_move: Color::White,
            en_passant_target: None,
        }
    }

    pub fn piece_at(&self, sq: Square) -> Option<Piece> {
        self.squares[sq.rank as usize][sq.file as usize]
    }

    pub fn place(&mut self, sq: Square, piece: Piece) {
        self.squares[sq.rank as usize][sq.file as usize] = Some(piece);
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn set_side_to_move(&mut self, color: Color) {
        self.side_to_move = color;
    }

    pub fn en_passant_target(&self) -> Option<Square> {
        self.en_passant_target
    }

    /// True when every square strictly between two aligned squares is empty.
    fn path_clear(&self, from: Square, to: Square) -> bool {
        let rank_step = (to.rank as i8 - from.rank as i8).signum();
        let file_step = (to.file as i8 - from.file as i8).signum();
        let mut cursor = from.offset(rank_step, file_step);
        while let Some(sq) = cursor {
            if sq == to {
                return true;
            }
            if self.piece_at(sq).is_some() {
                return false;
            }
            cursor = sq.offset(rank_step, file_step);
        }
        true
    }

    /// Pseudo-legal reachability for the piece standing on `from`; ignores
    /// whether the move would expose the mover's own king.
    fn can_reach(&self, from: Square, to: Square, piece: Piece) -> bool {
        if from == to {
            return false;
        }
        if let Some(target) = self.piece_at(to) {
            if target.color == piece.color {
                return false;
            }
        }
        let rank_delta = to.rank as i8 - from.rank as i8;
        let file_delta = to.file as i8 - from.file as i8;
        match piece.kind {
            PieceKind::Pawn => self.pawn_can_reach(from, to, piece.color),
            PieceKind::Knight => {
                (rank_delta.abs() == 2 && file_delta.abs() == 1)
                    || (rank_delta.abs() == 1 && file_delta.abs() == 2)
            }
            PieceKind::Bishop => rank_delta.abs() == file_delta.abs() && self.path_clear(from, to),
            PieceKind::Rook => {
                (rank_delta == 0 || file_delta == 0) && self.path_clear(from, to)
            }
            PieceKind::Queen => {
                (rank_delta == 0 || file_delta == 0 || rank_delta.abs() == file_delta.abs())
                    && self.path_clear(from, to)
            }
            PieceKind::King => {
                (rank_delta.abs() <= 1 && file_delta.abs() <= 1)
                    || self.can_castle(from, to, piece)
            }
        }
    }

    fn pawn_can_reach(&self, from: Square, to: Square, color: Color) -> bool {
        let direction = color.pawn_direction();
        let rank_delta = to.rank as i8 - from.rank as i8;
        let file_delta = (to.file as i8 - from.file as i8).abs();
        if file_delta == 0 {
            // advances only land on empty squares
            if rank_delta == direction && self.piece_at(to).is_none() {
                return true;
            }
            if rank_delta == 2 * direction
                && from.rank == color.pawn_start_rank()
                && self.piece_at(to).is_none()
            {
                if let Some(mid) = from.offset(direction, 0) {
                    return self.piece_at(mid).is_none();
                }
            }
            false
        } else if file_delta == 1 && rank_delta == direction {
            if let Some(target) = self.piece_at(to) {
                return target.color != color;
            }
            // the target square is live only for the side now to move
            self.en_passant_target == Some(to) && color == self.side_to_move
        } else {
            false
        }
    }

    /// True when any piece of `by` attacks `sq`. Pawn pushes do not attack,
    /// and the enemy king only threatens adjacent squares.
    pub fn square_attacked(&self, sq: Square, by: Color) -> bool {
        for rank in 0..BOARD_SIZE {
            for file in 0..BOARD_SIZE {
                let from = Square { rank, file };
                let piece = match self.piece_at(from) {
                    Some(p) if p.color == by => p,
                    _ => continue,
                };
                let rank_delta = sq.rank as i8 - from.rank as i8;
                let file_delta = sq.file as i8 - from.file as i8;
                let attacks = match piece.kind {
                    PieceKind::Pawn => {
                        rank_delta == by.pawn_direction() && file_delta.abs() == 1
                    }
                    PieceKind::Knight => {
                        (rank_delta.abs() == 2 && file_delta.abs() == 1)
                            || (rank_delta.abs() == 1 && file_delta.abs() == 2)
                    }
                    PieceKind::King => {
                        rank_delta.abs() <= 1
                            && file_delta.abs() <= 1
                            && (rank_delta != 0 || file_delta != 0)
                    }
                    PieceKind::Bishop => {
                        rank_delta.abs() == file_delta.abs()
                            && rank_delta != 0
                            && self.path_clear(from, sq)
                    }
                    PieceKind::Rook => {
                        ((rank_delta == 0) != (file_delta == 0)) && self.path_clear(from, sq)
                    }
                    PieceKind::Queen => {
                        (((rank_delta == 0) != (file_delta == 0))
                            || (rank_delta.abs() == file_delta.abs() && rank_delta != 0))
                            && self.path_clear(from, sq)
                    }
                };
                if attacks {
                    return true;
                }
            }
        }
        false
    }

    pub fn king_square(&self, color: Color) -> Option<Square> {
        for rank in 0..BOARD_SIZE {
            for file in 0..BOARD_SIZE {
                let sq = Square { rank, file };
                if let Some(piece) = self.piece_at(sq) {
                    if piece.color == color && piece.kind == PieceKind::King {
                        return Some(sq);
                    }
                }
            }
        }
        None
    }

    pub fn in_check(&self, color: Color) -> bool {
        match self.king_square(color) {
            Some(sq) => self.square_attacked(sq, color.opposite()),
            None => false,
        }
    }

    fn can_castle(&self, from: Square, to: Square, piece: Piece) -> bool {
        if piece.kind != PieceKind::King || piece.has_moved {
            return false;
        }
        if to.rank != from.rank || (to.file as i8 - from.file as i8).abs() != 2 {
            return false;
        }
        if self.in_check(piece.color) {
            return false;
        }
        let king_side = to.file > from.file;
        let rook_file = if king_side { 7 } else { 0 };
        let rook_sq = Square {
            rank: from.rank,
            file: rook_file,
        };
        match self.piece_at(rook_sq) {
            Some(rook)
                if rook.kind == PieceKind::Rook
                    && rook.color == piece.color
                    && !rook.has_moved => {}
            _ => return false,
        }
        // every square between king and rook must be empty
        let (low, high) = if king_side {
            (from.file + 1, rook_file)
        } else {
            (rook_file + 1, from.file)
        };
        for file in low..high {
            let between = Square {
                rank: from.rank,
                file,
            };
            if self.piece_at(between).is_some() {
                return false;
            }
        }
        // the king may not cross or land on an attacked square
        let step: i8 = if king_side { 1 } else { -1 };
        let mut file = from.file as i8 + step;
        loop {
            let crossing = Square {
                rank: from.rank,
                file: file as u8,
            };
            let mut scratch = self.clone();
            scratch.squares[from.rank as usize][from.file as usize] = None;
            scratch.squares[crossing.rank as usize][crossing.file as usize] = Some(piece);
            if scratch.square_attacked(crossing, piece.color.opposite()) {
                return false;
            }
            if file == to.file as i8 {
                break;
            }
            file += step;
        }
        true
    }

    /// Geometry plus the self-check rule; the candidate is trial-applied on
    /// a scratch copy so the live board is never touched.
    pub fn is_legal_move(&self, from: Square, to: Square, mover: Color) -> bool {
        let piece = match self.piece_at(from) {
            Some(p) => p,
            None => return false,
        };
        if piece.color != mover {
            return false;
        }
        if !self.can_reach(from, to, piece) {
            return false;
        }
        let mut scratch = self.clone();
        scratch.perform(from, to, None);
        !scratch.in_check(mover)
    }

    /// Validates the candidate against the full rules, then commits it.
    /// `promotion` picks the piece a promoting pawn becomes (queen when
    /// omitted) and is rejected for any non-promoting move.
    pub fn apply_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<MoveOutcome, GameError> {
        let piece = self
            .piece_at(from)
            .ok_or_else(|| GameError::RuleViolation("no piece on the origin square".into()))?;
        if piece.color != self.side_to_move {
            return Err(GameError::OutOfTurn);
        }
        if let Some(choice) = promotion {
            if !choice.is_promotion_choice() {
                return Err(GameError::Validation(format!("cannot promote to {}", choice)));
            }
            if piece.kind != PieceKind::Pawn || to.rank != piece.color.promotion_rank() {
                return Err(GameError::Validation(
                    "promotion is only available for a pawn reaching the last rank".into(),
                ));
            }
        }
        if !self.is_legal_move(from, to, piece.color) {
            return Err(GameError::RuleViolation(format!(
                "{} from {} to {} is not legal",
                piece.kind, from, to
            )));
        }
        Ok(self.perform(from, to, promotion))
    }

    /// Commits the mechanics of a move without re-checking legality.
    fn perform(&mut self, from: Square, to: Square, promotion: Option<PieceKind>) -> MoveOutcome {
        let mut piece = match self.piece_at(from) {
            Some(p) => p,
            None => return MoveOutcome::default(),
        };
        let mut captured = self.piece_at(to).map(|p| p.kind);
        let mut en_passant = false;
        let mut castled = false;

        // en passant removes the passed-over pawn, not the (empty) destination
        if piece.kind == PieceKind::Pawn
            && captured.is_none()
            && from.file != to.file
            && self.en_passant_target == Some(to)
        {
            if let Some(passed) = to.offset(-piece.color.pawn_direction(), 0) {
                if let Some(victim) = self.piece_at(passed) {
                    if victim.kind == PieceKind::Pawn && victim.color != piece.color {
                        self.squares[passed.rank as usize][passed.file as usize] = None;
                        captured = Some(victim.kind);
                        en_passant = true;
                    }
                }
            }
        }

        // a double advance leaves the skipped square as the target; any
        // other move clears it
        self.en_passant_target = None;
        if piece.kind == PieceKind::Pawn
            && from.file == to.file
            && (to.rank as i8 - from.rank as i8).abs() == 2
        {
            self.en_passant_target = from.offset(piece.color.pawn_direction(), 0);
        }

        // castling relocates the rook in the same transition
        if piece.kind == PieceKind::King && (to.file as i8 - from.file as i8).abs() == 2 {
            let king_side = to.file > from.file;
            let rook_from = Square {
                rank: from.rank,
                file: if king_side { 7 } else { 0 },
            };
            let rook_to = Square {
                rank: from.rank,
                file: if king_side { 5 } else { 3 },
            };
            if let Some(mut rook) = self.piece_at(rook_from) {
                rook.has_moved = true;
                self.squares[rook_from.rank as usize][rook_from.file as usize] = None;
                self.squares[rook_to.rank as usize][rook_to.file as usize] = Some(rook);
                castled = true;
            }
        }

        piece.has_moved = true;
        let mut promoted = None;
        if piece.kind == PieceKind::Pawn && to.rank == piece.color.promotion_rank() {
            let kind = promotion.unwrap_or(PieceKind::Queen);
            piece.kind = kind;
            promoted = Some(kind);
        }
        self.squares[from.rank as usize][from.file as usize] = None;
        self.squares[to.rank as usize][to.file as usize] = Some(piece);
        self.side_to_move = self.side_to_move.opposite();

        MoveOutcome {
            captured,
            en_passant,
            castled,
            promoted,
        }
    }

    /// Legal destinations for the piece on `from`, for any owner.
    pub fn legal_moves_from(&self, from: Square) -> Vec<Square> {
        let piece = match self.piece_at(from) {
            Some(p) => p,
            None => return Vec::new(),
        };
        let mut moves = Vec::new();
        for rank in 0..BOARD_SIZE {
            for file in 0..BOARD_SIZE {
                let to = Square { rank, file };
                if self.is_legal_move(from, to, piece.color) {
                    moves.push(to);
                }
            }
        }
        moves
    }

    pub fn has_any_legal_move(&self, color: Color) -> bool {
        for rank in 0..BOARD_SIZE {
            for file in 0..BOARD_SIZE {
                let from = Square { rank, file };
                match self.piece_at(from) {
                    Some(piece) if piece.color == color => {}
                    _ => continue,
                }
                for to_rank in 0..BOARD_SIZE {
                    for to_file in 0..BOARD_SIZE {
                        let to = Square {
                            rank: to_rank,
                            file: to_file,
                        };
                        if self.is_legal_move(from, to, color) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    pub fn classify(&self, side: Color) -> Classification {
        let in_check = self.in_check(side);
        let has_moves = self.has_any_legal_move(side);
        match (in_check, has_moves) {
            (true, false) => Classification::Checkmate,
            (false, false) => Classification::Stalemate,
            (true, true) => Classification::Check,
            (false, true) => Classification::Playing,
        }
    }

    /// Sanity check applied to snapshots loaded from the durable store.
    pub fn validate(&self) -> Result<(), String> {
        for color in [Color::White, Color::Black] {
            let kings = self
                .squares
                .iter()
                .flatten()
                .filter(|p| matches!(p, Some(piece) if piece.kind == PieceKind::King && piece.color == color))
                .count();
            if kings != 1 {
                return Err(format!("{} has {} kings", color, kings));
            }
        }
        Ok(())
    }
}
