//! The session ("room") state machine: one board, two player slots, strict
//! turn enforcement and the waiting → playing → finished/abandoned
//! lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::GameError;
use crate::game::{Board, Classification, Color, MoveRecord, PieceKind, Square};

/// One seated player. `conn` is the live transport handle and is `None`
/// while the player is disconnected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSlot {
    pub user_id: Uuid,
    pub username: String,
    pub conn: Option<String>,
    pub color: Color,
    pub is_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Playing,
    Finished,
    Abandoned,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Playing => "playing",
            SessionStatus::Finished => "finished",
            SessionStatus::Abandoned => "abandoned",
        };
        write!(f, "{}", name)
    }
}

/// Pieces each side has lost, in capture order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedPieces {
    pub white: Vec<PieceKind>,
    pub black: Vec<PieceKind>,
}

impl CapturedPieces {
    /// Records a piece of `color` as captured.
    pub fn push(&mut self, color: Color, kind: PieceKind) {
        match color {
            Color::White => self.white.push(kind),
            Color::Black => self.black.push(kind),
        }
    }
}

/// Snapshot of the live game sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStateView {
    pub board: Board,
    pub current_turn: Color,
    pub phase: Classification,
    pub move_history: Vec<MoveRecord>,
    pub captured: CapturedPieces,
}

/// Concluded-game notification for the ranking collaborator. Emitted at
/// most once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankEvent {
    Decisive { winner: Uuid, loser: Uuid },
    Draw { white: Uuid, black: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Seated(Color),
    Reconnected(Color),
}

#[derive(Debug, Clone)]
pub struct MoveReport {
    pub record: MoveRecord,
    pub classification: Classification,
    pub next_turn: Color,
    pub finished: bool,
    pub rank: Option<RankEvent>,
}

#[derive(Debug, Clone)]
pub struct LeaveReport {
    pub vacated: Color,
    pub status: SessionStatus,
    pub winner: Option<Uuid>,
    pub remaining_conn: Option<String>,
    pub rank: Option<RankEvent>,
}

/// The authoritative room entity. Owned by the session directory; mirrored
/// verbatim into the durable store after every committed transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub room_id: String,
    /// Slot one always plays white.
    pub player1: Option<PlayerSlot>,
    /// Slot two always plays black.
    pub player2: Option<PlayerSlot>,
    pub status: SessionStatus,
    pub board: Board,
    pub move_history: Vec<MoveRecord>,
    pub captured: CapturedPieces,
    pub winner: Option<Uuid>,
    pub draw: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    rank_reported: bool,
}

impl Session {
    pub fn new(room_id: impl Into<String>) -> Session {
        Session {
            room_id: room_id.into(),
            player1: None,
            player2: None,
            status: SessionStatus::Waiting,
            board: Board::new(),
            move_history: Vec::new(),
            captured: CapturedPieces::default(),
            winner: None,
            draw: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            rank_reported: false,
        }
    }

    pub fn is_full(&self) -> bool {
        self.player1.is_some() && self.player2.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.player1.is_none() && self.player2.is_none()
    }

    pub fn slot_for_conn(&self, conn: &str) -> Option<&PlayerSlot> {
        self.player1
            .as_ref()
            .filter(|slot| slot.conn.as_deref() == Some(conn))
            .or_else(|| {
                self.player2
                    .as_ref()
                    .filter(|slot| slot.conn.as_deref() == Some(conn))
            })
    }

    pub fn opponent_of(&self, conn: &str) -> Option<&PlayerSlot> {
        if self
            .player1
            .as_ref()
            .is_some_and(|slot| slot.conn.as_deref() == Some(conn))
        {
            self.player2.as_ref()
        } else if self
            .player2
            .as_ref()
            .is_some_and(|slot| slot.conn.as_deref() == Some(conn))
        {
            self.player1.as_ref()
        } else {
            None
        }
    }

    pub fn has_connection(&self, conn: &str) -> bool {
        self.slot_for_conn(conn).is_some()
    }

    /// Transport handles of every connected player.
    pub fn connections(&self) -> Vec<String> {
        self.player1
            .iter()
            .chain(self.player2.iter())
            .filter_map(|slot| slot.conn.clone())
            .collect()
    }

    /// Seats a player, or refreshes the connection of a returning identity.
    /// The second seat filling flips the session to `Playing`.
    pub fn join(
        &mut self,
        user_id: Uuid,
        username: &str,
        conn: &str,
    ) -> Result<JoinOutcome, GameError> {
        // a returning identity reconnects instead of taking a new slot
        if self
            .player1
            .as_ref()
            .is_some_and(|slot| slot.user_id == user_id)
        {
            if let Some(slot) = self.player1.as_mut() {
                slot.conn = Some(conn.to_string());
            }
            if self.status == SessionStatus::Abandoned {
                self.status = if self.player2.is_some() {
                    SessionStatus::Playing
                } else {
                    SessionStatus::Waiting
                };
            }
            return Ok(JoinOutcome::Reconnected(Color::White));
        }
        if self
            .player2
            .as_ref()
            .is_some_and(|slot| slot.user_id == user_id)
        {
            if let Some(slot) = self.player2.as_mut() {
                slot.conn = Some(conn.to_string());
            }
            if self.status == SessionStatus::Abandoned {
                self.status = if self.player1.is_some() {
                    SessionStatus::Playing
                } else {
                    SessionStatus::Waiting
                };
            }
            return Ok(JoinOutcome::Reconnected(Color::Black));
        }

        if self.is_full() {
            return Err(GameError::RoomFull);
        }
        if self.status == SessionStatus::Finished {
            return Err(GameError::Validation(
                "the game in this room has already finished".into(),
            ));
        }
        if self.status == SessionStatus::Abandoned && self.is_empty() {
            self.reset_for_rematch();
        }

        let color = if self.player1.is_none() {
            Color::White
        } else {
            Color::Black
        };
        let slot = PlayerSlot {
            user_id,
            username: username.to_string(),
            conn: Some(conn.to_string()),
            color,
            is_ready: false,
        };
        match color {
            Color::White => self.player1 = Some(slot),
            Color::Black => self.player2 = Some(slot),
        }

        if self.is_full() {
            self.status = SessionStatus::Playing;
            if self.started_at.is_none() {
                self.started_at = Some(Utc::now());
            }
        } else if self.status == SessionStatus::Abandoned {
            self.status = SessionStatus::Waiting;
        }
        Ok(JoinOutcome::Seated(color))
    }

    /// An abandoned, empty room is reusable with a fresh game.
    fn reset_for_rematch(&mut self) {
        self.board = Board::new();
        self.move_history.clear();
        self.captured = CapturedPieces::default();
        self.winner = None;
        self.draw = false;
        self.status = SessionStatus::Waiting;
        self.started_at = None;
        self.finished_at = None;
        self.rank_reported = false;
    }

    /// Validates turn and ownership, delegates legality to the engine,
    /// appends the move record and reclassifies the position. Checkmate and
    /// stalemate finish the session.
    pub fn submit_move(
        &mut self,
        conn: &str,
        from: Square,
        to: Square,
        promotion: Option<PieceKind>,
    ) -> Result<MoveReport, GameError> {
        let mover = self.slot_for_conn(conn).ok_or(GameError::NotInSession)?;
        let mover_color = mover.color;
        let mover_id = mover.user_id;
        if self.status != SessionStatus::Playing {
            return Err(GameError::RuleViolation(format!(
                "the game is not in progress (status: {})",
                self.status
            )));
        }
        if mover_color != self.board.side_to_move() {
            return Err(GameError::OutOfTurn);
        }
        let piece = self
            .board
            .piece_at(from)
            .ok_or_else(|| GameError::RuleViolation("no piece on the origin square".into()))?;
        if piece.color != mover_color {
            return Err(GameError::RuleViolation("that piece is not yours".into()));
        }

        let outcome = self.board.apply_move(from, to, promotion)?;
        let record = MoveRecord {
            ply: self.move_history.len() as u32 + 1,
            from,
            to,
            piece: piece.kind,
            captured: outcome.captured,
            promotion: outcome.promoted,
        };
        self.move_history.push(record.clone());
        if let Some(kind) = outcome.captured {
            self.captured.push(mover_color.opposite(), kind);
        }

        let next_turn = self.board.side_to_move();
        let classification = self.board.classify(next_turn);
        let finished = matches!(
            classification,
            Classification::Checkmate | Classification::Stalemate
        );
        let mut rank = None;
        if finished {
            self.status = SessionStatus::Finished;
            self.finished_at = Some(Utc::now());
            if classification == Classification::Checkmate {
                self.winner = Some(mover_id);
            } else {
                self.draw = true;
            }
            rank = self.take_rank_event();
        }
        Ok(MoveReport {
            record,
            classification,
            next_turn,
            finished,
            rank,
        })
    }

    /// Vacates the matching slot. Leaving a waiting or live session abandons
    /// it; leaving a live session crowns the remaining player.
    pub fn leave(&mut self, conn: &str) -> Option<LeaveReport> {
        let vacated = if self
            .player1
            .as_ref()
            .is_some_and(|slot| slot.conn.as_deref() == Some(conn))
        {
            Color::White
        } else if self
            .player2
            .as_ref()
            .is_some_and(|slot| slot.conn.as_deref() == Some(conn))
        {
            Color::Black
        } else {
            return None;
        };
        let leaver = match vacated {
            Color::White => self.player1.take(),
            Color::Black => self.player2.take(),
        }?;

        let was_playing = self.status == SessionStatus::Playing;
        if matches!(self.status, SessionStatus::Waiting | SessionStatus::Playing) {
            self.status = SessionStatus::Abandoned;
            self.finished_at = Some(Utc::now());
        }

        let remaining = self.player1.clone().or_else(|| self.player2.clone());
        let mut rank = None;
        if was_playing {
            if let Some(winner) = remaining.as_ref() {
                self.winner = Some(winner.user_id);
                if !self.rank_reported {
                    rank = Some(RankEvent::Decisive {
                        winner: winner.user_id,
                        loser: leaver.user_id,
                    });
                    self.rank_reported = true;
                }
            }
        }
        Some(LeaveReport {
            vacated,
            status: self.status,
            winner: self.winner,
            remaining_conn: remaining.and_then(|slot| slot.conn),
            rank,
        })
    }

    pub fn game_view(&self) -> GameStateView {
        GameStateView {
            board: self.board.clone(),
            current_turn: self.board.side_to_move(),
            phase: self.board.classify(self.board.side_to_move()),
            move_history: self.move_history.clone(),
            captured: self.captured.clone(),
        }
    }

    fn take_rank_event(&mut self) -> Option<RankEvent> {
        if self.rank_reported {
            return None;
        }
        let (p1, p2) = match (&self.player1, &self.player2) {
            (Some(a), Some(b)) => (a, b),
            _ => return None,
        };
        let event = if self.draw {
            RankEvent::Draw {
                white: p1.user_id,
                black: p2.user_id,
            }
        } else {
            let winner = self.winner?;
            let loser = if p1.user_id == winner {
                p2.user_id
            } else {
                p1.user_id
            };
            RankEvent::Decisive { winner, loser }
        };
        self.rank_reported = true;
        Some(event)
    }
}
