//! Wire-level actions and events, plus the envelope the transport hands to
//! the dispatcher.

use actix::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::{GameStateView, PlayerSlot, SessionStatus};
use crate::game::{Color, MoveRecord, PieceKind};

/// Inbound player action, tagged by `action` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    CreateRoom,
    JoinRoom {
        room_id: String,
    },
    MakeMove {
        room_id: String,
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<PieceKind>,
    },
    LeaveRoom {
        room_id: String,
    },
    RequestGameState {
        room_id: String,
    },
    GetMoves {
        room_id: String,
        from: String,
    },
    ListRooms,
    JoinQueue,
    LeaveQueue,
    Disconnect,
}

/// An inbound action plus the verified identity it arrived under.
#[derive(Debug, Clone)]
pub struct ActionEnvelope {
    pub user_id: Uuid,
    pub username: String,
    pub conn: String,
    pub action: Action,
}

/// Public view of a seated player; never exposes the transport handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotView {
    pub user_id: Uuid,
    pub username: String,
    pub color: Color,
    pub is_ready: bool,
}

impl From<&PlayerSlot> for SlotView {
    fn from(slot: &PlayerSlot) -> SlotView {
        SlotView {
            user_id: slot.user_id,
            username: slot.username.clone(),
            color: slot.color,
            is_ready: slot.is_ready,
        }
    }
}

/// One row of the joinable-room listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: String,
    pub player1: Option<String>,
    pub player2: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePlayer {
    pub user_id: Uuid,
    pub username: String,
}

/// Outbound event, tagged by `event` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Event {
    RoomCreated {
        room_id: String,
        player: SlotView,
    },
    RoomJoined {
        room_id: String,
        player: SlotView,
        opponent: Option<SlotView>,
        state: GameStateView,
        status: SessionStatus,
    },
    GameStarted {
        room_id: String,
        player1: SlotView,
        player2: SlotView,
        state: GameStateView,
    },
    MoveMade {
        room_id: String,
        #[serde(rename = "move")]
        mv: MoveRecord,
        state: GameStateView,
        next_turn: Color,
    },
    OpponentLeft {
        room_id: String,
        message: String,
    },
    GameStateUpdated {
        room_id: String,
        state: GameStateView,
        status: SessionStatus,
    },
    AvailableMoves {
        room_id: String,
        from: String,
        moves: Vec<String>,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    QueueJoined {
        position: usize,
    },
    QueueUpdated {
        size: usize,
        players: Vec<QueuePlayer>,
    },
    QueueLeft,
    Error {
        kind: String,
        message: String,
    },
}

/// Where a single event is delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum Recipient {
    Caller,
    Connection(String),
    Everyone,
}

/// One event addressed to one recipient; the transport collaborator
/// performs the actual delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: Recipient,
    pub event: Event,
}

impl Delivery {
    pub fn to_caller(event: Event) -> Delivery {
        Delivery {
            to: Recipient::Caller,
            event,
        }
    }

    pub fn to_connection(conn: impl Into<String>, event: Event) -> Delivery {
        Delivery {
            to: Recipient::Connection(conn.into()),
            event,
        }
    }

    pub fn to_everyone(event: Event) -> Delivery {
        Delivery {
            to: Recipient::Everyone,
            event,
        }
    }
}

/// Raw text pushed to a websocket actor.
#[derive(Message)]
#[rtype(result = "()")]
pub struct OutboundText(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_tagged_json() {
        let action: Action = serde_json::from_str(
            r#"{"action":"make-move","room_id":"AB12CD","from":"e2","to":"e4"}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            Action::MakeMove {
                room_id: "AB12CD".into(),
                from: "e2".into(),
                to: "e4".into(),
                promotion: None,
            }
        );

        let action: Action = serde_json::from_str(
            r#"{"action":"make-move","room_id":"AB12CD","from":"e7","to":"e8","promotion":"knight"}"#,
        )
        .unwrap();
        assert!(matches!(
            action,
            Action::MakeMove {
                promotion: Some(PieceKind::Knight),
                ..
            }
        ));
    }

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = Event::QueueJoined { position: 2 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"queue-joined","position":2}"#);
    }
}
