//! Collaborator seams around a game's conclusion: the ranking service
//! notified exactly once per finished or abandoned session, and the
//! optional move-suggestion engine behind the computer-opponent feature.

use log::debug;
use uuid::Uuid;

use crate::game::{Board, Square};

pub trait RankingService: Send + Sync {
    fn record_result(&self, winner: Uuid, loser: Uuid);
    fn record_draw(&self, white: Uuid, black: Uuid);
}

/// Default implementation that only logs; deployments plug in a
/// collaborator talking to the profile store.
pub struct LoggingRanking;

impl RankingService for LoggingRanking {
    fn record_result(&self, winner: Uuid, loser: Uuid) {
        debug!("ranking: {} defeats {}", winner, loser);
    }

    fn record_draw(&self, white: Uuid, black: Uuid) {
        debug!("ranking: draw between {} and {}", white, black);
    }
}

/// External engine proposing a move for the computer opponent. Suggestions
/// go through the same legality checks as any player move.
pub trait MoveSuggester: Send + Sync {
    fn suggest(&self, board: &Board) -> Option<(Square, Square)>;
}
