//! Routes inbound player actions to the directory, the matchmaking queue
//! and the sessions, and shapes the outbound events the transport delivers.
//!
//! Every call is a synchronous state transition: an action comes in under a
//! verified identity, the affected session mutates under its own lock, and
//! an explicit list of deliveries comes back out.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::directory::SessionDirectory;
use crate::error::GameError;
use crate::game::Square;
use crate::matchmaking::{MatchQueue, QueueEntry};
use crate::models::session::RankEvent;
use crate::models::{
    Action, ActionEnvelope, Delivery, Event, Session, SessionStatus, SlotView,
};
use crate::ranking::RankingService;
use crate::store::SessionStore;

pub struct Dispatcher {
    directory: SessionDirectory,
    queue: MatchQueue,
    ranking: Arc<dyn RankingService>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SessionStore>, ranking: Arc<dyn RankingService>) -> Dispatcher {
        Dispatcher {
            directory: SessionDirectory::new(store),
            queue: MatchQueue::new(),
            ranking,
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    /// Performs one state transition and returns the events to deliver. A
    /// rejected action produces a single error event for the caller and
    /// leaves every session exactly as it was.
    pub fn dispatch(&self, envelope: ActionEnvelope) -> Vec<Delivery> {
        self.directory.flush_pending();
        let result = match envelope.action.clone() {
            Action::CreateRoom => self.create_room(&envelope),
            Action::JoinRoom { room_id } => self.join_room(&envelope, &room_id),
            Action::MakeMove {
                room_id,
                from,
                to,
                promotion,
            } => self.make_move(&envelope, &room_id, &from, &to, promotion),
            Action::LeaveRoom { room_id } => self.leave_room(&envelope, &room_id),
            Action::RequestGameState { room_id } => self.game_state(&room_id),
            Action::GetMoves { room_id, from } => self.get_moves(&envelope, &room_id, &from),
            Action::ListRooms => Ok(vec![Delivery::to_caller(Event::RoomList {
                rooms: self.directory.list_joinable(),
            })]),
            Action::JoinQueue => self.join_queue(&envelope),
            Action::LeaveQueue => Ok(self.leave_queue(&envelope)),
            Action::Disconnect => Ok(self.disconnect(&envelope)),
        };
        match result {
            Ok(deliveries) => deliveries,
            Err(error) => {
                info!(
                    "rejected {:?} from {}: {}",
                    envelope.action, envelope.username, error
                );
                vec![Delivery::to_caller(Event::Error {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                })]
            }
        }
    }

    fn create_room(&self, env: &ActionEnvelope) -> Result<Vec<Delivery>, GameError> {
        let (room_id, session) = self
            .directory
            .create(env.user_id, &env.username, &env.conn)?;
        let player = {
            let session = session.lock().unwrap();
            session
                .slot_for_conn(&env.conn)
                .map(SlotView::from)
                .ok_or_else(|| GameError::Transient("room created without a host".into()))?
        };
        Ok(vec![Delivery::to_caller(Event::RoomCreated {
            room_id,
            player,
        })])
    }

    fn join_room(&self, env: &ActionEnvelope, room_id: &str) -> Result<Vec<Delivery>, GameError> {
        let session = self
            .directory
            .get(room_id)?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
        let mut deliveries = Vec::new();
        {
            let mut locked = session.lock().unwrap();
            locked.join(env.user_id, &env.username, &env.conn)?;
            self.directory.persist(&locked);

            let player = locked
                .slot_for_conn(&env.conn)
                .map(SlotView::from)
                .ok_or_else(|| GameError::Transient("joined player has no slot".into()))?;
            let opponent = locked.opponent_of(&env.conn).map(SlotView::from);
            deliveries.push(Delivery::to_caller(Event::RoomJoined {
                room_id: room_id.to_string(),
                player,
                opponent,
                state: locked.game_view(),
                status: locked.status,
            }));
            if locked.is_full() && locked.status == SessionStatus::Playing {
                deliveries.extend(Self::game_started_broadcast(&locked, room_id));
            }
        }
        self.directory.admit(room_id, &session);
        info!("{} joined room {}", env.username, room_id);
        Ok(deliveries)
    }

    fn make_move(
        &self,
        env: &ActionEnvelope,
        room_id: &str,
        from: &str,
        to: &str,
        promotion: Option<crate::game::PieceKind>,
    ) -> Result<Vec<Delivery>, GameError> {
        let from_sq = Square::from_algebraic(from)
            .ok_or_else(|| GameError::Validation(format!("bad square: {}", from)))?;
        let to_sq = Square::from_algebraic(to)
            .ok_or_else(|| GameError::Validation(format!("bad square: {}", to)))?;
        if from_sq == to_sq {
            return Err(GameError::Validation(
                "origin and destination are the same square".into(),
            ));
        }

        let session = self
            .directory
            .get(room_id)?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
        let mut deliveries = Vec::new();
        let rank;
        {
            let mut locked = session.lock().unwrap();
            let report = locked.submit_move(&env.conn, from_sq, to_sq, promotion)?;
            self.directory.persist(&locked);
            rank = report.rank;

            let event = Event::MoveMade {
                room_id: room_id.to_string(),
                mv: report.record,
                state: locked.game_view(),
                next_turn: report.next_turn,
            };
            for conn in locked.connections() {
                deliveries.push(Delivery::to_connection(conn, event.clone()));
            }
            if report.finished {
                info!("room {} finished: {:?}", room_id, report.classification);
            }
        }
        self.report_rank(rank);
        Ok(deliveries)
    }

    fn leave_room(&self, env: &ActionEnvelope, room_id: &str) -> Result<Vec<Delivery>, GameError> {
        let session = self
            .directory
            .get(room_id)?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
        let mut deliveries = Vec::new();
        let rank;
        let evictable;
        {
            let mut locked = session.lock().unwrap();
            let report = locked.leave(&env.conn).ok_or(GameError::NotInSession)?;
            self.directory.persist(&locked);
            rank = report.rank;
            if let Some(conn) = report.remaining_conn {
                deliveries.push(Delivery::to_connection(
                    conn,
                    Event::OpponentLeft {
                        room_id: room_id.to_string(),
                        message: "Your opponent left the game".into(),
                    },
                ));
            }
            evictable = locked.connections().is_empty();
        }
        self.report_rank(rank);
        if evictable {
            self.directory.evict(room_id);
        }
        info!("{} left room {}", env.username, room_id);
        Ok(deliveries)
    }

    fn game_state(&self, room_id: &str) -> Result<Vec<Delivery>, GameError> {
        let session = self
            .directory
            .get(room_id)?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
        let locked = session.lock().unwrap();
        Ok(vec![Delivery::to_caller(Event::GameStateUpdated {
            room_id: room_id.to_string(),
            state: locked.game_view(),
            status: locked.status,
        })])
    }

    fn get_moves(
        &self,
        env: &ActionEnvelope,
        room_id: &str,
        from: &str,
    ) -> Result<Vec<Delivery>, GameError> {
        let from_sq = Square::from_algebraic(from)
            .ok_or_else(|| GameError::Validation(format!("bad square: {}", from)))?;
        let session = self
            .directory
            .get(room_id)?
            .ok_or_else(|| GameError::NotFound(room_id.to_string()))?;
        let locked = session.lock().unwrap();
        let slot = locked
            .slot_for_conn(&env.conn)
            .ok_or(GameError::NotInSession)?;
        let piece = locked
            .board
            .piece_at(from_sq)
            .ok_or_else(|| GameError::Validation(format!("no piece on {}", from_sq)))?;
        if piece.color != slot.color {
            return Err(GameError::RuleViolation("that piece is not yours".into()));
        }
        let moves = locked
            .board
            .legal_moves_from(from_sq)
            .iter()
            .map(|sq| sq.to_string())
            .collect();
        Ok(vec![Delivery::to_caller(Event::AvailableMoves {
            room_id: room_id.to_string(),
            from: from_sq.to_string(),
            moves,
        })])
    }

    fn join_queue(&self, env: &ActionEnvelope) -> Result<Vec<Delivery>, GameError> {
        let mut deliveries = Vec::new();
        // a player waiting for a match is withdrawn from any room they sit in
        self.leave_all_sessions(env, "Your opponent left the game", &mut deliveries);

        let size = self.queue.enqueue(QueueEntry {
            user_id: env.user_id,
            username: env.username.clone(),
            conn: env.conn.clone(),
        });
        info!("{} joined the queue ({} waiting)", env.username, size);
        deliveries.push(Delivery::to_caller(Event::QueueJoined { position: size }));
        deliveries.push(self.queue_update());

        if let Some((first, second)) = self.queue.dequeue_pair() {
            match self.spawn_matched_session(&first, &second) {
                Ok(matched) => {
                    deliveries.extend(matched);
                    deliveries.push(self.queue_update());
                }
                Err(error) => {
                    // the pair goes back on the list; plain re-append keeps
                    // fairness degrading instead of deadlocking
                    warn!(
                        "matchmaking failed ({}), re-enqueueing {} and {}",
                        error, first.username, second.username
                    );
                    self.queue.enqueue(first);
                    self.queue.enqueue(second);
                }
            }
        }
        Ok(deliveries)
    }

    fn leave_queue(&self, env: &ActionEnvelope) -> Vec<Delivery> {
        if self.queue.withdraw(&env.conn).is_some() {
            info!("{} left the queue", env.username);
        }
        vec![Delivery::to_caller(Event::QueueLeft), self.queue_update()]
    }

    /// Disconnection cancels the player's participation everywhere without
    /// tearing the sessions themselves down.
    fn disconnect(&self, env: &ActionEnvelope) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        if self.queue.withdraw(&env.conn).is_some() {
            deliveries.push(self.queue_update());
        }
        self.leave_all_sessions(env, "Your opponent disconnected", &mut deliveries);
        deliveries
    }

    fn queue_update(&self) -> Delivery {
        Delivery::to_everyone(Event::QueueUpdated {
            size: self.queue.len(),
            players: self.queue.players(),
        })
    }

    fn spawn_matched_session(
        &self,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<Vec<Delivery>, GameError> {
        let (room_id, session) = self
            .directory
            .create(first.user_id, &first.username, &first.conn)?;
        match self.seat_pair(&session, &room_id, first, second) {
            Ok(deliveries) => {
                info!(
                    "matched {} and {} into room {}",
                    first.username, second.username, room_id
                );
                Ok(deliveries)
            }
            Err(error) => {
                self.directory.discard(&room_id);
                Err(error)
            }
        }
    }

    fn seat_pair(
        &self,
        session: &Arc<Mutex<Session>>,
        room_id: &str,
        first: &QueueEntry,
        second: &QueueEntry,
    ) -> Result<Vec<Delivery>, GameError> {
        let mut locked = session.lock().unwrap();
        locked.join(second.user_id, &second.username, &second.conn)?;
        self.directory.persist(&locked);

        let mut deliveries = Vec::new();
        for entry in [first, second] {
            let player = locked
                .slot_for_conn(&entry.conn)
                .map(SlotView::from)
                .ok_or_else(|| {
                    GameError::Transient("matched players could not both be seated".into())
                })?;
            let opponent = locked.opponent_of(&entry.conn).map(SlotView::from);
            deliveries.push(Delivery::to_connection(
                entry.conn.clone(),
                Event::RoomJoined {
                    room_id: room_id.to_string(),
                    player,
                    opponent,
                    state: locked.game_view(),
                    status: locked.status,
                },
            ));
        }
        deliveries.extend(Self::game_started_broadcast(&locked, room_id));
        Ok(deliveries)
    }

    fn game_started_broadcast(session: &Session, room_id: &str) -> Vec<Delivery> {
        let (p1, p2) = match (&session.player1, &session.player2) {
            (Some(p1), Some(p2)) => (p1, p2),
            _ => return Vec::new(),
        };
        let started = Event::GameStarted {
            room_id: room_id.to_string(),
            player1: SlotView::from(p1),
            player2: SlotView::from(p2),
            state: session.game_view(),
        };
        session
            .connections()
            .into_iter()
            .map(|conn| Delivery::to_connection(conn, started.clone()))
            .collect()
    }

    fn leave_all_sessions(
        &self,
        env: &ActionEnvelope,
        message: &str,
        deliveries: &mut Vec<Delivery>,
    ) {
        for (room_id, session) in self.directory.sessions_for_connection(&env.conn) {
            let mut rank = None;
            let mut evictable = false;
            {
                let mut locked = session.lock().unwrap();
                if let Some(report) = locked.leave(&env.conn) {
                    self.directory.persist(&locked);
                    rank = report.rank;
                    if let Some(conn) = report.remaining_conn {
                        deliveries.push(Delivery::to_connection(
                            conn,
                            Event::OpponentLeft {
                                room_id: room_id.clone(),
                                message: message.to_string(),
                            },
                        ));
                    }
                    evictable = locked.connections().is_empty();
                }
            }
            self.report_rank(rank);
            if evictable {
                self.directory.evict(&room_id);
            }
        }
    }

    fn report_rank(&self, rank: Option<RankEvent>) {
        match rank {
            Some(RankEvent::Decisive { winner, loser }) => {
                self.ranking.record_result(winner, loser)
            }
            Some(RankEvent::Draw { white, black }) => self.ranking.record_draw(white, black),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recipient;
    use crate::ranking::testutil::RecordingRanking;
    use crate::store::testutil::{CollidingStore, FlakyStore};
    use crate::store::{InMemorySessionStore, SessionStore};
    use uuid::Uuid;

    struct Player {
        user_id: Uuid,
        name: &'static str,
        conn: &'static str,
    }

    impl Player {
        fn new(name: &'static str, conn: &'static str) -> Player {
            Player {
                user_id: Uuid::new_v4(),
                name,
                conn,
            }
        }

        fn envelope(&self, action: Action) -> ActionEnvelope {
            ActionEnvelope {
                user_id: self.user_id,
                username: self.name.to_string(),
                conn: self.conn.to_string(),
                action,
            }
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<RecordingRanking>) {
        let ranking = Arc::new(RecordingRanking::new());
        let dispatcher = Dispatcher::new(
            Arc::new(InMemorySessionStore::new()),
            ranking.clone(),
        );
        (dispatcher, ranking)
    }

    fn created_room_id(deliveries: &[Delivery]) -> String {
        deliveries
            .iter()
            .find_map(|d| match &d.event {
                Event::RoomCreated { room_id, .. } => Some(room_id.clone()),
                _ => None,
            })
            .expect("no room-created event")
    }

    fn start_game(dispatcher: &Dispatcher, alice: &Player, bob: &Player) -> String {
        let room_id = created_room_id(&dispatcher.dispatch(alice.envelope(Action::CreateRoom)));
        dispatcher.dispatch(bob.envelope(Action::JoinRoom {
            room_id: room_id.clone(),
        }));
        room_id
    }

    fn make_move(dispatcher: &Dispatcher, player: &Player, room_id: &str, from: &str, to: &str) -> Vec<Delivery> {
        dispatcher.dispatch(player.envelope(Action::MakeMove {
            room_id: room_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
        }))
    }

    #[test]
    fn create_then_join_starts_the_game_for_both_players() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");

        let created = dispatcher.dispatch(alice.envelope(Action::CreateRoom));
        assert!(matches!(
            created[0],
            Delivery {
                to: Recipient::Caller,
                event: Event::RoomCreated { .. }
            }
        ));
        let room_id = created_room_id(&created);

        let joined = dispatcher.dispatch(bob.envelope(Action::JoinRoom {
            room_id: room_id.clone(),
        }));
        assert!(joined.iter().any(|d| matches!(
            &d.event,
            Event::RoomJoined { status: SessionStatus::Playing, opponent: Some(opp), .. }
                if opp.username == "alice"
        )));
        let started: Vec<&Delivery> = joined
            .iter()
            .filter(|d| matches!(d.event, Event::GameStarted { .. }))
            .collect();
        assert_eq!(started.len(), 2);
        assert!(started
            .iter()
            .any(|d| d.to == Recipient::Connection("conn-a".into())));
        assert!(started
            .iter()
            .any(|d| d.to == Recipient::Connection("conn-b".into())));
    }

    #[test]
    fn a_third_identity_is_turned_away_at_the_door() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let carol = Player::new("carol", "conn-c");
        let room_id = start_game(&dispatcher, &alice, &bob);

        let rejected = dispatcher.dispatch(carol.envelope(Action::JoinRoom { room_id }));
        assert_eq!(rejected.len(), 1);
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "capacity"
        ));
    }

    #[test]
    fn joining_an_unknown_room_is_not_found() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let rejected = dispatcher.dispatch(alice.envelope(Action::JoinRoom {
            room_id: "NOSUCH".into(),
        }));
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "not-found"
        ));
    }

    #[test]
    fn moves_broadcast_to_both_players_and_alternate_turns() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        let deliveries = make_move(&dispatcher, &alice, &room_id, "e2", "e4");
        let move_made: Vec<&Delivery> = deliveries
            .iter()
            .filter(|d| matches!(d.event, Event::MoveMade { .. }))
            .collect();
        assert_eq!(move_made.len(), 2);

        // white cannot move twice in a row
        let rejected = make_move(&dispatcher, &alice, &room_id, "d2", "d4");
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "rule-violation"
        ));
    }

    #[test]
    fn malformed_and_degenerate_coordinates_are_validation_errors() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        let rejected = make_move(&dispatcher, &alice, &room_id, "z9", "e4");
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "validation"
        ));

        let rejected = make_move(&dispatcher, &alice, &room_id, "e2", "e2");
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "validation"
        ));
    }

    #[test]
    fn rejected_moves_change_nothing() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        make_move(&dispatcher, &alice, &room_id, "e2", "e6");
        let state = dispatcher.dispatch(alice.envelope(Action::RequestGameState {
            room_id: room_id.clone(),
        }));
        assert!(matches!(
            &state[0].event,
            Event::GameStateUpdated { state, .. } if state.move_history.is_empty()
        ));
    }

    #[test]
    fn fastest_mate_finishes_the_room_and_ranks_exactly_once() {
        let (dispatcher, ranking) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        make_move(&dispatcher, &alice, &room_id, "f2", "f3");
        make_move(&dispatcher, &bob, &room_id, "e7", "e5");
        make_move(&dispatcher, &alice, &room_id, "g2", "g4");
        let deliveries = make_move(&dispatcher, &bob, &room_id, "d8", "h4");

        assert!(deliveries.iter().any(|d| matches!(
            &d.event,
            Event::MoveMade { state, .. }
                if state.phase == crate::game::Classification::Checkmate
        )));
        assert_eq!(
            ranking.results.lock().unwrap().as_slice(),
            &[(bob.user_id, alice.user_id)]
        );

        // the finished game rejects further moves and never ranks again
        let rejected = make_move(&dispatcher, &alice, &room_id, "e2", "e4");
        assert!(matches!(&rejected[0].event, Event::Error { .. }));
        assert_eq!(ranking.results.lock().unwrap().len(), 1);
    }

    #[test]
    fn disconnect_abandons_the_room_and_crowns_the_survivor() {
        let (dispatcher, ranking) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        let deliveries = dispatcher.dispatch(alice.envelope(Action::Disconnect));
        assert!(deliveries.iter().any(|d| d.to
            == Recipient::Connection("conn-b".into())
            && matches!(d.event, Event::OpponentLeft { .. })));
        assert_eq!(
            ranking.results.lock().unwrap().as_slice(),
            &[(bob.user_id, alice.user_id)]
        );

        let state = dispatcher.dispatch(bob.envelope(Action::RequestGameState {
            room_id: room_id.clone(),
        }));
        assert!(matches!(
            &state[0].event,
            Event::GameStateUpdated { status: SessionStatus::Abandoned, .. }
        ));

        // the survivor disconnecting afterwards ranks nothing new
        dispatcher.dispatch(bob.envelope(Action::Disconnect));
        assert_eq!(ranking.results.lock().unwrap().len(), 1);
    }

    #[test]
    fn reconnection_resumes_an_abandoned_game() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);
        make_move(&dispatcher, &alice, &room_id, "e2", "e4");

        dispatcher.dispatch(alice.envelope(Action::Disconnect));

        let alice_back = Player {
            user_id: alice.user_id,
            name: "alice",
            conn: "conn-a2",
        };
        let joined = dispatcher.dispatch(alice_back.envelope(Action::JoinRoom {
            room_id: room_id.clone(),
        }));
        assert!(joined.iter().any(|d| matches!(
            &d.event,
            Event::RoomJoined { status: SessionStatus::Playing, state, .. }
                if state.move_history.len() == 1
        )));
    }

    #[test]
    fn queue_pairs_the_two_oldest_and_leaves_the_third_waiting() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let carol = Player::new("carol", "conn-c");

        let first = dispatcher.dispatch(alice.envelope(Action::JoinQueue));
        assert!(first
            .iter()
            .any(|d| matches!(d.event, Event::QueueJoined { position: 1 })));
        assert!(first
            .iter()
            .all(|d| !matches!(d.event, Event::RoomJoined { .. })));

        let second = dispatcher.dispatch(bob.envelope(Action::JoinQueue));
        let joined: Vec<&Delivery> = second
            .iter()
            .filter(|d| matches!(d.event, Event::RoomJoined { .. }))
            .collect();
        assert_eq!(joined.len(), 2);
        assert!(joined
            .iter()
            .any(|d| d.to == Recipient::Connection("conn-a".into())));
        assert!(joined
            .iter()
            .any(|d| d.to == Recipient::Connection("conn-b".into())));
        assert!(second
            .iter()
            .any(|d| matches!(d.event, Event::GameStarted { .. })));
        assert!(dispatcher.queue.is_empty());

        dispatcher.dispatch(carol.envelope(Action::JoinQueue));
        assert_eq!(dispatcher.queue.len(), 1);
        assert!(dispatcher.queue.contains("conn-c"));
    }

    #[test]
    fn a_failed_pairing_returns_both_players_to_the_queue() {
        let ranking = Arc::new(RecordingRanking::new());
        let dispatcher = Dispatcher::new(Arc::new(CollidingStore), ranking);
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");

        dispatcher.dispatch(alice.envelope(Action::JoinQueue));
        let deliveries = dispatcher.dispatch(bob.envelope(Action::JoinQueue));

        assert!(deliveries
            .iter()
            .all(|d| !matches!(d.event, Event::RoomJoined { .. })));
        assert_eq!(dispatcher.queue.len(), 2);
        let names: Vec<String> = dispatcher
            .queue
            .players()
            .into_iter()
            .map(|p| p.username)
            .collect();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn a_failed_save_is_parked_and_flushed_on_the_next_dispatch() {
        let store = Arc::new(FlakyStore::failing(1));
        let ranking = Arc::new(RecordingRanking::new());
        let dispatcher = Dispatcher::new(store.clone(), ranking);
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");

        let room_id = created_room_id(&dispatcher.dispatch(alice.envelope(Action::CreateRoom)));
        // the store missed the write, but the live room stays authoritative
        assert!(store.find(&room_id).unwrap().is_none());
        assert_eq!(dispatcher.directory().pending_writes(), 1);

        let joined = dispatcher.dispatch(bob.envelope(Action::JoinRoom {
            room_id: room_id.clone(),
        }));
        assert!(joined
            .iter()
            .any(|d| matches!(d.event, Event::GameStarted { .. })));
        let persisted = store.find(&room_id).unwrap().unwrap();
        assert_eq!(persisted.status, SessionStatus::Playing);
        assert_eq!(dispatcher.directory().pending_writes(), 0);
    }

    #[test]
    fn joining_the_queue_walks_out_of_a_live_room_first() {
        let (dispatcher, ranking) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        start_game(&dispatcher, &alice, &bob);

        let deliveries = dispatcher.dispatch(alice.envelope(Action::JoinQueue));
        assert!(deliveries.iter().any(|d| d.to
            == Recipient::Connection("conn-b".into())
            && matches!(d.event, Event::OpponentLeft { .. })));
        assert_eq!(ranking.results.lock().unwrap().len(), 1);
        assert!(dispatcher.queue.contains("conn-a"));
    }

    #[test]
    fn leaving_the_queue_acknowledges_and_updates_everyone() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        dispatcher.dispatch(alice.envelope(Action::JoinQueue));

        let deliveries = dispatcher.dispatch(alice.envelope(Action::LeaveQueue));
        assert!(matches!(deliveries[0].event, Event::QueueLeft));
        assert!(deliveries.iter().any(|d| d.to == Recipient::Everyone
            && matches!(d.event, Event::QueueUpdated { size: 0, .. })));
    }

    #[test]
    fn listing_shows_waiting_rooms_only() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = created_room_id(&dispatcher.dispatch(alice.envelope(Action::CreateRoom)));

        let listed = dispatcher.dispatch(bob.envelope(Action::ListRooms));
        assert!(matches!(
            &listed[0].event,
            Event::RoomList { rooms } if rooms.len() == 1 && rooms[0].room_id == room_id
        ));

        dispatcher.dispatch(bob.envelope(Action::JoinRoom {
            room_id: room_id.clone(),
        }));
        let listed = dispatcher.dispatch(bob.envelope(Action::ListRooms));
        assert!(matches!(
            &listed[0].event,
            Event::RoomList { rooms } if rooms.is_empty()
        ));
    }

    #[test]
    fn get_moves_reports_legal_destinations_for_own_pieces_only() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        let deliveries = dispatcher.dispatch(alice.envelope(Action::GetMoves {
            room_id: room_id.clone(),
            from: "e2".into(),
        }));
        match &deliveries[0].event {
            Event::AvailableMoves { moves, .. } => {
                let mut moves = moves.clone();
                moves.sort();
                assert_eq!(moves, vec!["e3".to_string(), "e4".to_string()]);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let rejected = dispatcher.dispatch(alice.envelope(Action::GetMoves {
            room_id,
            from: "e7".into(),
        }));
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "rule-violation"
        ));
    }

    #[test]
    fn promotion_choice_rides_along_with_the_move() {
        let (dispatcher, _) = dispatcher();
        let alice = Player::new("alice", "conn-a");
        let bob = Player::new("bob", "conn-b");
        let room_id = start_game(&dispatcher, &alice, &bob);

        // not a promoting move, so the choice is rejected up front
        let rejected = dispatcher.dispatch(alice.envelope(Action::MakeMove {
            room_id,
            from: "e2".into(),
            to: "e4".into(),
            promotion: Some(crate::game::PieceKind::Queen),
        }));
        assert!(matches!(
            &rejected[0].event,
            Event::Error { kind, .. } if kind == "validation"
        ));
    }
}
