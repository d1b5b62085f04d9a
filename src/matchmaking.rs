//! FIFO waiting list pairing players who asked for an automatic match.

use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::QueuePlayer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: Uuid,
    pub username: String,
    pub conn: String,
}

/// The shared matchmaking queue. Internally synchronized, independent of
/// any session lock.
#[derive(Default)]
pub struct MatchQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl MatchQueue {
    pub fn new() -> MatchQueue {
        MatchQueue::default()
    }

    /// Appends an entry, first dropping any previous entry for the same
    /// connection. Returns the new queue size.
    pub fn enqueue(&self, entry: QueueEntry) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|queued| queued.conn != entry.conn);
        entries.push_back(entry);
        entries.len()
    }

    /// Pops the two oldest entries once at least two are waiting.
    pub fn dequeue_pair(&self) -> Option<(QueueEntry, QueueEntry)> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() < 2 {
            return None;
        }
        let first = entries.pop_front()?;
        let second = entries.pop_front()?;
        Some((first, second))
    }

    /// Removes a specific entry. O(n), which is fine at queue scale.
    pub fn withdraw(&self, conn: &str) -> Option<QueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let index = entries.iter().position(|queued| queued.conn == conn)?;
        entries.remove(index)
    }

    pub fn contains(&self, conn: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|queued| queued.conn == conn)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Public roster used by queue-updated broadcasts.
    pub fn players(&self) -> Vec<QueuePlayer> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|queued| QueuePlayer {
                user_id: queued.user_id,
                username: queued.username.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, conn: &str) -> QueueEntry {
        QueueEntry {
            user_id: Uuid::new_v4(),
            username: name.to_string(),
            conn: conn.to_string(),
        }
    }

    #[test]
    fn pairs_the_two_oldest_entries_in_arrival_order() {
        let queue = MatchQueue::new();
        let a = entry("alice", "conn-a");
        let b = entry("bob", "conn-b");
        let c = entry("carol", "conn-c");
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        queue.enqueue(c.clone());

        let (first, second) = queue.dequeue_pair().unwrap();
        assert_eq!(first, a);
        assert_eq!(second, b);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains("conn-c"));
    }

    #[test]
    fn no_pair_until_two_are_waiting() {
        let queue = MatchQueue::new();
        queue.enqueue(entry("alice", "conn-a"));
        assert!(queue.dequeue_pair().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn enqueue_replaces_a_previous_entry_for_the_same_connection() {
        let queue = MatchQueue::new();
        queue.enqueue(entry("alice", "conn-a"));
        let size = queue.enqueue(entry("alice", "conn-a"));
        assert_eq!(size, 1);
    }

    #[test]
    fn withdraw_removes_only_the_matching_entry() {
        let queue = MatchQueue::new();
        queue.enqueue(entry("alice", "conn-a"));
        queue.enqueue(entry("bob", "conn-b"));
        let withdrawn = queue.withdraw("conn-a").unwrap();
        assert_eq!(withdrawn.username, "alice");
        assert!(queue.withdraw("conn-a").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn failed_matches_reappend_both_entries() {
        let queue = MatchQueue::new();
        queue.enqueue(entry("alice", "conn-a"));
        queue.enqueue(entry("bob", "conn-b"));
        queue.enqueue(entry("carol", "conn-c"));

        // a pair that could not be seated goes back to the end of the line
        let (first, second) = queue.dequeue_pair().unwrap();
        queue.enqueue(first);
        queue.enqueue(second);

        let roster = queue.players();
        let names: Vec<&str> = roster.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
    }
}
