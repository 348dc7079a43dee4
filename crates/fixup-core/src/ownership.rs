//! Bounded record of who owns each relayed message.

use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use crate::domain::{MessageId, UserId};

#[derive(Clone, Copy, Debug)]
struct Entry {
    author: UserId,
    inserted_at: Instant,
}

/// Maps relayed message ids to the original author.
///
/// Entries are evicted oldest-first once `capacity` is reached, and treated as
/// absent once older than `ttl`. Re-inserting a key refreshes its age.
#[derive(Debug)]
pub struct OwnershipTable {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<MessageId, Entry>,
    // Insertion order; may hold stale keys for entries that were removed or refreshed.
    order: VecDeque<(MessageId, Instant)>,
}

impl OwnershipTable {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, message: MessageId, author: UserId) {
        self.insert_at(message, author, Instant::now());
    }

    pub fn insert_at(&mut self, message: MessageId, author: UserId, now: Instant) {
        self.purge_expired(now);

        self.entries.insert(
            message,
            Entry {
                author,
                inserted_at: now,
            },
        );
        self.order.push_back((message, now));

        while self.entries.len() > self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        self.compact_order();
    }

    /// Recorded author of `message`, if tracked and not expired.
    pub fn owner(&self, message: MessageId) -> Option<UserId> {
        self.owner_at(message, Instant::now())
    }

    pub fn owner_at(&self, message: MessageId, now: Instant) -> Option<UserId> {
        let entry = self.entries.get(&message)?;
        if self.is_expired(entry, now) {
            return None;
        }
        Some(entry.author)
    }

    /// Remove and return the recorded author. Missing or expired entries yield `None`.
    pub fn remove(&mut self, message: MessageId) -> Option<UserId> {
        self.remove_at(message, Instant::now())
    }

    pub fn remove_at(&mut self, message: MessageId, now: Instant) -> Option<UserId> {
        let entry = self.entries.remove(&message)?;
        if self.is_expired(&entry, now) {
            return None;
        }
        Some(entry.author)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    fn purge_expired(&mut self, now: Instant) {
        while let Some(&(id, at)) = self.order.front() {
            if now.saturating_duration_since(at) < self.ttl {
                break;
            }
            self.order.pop_front();
            if self
                .entries
                .get(&id)
                .is_some_and(|e| e.inserted_at == at)
            {
                self.entries.remove(&id);
            }
        }
    }

    /// Drop the oldest live entry. Returns false when nothing is left to evict.
    fn evict_oldest(&mut self) -> bool {
        while let Some((id, at)) = self.order.pop_front() {
            if self
                .entries
                .get(&id)
                .is_some_and(|e| e.inserted_at == at)
            {
                self.entries.remove(&id);
                return true;
            }
        }
        false
    }

    fn compact_order(&mut self) {
        if self.order.len() <= self.capacity.saturating_mul(2) {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(id, at)| entries.get(id).is_some_and(|e| e.inserted_at == *at));
    }
}
