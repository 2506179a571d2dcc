//! Per-connection subscription state: one entry per (peer, document).
//!
//! `Unsubscribed -> Joining -> Joined -> Left`. A failed join falls back to
//! `Unsubscribed`; a left document may be joined again. Disconnect moves
//! every joined document to `Left` at once and reports which ones they were.
//! This is connection-local state; the shared fan-out registry is the room
//! map in `AppState`.

use std::collections::HashMap;

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Joining,
    Joined,
    Left,
}

/// What `begin_join` decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStart {
    /// First join (or re-join after leaving): peers will be notified.
    Fresh,
    /// Already joined: only the snapshot is re-sent.
    AlreadyJoined,
}

#[derive(Debug, Default)]
pub struct Subscriptions {
    states: HashMap<Uuid, SubscriptionState>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, document_id: Uuid) -> SubscriptionState {
        self.states
            .get(&document_id)
            .copied()
            .unwrap_or(SubscriptionState::Unsubscribed)
    }

    #[must_use]
    pub fn is_joined(&self, document_id: Uuid) -> bool {
        self.state(document_id) == SubscriptionState::Joined
    }

    pub fn begin_join(&mut self, document_id: Uuid) -> JoinStart {
        if self.is_joined(document_id) {
            return JoinStart::AlreadyJoined;
        }
        self.states.insert(document_id, SubscriptionState::Joining);
        JoinStart::Fresh
    }

    pub fn complete_join(&mut self, document_id: Uuid) {
        if self.state(document_id) == SubscriptionState::Joining {
            self.states.insert(document_id, SubscriptionState::Joined);
        }
    }

    /// Access denied or load failure: no state change survives.
    pub fn abort_join(&mut self, document_id: Uuid) {
        if self.state(document_id) == SubscriptionState::Joining {
            self.states.remove(&document_id);
        }
    }

    /// Returns true when the document was joined.
    pub fn leave(&mut self, document_id: Uuid) -> bool {
        if !self.is_joined(document_id) {
            return false;
        }
        self.states.insert(document_id, SubscriptionState::Left);
        true
    }

    /// Leave everything; returns the documents that were joined.
    pub fn disconnect(&mut self) -> Vec<Uuid> {
        let joined = self.joined();
        for id in &joined {
            self.states.insert(*id, SubscriptionState::Left);
        }
        joined
    }

    #[must_use]
    pub fn joined(&self) -> Vec<Uuid> {
        let mut joined: Vec<Uuid> = self
            .states
            .iter()
            .filter(|(_, state)| **state == SubscriptionState::Joined)
            .map(|(id, _)| *id)
            .collect();
        joined.sort_unstable();
        joined
    }
}
