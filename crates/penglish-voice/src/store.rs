//! Session Store: call id -> live `CallSession`.
//!
//! Owned by the orchestrator. Operations on different call ids never contend on
//! the same lock; operations on one call id are serialized by the map shard.

use crate::error::SessionError;
use crate::locale::LanguageTag;
use crate::session::{CallPhase, CallSession, Role, Turn};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// CRUD over live call sessions. Reads return snapshots.
pub trait SessionStore: Send + Sync {
    /// Insert a fully built session. Fails if the call id is already live.
    fn insert(&self, session: CallSession) -> Result<CallSession, SessionError>;

    /// Snapshot of a live session.
    fn get(&self, call_id: &str) -> Option<CallSession>;

    /// Append one turn.
    fn append_turn(&self, call_id: &str, role: Role, text: &str) -> Result<(), SessionError>;

    /// Append a user turn and its assistant reply under one lock, so history
    /// never holds a user turn without its reply.
    fn append_exchange(
        &self,
        call_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), SessionError>;

    fn set_phase(&self, call_id: &str, phase: CallPhase) -> Result<(), SessionError>;

    /// Remove and return the session. Exactly one concurrent caller gets it.
    fn remove(&self, call_id: &str) -> Option<CallSession>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create an inbound, active session with empty history.
    fn create(
        &self,
        call_id: &str,
        counterpart_address: &str,
        language: LanguageTag,
    ) -> Result<CallSession, SessionError> {
        self.insert(CallSession::inbound(call_id, counterpart_address, language))
    }
}

/// In-process store on a sharded concurrent map.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, CallSession>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: CallSession) -> Result<CallSession, SessionError> {
        match self.sessions.entry(session.call_id().to_string()) {
            Entry::Occupied(e) => Err(SessionError::DuplicateSession(e.key().clone())),
            Entry::Vacant(e) => Ok(e.insert(session).value().clone()),
        }
    }

    fn get(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.value().clone())
    }

    fn append_turn(&self, call_id: &str, role: Role, text: &str) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SessionError::UnknownSession(call_id.to_string()))?;
        session.push(Turn { role, text: text.to_string() });
        Ok(())
    }

    fn append_exchange(
        &self,
        call_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SessionError::UnknownSession(call_id.to_string()))?;
        session.push(Turn::user(user_text));
        session.push(Turn::assistant(assistant_text));
        Ok(())
    }

    fn set_phase(&self, call_id: &str, phase: CallPhase) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| SessionError::UnknownSession(call_id.to_string()))?;
        session.set_phase(phase);
        Ok(())
    }

    fn remove(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.remove(call_id).map(|(_, s)| s)
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fa() -> LanguageTag {
        LanguageTag::new("fa-IR")
    }

    #[test]
    fn create_rejects_duplicate_call_id() {
        let store = InMemorySessionStore::new();
        let s = store.create("C1", "+1555", fa()).unwrap();
        assert!(s.turns().is_empty());
        assert_eq!(
            store.create("C1", "+1666", fa()),
            Err(SessionError::DuplicateSession("C1".into()))
        );
        assert_eq!(store.get("C1").unwrap().counterpart_address(), "+1555");
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let store = InMemorySessionStore::new();
        assert_eq!(
            store.append_turn("nope", Role::User, "hi"),
            Err(SessionError::UnknownSession("nope".into()))
        );
        assert!(store.append_exchange("nope", "a", "b").is_err());
    }

    #[test]
    fn remove_returns_session_once() {
        let store = InMemorySessionStore::new();
        store.create("C1", "+1555", fa()).unwrap();
        store.append_exchange("C1", "hello", "hi there").unwrap();

        let removed = store.remove("C1").unwrap();
        assert_eq!(removed.turns(), &[Turn::user("hello"), Turn::assistant("hi there")]);
        assert!(store.remove("C1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn get_returns_a_snapshot() {
        let store = InMemorySessionStore::new();
        store.create("C1", "+1555", fa()).unwrap();
        let before = store.get("C1").unwrap();
        store.append_turn("C1", Role::User, "later").unwrap();
        assert!(before.turns().is_empty());
        assert_eq!(store.get("C1").unwrap().turns().len(), 1);
    }

    #[test]
    fn distinct_calls_from_many_threads_stay_isolated() {
        let store = Arc::new(InMemorySessionStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let id = format!("C{}", i);
                    store.create(&id, "+1555", LanguageTag::new("en")).unwrap();
                    for n in 0..50 {
                        store
                            .append_exchange(&id, &format!("{} q{}", id, n), &format!("{} a{}", id, n))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.len(), 8);
        for i in 0..8 {
            let id = format!("C{}", i);
            let s = store.get(&id).unwrap();
            assert_eq!(s.turns().len(), 100);
            assert!(s.turns().iter().all(|t| t.text.starts_with(&format!("{} ", id))));
        }
    }
}
