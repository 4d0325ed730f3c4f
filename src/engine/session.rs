//! Engine sessions.
//!
//! A session is one running engine instance. Sessions live in a table keyed
//! by a monotonic id; input contexts refer to them by id. The back-pointer
//! from a session to the context that last focused it is a plain context id
//! that the broker clears when that context is destroyed.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use super::dummy::DUMMY_UUID;
use super::provider::ProviderTable;
use super::Engine;

/// Process-unique session identifier, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// A running engine instance.
#[derive(Debug)]
pub struct EngineSession {
    /// Session id.
    pub id: SessionId,
    /// Provider that created the engine.
    pub provider: Uuid,
    /// Encoding the engine was created with.
    pub encoding: String,
    /// Context that most recently focused this session.
    pub owner: Option<usize>,
    /// The engine.
    pub engine: Box<dyn Engine>,
}

/// All live sessions.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<SessionId, EngineSession>,
    next_id: u32,
}

impl SessionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `provider`, falling back to the dummy provider
    /// when creation fails.
    pub fn create(&mut self, providers: &ProviderTable, provider: Uuid, encoding: &str) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let (provider, engine) = match providers.create(provider, encoding, id.0) {
            Ok(engine) => (provider, engine),
            Err(e) => {
                log::warn!("[engine] cannot create {provider} for {id}: {e:#}; using fallback");
                let engine = providers
                    .create(DUMMY_UUID, encoding, id.0)
                    .unwrap_or_else(|_| Box::new(super::dummy::DummyEngine));
                (DUMMY_UUID, engine)
            }
        };
        log::debug!("[engine] created {id} ({provider})");
        self.sessions.insert(
            id,
            EngineSession {
                id,
                provider,
                encoding: encoding.to_string(),
                owner: None,
                engine,
            },
        );
        id
    }

    /// Destroy a session.
    pub fn remove(&mut self, id: SessionId) -> Option<EngineSession> {
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            log::debug!("[engine] destroyed {id}");
        }
        removed
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&EngineSession> {
        self.sessions.get(&id)
    }

    /// Look up a session mutably.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut EngineSession> {
        self.sessions.get_mut(&id)
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Every live session.
    pub fn iter(&self) -> impl Iterator<Item = &EngineSession> {
        self.sessions.values()
    }

    /// Every live session, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EngineSession> {
        self.sessions.values_mut()
    }

    /// Record `context` as the owner of `id`.
    pub fn set_owner(&mut self, id: SessionId, context: usize) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.owner = Some(context);
        }
    }

    /// Clear every back-pointer to `context`.
    pub fn forget_owner(&mut self, context: usize) {
        for session in self.sessions.values_mut() {
            if session.owner == Some(context) {
                session.owner = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::rawcode::RAWCODE_UUID;

    #[test]
    fn test_ids_are_monotonic() {
        let providers = ProviderTable::with_builtin();
        let mut table = SessionTable::new();
        let a = table.create(&providers, RAWCODE_UUID, "UTF-8");
        table.remove(a);
        let b = table.create(&providers, RAWCODE_UUID, "UTF-8");
        assert!(b > a);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_failed_creation_falls_back() {
        let providers = ProviderTable::with_builtin();
        let mut table = SessionTable::new();
        let id = table.create(&providers, RAWCODE_UUID, "ISO-8859-1");
        assert_eq!(table.get(id).unwrap().provider, DUMMY_UUID);
        let id = table.create(&providers, Uuid::from_u128(1), "UTF-8");
        assert_eq!(table.get(id).unwrap().provider, DUMMY_UUID);
    }

    #[test]
    fn test_forget_owner_clears_back_pointers() {
        let providers = ProviderTable::with_builtin();
        let mut table = SessionTable::new();
        let a = table.create(&providers, RAWCODE_UUID, "UTF-8");
        let b = table.create(&providers, RAWCODE_UUID, "UTF-8");
        table.set_owner(a, 3);
        table.set_owner(b, 4);
        table.forget_owner(3);
        assert_eq!(table.get(a).unwrap().owner, None);
        assert_eq!(table.get(b).unwrap().owner, Some(4));
    }
}
