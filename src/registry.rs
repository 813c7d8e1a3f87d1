//! Session registry: in-flight sessions keyed by (player, game, nonce).
//!
//! Each session sits behind its own mutex inside a sharded map, so requests
//! for one key serialise while requests for different keys proceed in
//! parallel. The map guard is always released before a session lock is
//! taken, which keeps removal from inside a locked session deadlock-free.

use crate::errors::StateConflict;
use crate::games::types::GameKind;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, TryLockError},
};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Mutations are validated before they are applied, so a poisoned guard
/// never holds a half-applied change.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `player:game:nonce`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub player_id: String,
    pub game: GameKind,
    pub nonce: u64,
}

impl SessionKey {
    pub fn new(player_id: impl Into<String>, game: GameKind, nonce: u64) -> Self {
        Self {
            player_id: player_id.into(),
            game,
            nonce,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.player_id, self.game, self.nonce)
    }
}

/// Sessions that can be swept when idle
pub trait IdleTracked {
    fn last_active(&self) -> DateTime<Utc>;
}

pub type SessionHandle<T> = Arc<Mutex<T>>;

/// Thread-safe store of live sessions
pub struct SessionRegistry<T> {
    sessions: DashMap<SessionKey, SessionHandle<T>>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Store a new session; an existing live session under the key is a conflict.
    pub fn put(&self, key: SessionKey, session: T) -> Result<SessionHandle<T>, StateConflict> {
        match self.sessions.entry(key) {
            Entry::Occupied(occupied) => Err(StateConflict::SessionExists(occupied.key().to_string())),
            Entry::Vacant(vacant) => {
                let handle = Arc::new(Mutex::new(session));
                vacant.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Store a new session and run `init` on it before anyone else can lock it.
    ///
    /// If `init` fails the session is removed again; `init` should leave the
    /// session in a terminal state so a request that already cloned the handle
    /// sees it as finished.
    pub fn insert_with<R, E>(
        &self,
        key: SessionKey,
        session: T,
        init: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<StateConflict>,
    {
        let handle = Arc::new(Mutex::new(session));
        let mut guard = lock_unpoisoned(&handle);
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                return Err(StateConflict::SessionExists(occupied.key().to_string()).into())
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle.clone());
            }
        }

        let result = init(&mut guard);
        if result.is_err() {
            self.sessions.remove(&key);
        }
        result
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionHandle<T>> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn delete(&self, key: &SessionKey) -> Option<SessionHandle<T>> {
        self.sessions.remove(key).map(|(_, handle)| handle)
    }

    /// Run `f` with exclusive access to the session under `key`.
    pub fn with_session<R>(
        &self,
        key: &SessionKey,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, StateConflict> {
        let handle = self
            .get(key)
            .ok_or_else(|| StateConflict::SessionNotFound(key.to_string()))?;
        let mut session = lock_unpoisoned(&handle);
        Ok(f(&mut session))
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys_for_player(&self, player_id: &str) -> Vec<SessionKey> {
        self.sessions
            .iter()
            .filter(|entry| entry.key().player_id == player_id)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl<T: IdleTracked> SessionRegistry<T> {
    /// Keys whose session has not been touched since `cutoff`.
    ///
    /// Sessions locked by an in-flight request are skipped: they are busy,
    /// not idle.
    pub fn idle_keys(&self, cutoff: DateTime<Utc>) -> Vec<SessionKey> {
        self.sessions
            .iter()
            .filter(|entry| match entry.value().try_lock() {
                Ok(session) => session.last_active() < cutoff,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().last_active() < cutoff,
                Err(TryLockError::WouldBlock) => false,
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl<T> Default for SessionRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct Counter {
        hits: u32,
        touched: DateTime<Utc>,
    }

    impl IdleTracked for Counter {
        fn last_active(&self) -> DateTime<Utc> {
            self.touched
        }
    }

    fn counter() -> Counter {
        Counter {
            hits: 0,
            touched: Utc::now(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("alice", GameKind::Mines, 1);

        registry.put(key.clone(), counter()).unwrap();
        assert!(registry.contains(&key));
        assert_eq!(key.to_string(), "alice:mines:1");

        registry.with_session(&key, |c| c.hits += 1).unwrap();
        let hits = registry.with_session(&key, |c| c.hits).unwrap();
        assert_eq!(hits, 1);

        assert!(registry.delete(&key).is_some());
        assert!(registry.get(&key).is_none());
        assert!(matches!(
            registry.with_session(&key, |_| ()),
            Err(StateConflict::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("alice", GameKind::Towers, 9);
        registry.put(key.clone(), counter()).unwrap();
        assert!(matches!(
            registry.put(key, counter()),
            Err(StateConflict::SessionExists(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_with_rolls_back_on_failure() {
        let registry = SessionRegistry::new();
        let key = SessionKey::new("alice", GameKind::Mines, 3);

        let failed: Result<(), StateConflict> =
            registry.insert_with(key.clone(), counter(), |_| Err(StateConflict::NothingToCashOut));
        assert!(failed.is_err());
        assert!(!registry.contains(&key));

        let hits: Result<u32, StateConflict> = registry.insert_with(key.clone(), counter(), |c| {
            c.hits = 5;
            Ok(c.hits)
        });
        assert_eq!(hits, Ok(5));
        assert!(registry.contains(&key));
    }

    #[test]
    fn test_keys_are_scoped_by_game_and_nonce() {
        let registry = SessionRegistry::new();
        registry.put(SessionKey::new("alice", GameKind::Mines, 1), counter()).unwrap();
        registry.put(SessionKey::new("alice", GameKind::Mines, 2), counter()).unwrap();
        registry.put(SessionKey::new("alice", GameKind::Towers, 1), counter()).unwrap();
        registry.put(SessionKey::new("bob", GameKind::Mines, 1), counter()).unwrap();

        assert_eq!(registry.keys_for_player("alice").len(), 3);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_idle_keys_skip_busy_sessions() {
        let registry = SessionRegistry::new();
        let stale = SessionKey::new("alice", GameKind::Mines, 1);
        let busy = SessionKey::new("bob", GameKind::Mines, 1);
        let fresh = SessionKey::new("carol", GameKind::Mines, 1);
        let old = Utc::now() - Duration::hours(2);

        registry.put(stale.clone(), Counter { hits: 0, touched: old }).unwrap();
        let busy_handle = registry.put(busy.clone(), Counter { hits: 0, touched: old }).unwrap();
        registry.put(fresh, counter()).unwrap();

        let _guard = busy_handle.lock().unwrap();
        let idle = registry.idle_keys(Utc::now() - Duration::hours(1));
        assert_eq!(idle, vec![stale]);
    }

    #[test]
    fn test_same_key_mutations_serialize() {
        let registry = Arc::new(SessionRegistry::new());
        let key = SessionKey::new("alice", GameKind::Mines, 1);
        registry.put(key.clone(), counter()).unwrap();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        registry
                            .with_session(&key, |c| {
                                let seen = c.hits;
                                c.hits = seen + 1;
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.with_session(&key, |c| c.hits).unwrap(), 8000);
    }
}
