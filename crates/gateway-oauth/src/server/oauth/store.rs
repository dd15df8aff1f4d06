//! Bounded in-memory stores for authorization codes and sessions.
//!
//! Both stores evict in issuance order (oldest first) once they exceed their
//! bound. Neither store locks on its own: the [`AuthorizationServer`] owns
//! them behind a single mutex so that lookup, delete and insert happen as one
//! atomic unit.
//!
//! [`AuthorizationServer`]: super::AuthorizationServer

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::secure::constant_time_eq_str;
use super::types::{AuthorizationCodeRecord, Session};

/// A map that remembers the order in which keys were inserted.
///
/// Every insertion draws a fresh sequence number, so re-inserting a key
/// makes it the newest entry.
#[derive(Debug)]
struct IssuanceMap<V> {
    entries: HashMap<String, (u64, V)>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl<V> IssuanceMap<V> {
    fn new() -> Self {
        Self { entries: HashMap::new(), order: BTreeMap::new(), next_seq: 0 }
    }

    fn insert(&mut self, key: String, value: V) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some((old_seq, _)) = self.entries.insert(key.clone(), (seq, value)) {
            self.order.remove(&old_seq);
        }
        self.order.insert(seq, key);
    }

    fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &str) -> Option<V> {
        let (seq, value) = self.entries.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    fn retain(&mut self, mut keep: impl FnMut(&str, &V) -> bool) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(k, (_, v))| !keep(k.as_str(), v))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    /// Drop the oldest entries until at most `max` remain.
    fn enforce_bound(&mut self, max: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    fn iter(&self) -> impl Iterator<Item = (&str, u64, &V)> {
        self.entries.iter().map(|(k, (seq, v))| (k.as_str(), *seq, v))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Outstanding authorization codes awaiting exchange.
#[derive(Debug)]
pub struct AuthorizationCodeStore {
    codes: IssuanceMap<AuthorizationCodeRecord>,
}

impl AuthorizationCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self { codes: IssuanceMap::new() }
    }

    pub fn insert(&mut self, record: AuthorizationCodeRecord) {
        self.codes.insert(record.code.clone(), record);
    }

    #[must_use]
    pub fn get(&self, code: &str) -> Option<&AuthorizationCodeRecord> {
        self.codes.get(code)
    }

    pub fn remove(&mut self, code: &str) -> Option<AuthorizationCodeRecord> {
        self.codes.remove(code)
    }

    /// Delete every code past its expiry.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.codes.retain(|_, record| !record.is_expired(now))
    }

    pub fn enforce_bound(&mut self, max: usize) -> usize {
        self.codes.enforce_bound(max)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.len() == 0
    }
}

impl Default for AuthorizationCodeStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A session matched by refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshMatch {
    /// Access token the session is stored under.
    pub key: String,
    /// Issuance sequence; higher is newer.
    pub seq: u64,
    pub refresh_expired: bool,
}

/// Issued token sessions, keyed by access token.
#[derive(Debug)]
pub struct SessionStore {
    sessions: IssuanceMap<Session>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: IssuanceMap::new() }
    }

    /// Store a session under its current access token.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.access_token.clone(), session);
    }

    #[must_use]
    pub fn get(&self, access_token: &str) -> Option<&Session> {
        self.sessions.get(access_token)
    }

    pub fn remove(&mut self, access_token: &str) -> Option<Session> {
        self.sessions.remove(access_token)
    }

    /// All sessions carrying `refresh_token` that belong to `client_id`.
    #[must_use]
    pub fn find_by_refresh_token(
        &self,
        refresh_token: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<RefreshMatch> {
        self.sessions
            .iter()
            .filter(|(_, _, session)| {
                session.client_id == client_id
                    && session
                        .refresh_token
                        .as_deref()
                        .is_some_and(|rt| constant_time_eq_str(rt, refresh_token))
            })
            .map(|(key, seq, session)| RefreshMatch {
                key: key.to_string(),
                seq,
                refresh_expired: session.is_refresh_expired(now),
            })
            .collect()
    }

    /// Delete sessions that can no longer be used: stale aliases, expired
    /// refresh tokens, and access-expired sessions with nothing to refresh.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        self.sessions.retain(|key, session| session.access_token == key && !session.is_dead(now))
    }

    pub fn enforce_bound(&mut self, max: usize) -> usize {
        self.sessions.enforce_bound(max)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.len() == 0
    }

    /// Insert `session` under a key other than its own access token.
    #[cfg(test)]
    pub(crate) fn insert_alias(&mut self, key: &str, session: Session) {
        self.sessions.insert(key.to_string(), session);
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
