//! Per-session memoization with bounded memory.
//!
//! Each session holds at most `capacity` entries and evicts in insertion order (FIFO): reads
//! never refresh an entry's position. The set of sessions is itself capped at `max_sessions`,
//! evicting the least recently touched session.

use crate::recency::Recency;
use econpipe_core::Result;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub const DEFAULT_MEMO_CAPACITY: usize = 200;
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

#[derive(Debug)]
struct SessionMemo<T> {
    entries: HashMap<String, T>,
    order: VecDeque<String>,
}

impl<T> Default for SessionMemo<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<T> SessionMemo<T> {
    /// Returns the evicted key, if any. Re-inserting an existing key keeps its position.
    fn insert(&mut self, key: String, value: T, capacity: usize) -> Option<String> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
        if self.entries.len() > capacity {
            let oldest = self.order.pop_front()?;
            self.entries.remove(&oldest);
            return Some(oldest);
        }
        None
    }
}

#[derive(Debug)]
struct MemoState<T> {
    sessions: HashMap<String, SessionMemo<T>>,
    recency: Recency,
}

#[derive(Debug)]
pub struct MemoStore<T> {
    state: Mutex<MemoState<T>>,
    capacity: usize,
    max_sessions: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone> Default for MemoStore<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MEMO_CAPACITY, DEFAULT_MAX_SESSIONS)
    }
}

impl<T: Clone> MemoStore<T> {
    pub fn new(capacity: usize, max_sessions: usize) -> Self {
        Self {
            state: Mutex::new(MemoState {
                sessions: HashMap::new(),
                recency: Recency::default(),
            }),
            capacity: capacity.max(1),
            max_sessions: max_sessions.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, session_id: &str, key: &str) -> Option<T> {
        let mut s = self.lock();
        let hit = s.sessions.get(session_id)?.entries.get(key).cloned();
        s.recency.touch(session_id);
        hit
    }

    pub fn insert(&self, session_id: &str, key: String, value: T) {
        let mut s = self.lock();
        s.recency.touch(session_id);
        let capacity = self.capacity;
        let memo = s.sessions.entry(session_id.to_string()).or_default();
        if let Some(evicted) = memo.insert(key, value, capacity) {
            tracing::debug!(session_id, key = %evicted, "memo entry evicted");
        }

        while s.sessions.len() > self.max_sessions {
            let Some(evict) = s.recency.pop_oldest() else {
                break;
            };
            s.sessions.remove(&evict);
            tracing::debug!(session_id = %evict, "memo session evicted");
        }
    }

    /// Serve `key` from the session's memo, or run, store and return.
    ///
    /// - No session id: no caching at all.
    /// - Errors are never cached; the next call with the same key runs again.
    pub async fn with_session_memo<F, Fut>(
        &self,
        session_id: Option<&str>,
        key: &str,
        run: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(sid) = session_id else {
            return run().await;
        };
        if let Some(hit) = self.lookup(sid, key) {
            return Ok(hit);
        }
        let value = run().await?;
        self.insert(sid, key.to_string(), value.clone());
        Ok(value)
    }

    /// [`get`](Self::get) that counts toward the hit/miss stats.
    pub fn lookup(&self, session_id: &str, key: &str) -> Option<T> {
        let hit = self.get(session_id, key);
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id, key, "memo hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(session_id, key, "memo miss");
        }
        hit
    }

    /// Second look after a counted miss: the entry may have landed in between.
    /// A hit here turns that miss into a hit.
    pub fn recheck(&self, session_id: &str, key: &str) -> Option<T> {
        let hit = self.get(session_id, key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .misses
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |m| m.checked_sub(1));
        tracing::debug!(session_id, key, "memo hit on recheck");
        Some(hit)
    }

    pub fn contains(&self, session_id: &str, key: &str) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .is_some_and(|m| m.entries.contains_key(key))
    }

    pub fn session_len(&self, session_id: &str) -> usize {
        self.lock()
            .sessions
            .get(session_id)
            .map(|m| m.entries.len())
            .unwrap_or(0)
    }

    pub fn sessions_in_memory(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
