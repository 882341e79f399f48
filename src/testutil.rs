//! Test doubles: an in-memory cache store with the same value semantics
//! as the remote tier (hashes, sets, lists, strings, lazy TTL expiry),
//! plus recording publisher and archive sinks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::archive::{ArchiveError, ArchiveSink};
use crate::cache::{CacheStore, StoreResult};
use crate::domain::{ChatMessage, Session, VoteCount};
use crate::publish::Publisher;

enum Stored {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// In-memory [`CacheStore`] with an operation counter, so tests can
/// assert that idle schedulers issue zero cache commands.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
    ops: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            ops: AtomicUsize::new(0),
        }
    }

    pub fn op_count(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        self.ops.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        data.retain(|_, entry| entry.live());
        f(&mut data)
    }
}

fn fresh(value: Stored) -> Entry {
    Entry {
        value,
        expires_at: None,
    }
}

fn range_bounds(len: usize, start: i64, stop: i64) -> (usize, usize) {
    let resolve = |index: i64| -> i64 {
        if index < 0 {
            len as i64 + index
        } else {
            index
        }
    };
    let start = resolve(start).max(0) as usize;
    let stop = resolve(stop);
    let end = if stop < 0 { 0 } else { (stop as usize + 1).min(len) };
    (start.min(len), end)
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn hash_put_all(&self, key: &str, fields: &[(String, String)]) -> StoreResult<()> {
        self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| fresh(Stored::Hash(HashMap::new())));
            if let Stored::Hash(hash) = &mut entry.value {
                hash.extend(fields.iter().cloned());
            }
        });
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self.with_data(|data| match data.get(key) {
            Some(Entry {
                value: Stored::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        }))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| fresh(Stored::Hash(HashMap::new())));
            if let Stored::Hash(hash) = &mut entry.value {
                hash.insert(field.to_string(), value.to_string());
            }
        });
        Ok(())
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        Ok(self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| fresh(Stored::Hash(HashMap::new())));
            if let Stored::Hash(hash) = &mut entry.value {
                let current: i64 = hash
                    .get(field)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let next = current + delta;
                hash.insert(field.to_string(), next.to_string());
                next
            } else {
                0
            }
        }))
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| fresh(Stored::Set(HashSet::new())));
            if let Stored::Set(set) = &mut entry.value {
                set.insert(member.to_string())
            } else {
                false
            }
        }))
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.with_data(|data| {
            if let Some(Entry {
                value: Stored::Set(set),
                ..
            }) = data.get_mut(key)
            {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<HashSet<String>> {
        Ok(self.with_data(|data| match data.get(key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => set.clone(),
            _ => HashSet::new(),
        }))
    }

    async fn set_contains(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self.with_data(|data| match data.get(key) {
            Some(Entry {
                value: Stored::Set(set),
                ..
            }) => set.contains(member),
            _ => false,
        }))
    }

    async fn list_push_front(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_data(|data| {
            let entry = data
                .entry(key.to_string())
                .or_insert_with(|| fresh(Stored::List(VecDeque::new())));
            if let Stored::List(list) = &mut entry.value {
                list.push_front(value.to_string());
            }
        });
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        self.with_data(|data| {
            if let Some(Entry {
                value: Stored::List(list),
                ..
            }) = data.get_mut(key)
            {
                let (from, to) = range_bounds(list.len(), start, stop);
                *list = list
                    .iter()
                    .skip(from)
                    .take(to.saturating_sub(from))
                    .cloned()
                    .collect();
            }
        });
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        Ok(self.with_data(|data| match data.get(key) {
            Some(Entry {
                value: Stored::List(list),
                ..
            }) => {
                let (from, to) = range_bounds(list.len(), start, stop);
                list.iter()
                    .skip(from)
                    .take(to.saturating_sub(from))
                    .cloned()
                    .collect()
            }
            _ => Vec::new(),
        }))
    }

    async fn put_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.with_data(|data| {
            data.insert(
                key.to_string(),
                Entry {
                    value: Stored::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        });
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(self.with_data(|data| {
            if data.contains_key(key) {
                false
            } else {
                data.insert(
                    key.to_string(),
                    Entry {
                        value: Stored::Str(value.to_string()),
                        expires_at: Some(Instant::now() + ttl),
                    },
                );
                true
            }
        }))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.with_data(|data| match data.remove(key) {
            Some(Entry {
                value: Stored::Str(value),
                ..
            }) => Some(value),
            _ => None,
        }))
    }

    async fn key_exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_data(|data| data.contains_key(key)))
    }

    async fn key_expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        self.with_data(|data| {
            if let Some(entry) = data.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }
}

/// Captures every published frame for assertion.
pub struct RecordingPublisher {
    frames: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn frames_for(&self, topic: &str) -> Vec<Value> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, topic: &str, payload: Value) {
        self.frames
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
    }
}

/// Records archive writes instead of shipping them anywhere.
pub struct RecordingArchive {
    results: Mutex<Vec<(Session, VoteCount, Vec<ChatMessage>)>>,
}

impl RecordingArchive {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn results(&self) -> Vec<(Session, VoteCount, Vec<ChatMessage>)> {
        self.results.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveSink for RecordingArchive {
    async fn save_session(&self, _session: &Session) -> Result<(), ArchiveError> {
        Ok(())
    }

    async fn save_results(
        &self,
        session: &Session,
        votes: &VoteCount,
        chat_history: &[ChatMessage],
    ) -> Result<(), ArchiveError> {
        self.results
            .lock()
            .unwrap()
            .push((session.clone(), *votes, chat_history.to_vec()));
        Ok(())
    }

    async fn fetch(&self, _session_id: &str) -> Result<Option<Value>, ArchiveError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strings_expire_lazily() {
        let store = MemoryStore::new();

        store
            .put_with_ttl("k", "1", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(store.key_exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!store.key_exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn list_trim_keeps_the_head_range() {
        let store = MemoryStore::new();
        for value in ["a", "b", "c", "d"] {
            store.list_push_front("k", value).await.unwrap();
        }

        store.list_trim("k", 0, 1).await.unwrap();

        assert_eq!(
            store.list_range("k", 0, 10).await.unwrap(),
            vec!["d".to_string(), "c".to_string()]
        );
    }

    #[tokio::test]
    async fn take_removes_the_key() {
        let store = MemoryStore::new();
        store
            .put_with_ttl("k", "1", Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(store.take("k").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn operations_are_counted() {
        let store = MemoryStore::new();
        assert_eq!(store.op_count(), 0);

        store.set_add("k", "m").await.unwrap();
        store.set_contains("k", "m").await.unwrap();

        assert_eq!(store.op_count(), 2);
    }
}
