//! # Session repository
//!
//! Concrete encoding of sessions, votes, chat, dirty flags, and the
//! active-session set in the cache tier.
//!
//! ## Key layout
//!
//! - `session:{id}` hash: sessionId, ownerId, gender, status, revealTime, createdAt
//! - `votes:{id}` hash: boy, girl (string-encoded integers)
//! - `voters:{id}` set of visitor ids
//! - `voterecords:{id}` list of JSON vote records, most recent at head
//! - `chat:{id}` list of JSON chat messages, most recent at head
//! - `dirty:{id}` string "1" while a broadcast is pending
//! - `active_sessions` set of ids not yet ended
//!
//! Writes refresh the session TTL; finalization shortens every per-session
//! key to the post-reveal retention window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::cache::{CacheStore, StoreResult};
use crate::domain::{ChatMessage, Session, SessionStatus, VoteCount, VoteRecord};

const SESSION_KEY: &str = "session:";
const VOTES_KEY: &str = "votes:";
const VOTERS_KEY: &str = "voters:";
const VOTE_RECORDS_KEY: &str = "voterecords:";
const CHAT_KEY: &str = "chat:";
const DIRTY_KEY: &str = "dirty:";
const ACTIVE_SESSIONS_KEY: &str = "active_sessions";

/// Vote records kept per session for display.
const MAX_VOTE_RECORDS: i64 = 100;

pub struct SessionRepository {
    store: Arc<dyn CacheStore>,
    session_ttl: Duration,
    post_reveal_ttl: Duration,
    max_chat_messages: i64,
}

impl SessionRepository {
    pub fn new(
        store: Arc<dyn CacheStore>,
        session_ttl: Duration,
        post_reveal_ttl: Duration,
        max_chat_messages: i64,
    ) -> Self {
        Self {
            store,
            session_ttl,
            post_reveal_ttl,
            max_chat_messages,
        }
    }

    // Session operations

    pub async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let key = format!("{SESSION_KEY}{}", session.session_id);
        let fields = vec![
            ("sessionId".to_string(), session.session_id.clone()),
            ("ownerId".to_string(), session.owner_id.clone()),
            ("gender".to_string(), session.gender.as_str().to_string()),
            ("status".to_string(), session.status.as_str().to_string()),
            ("revealTime".to_string(), session.reveal_time.to_rfc3339()),
            ("createdAt".to_string(), session.created_at.to_rfc3339()),
        ];

        self.store.hash_put_all(&key, &fields).await?;
        self.store.key_expire(&key, self.session_ttl).await?;

        // Track as active
        self.store
            .set_add(ACTIVE_SESSIONS_KEY, &session.session_id)
            .await?;
        Ok(())
    }

    pub async fn get_session(&self, session_id: &str) -> StoreResult<Option<Session>> {
        let key = format!("{SESSION_KEY}{session_id}");
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let field = |name: &str| fields.get(name).cloned();
        let session = (|| {
            Some(Session {
                session_id: field("sessionId")?,
                owner_id: field("ownerId")?,
                gender: crate::domain::VoteOption::from_value(&field("gender")?)?,
                status: SessionStatus::from_value(&field("status")?)?,
                reveal_time: parse_instant(&field("revealTime")?)?,
                created_at: parse_instant(&field("createdAt")?)?,
            })
        })();

        if session.is_none() {
            warn!("session hash for {session_id} is undecodable, treating as absent");
        }
        Ok(session)
    }

    pub async fn set_status(&self, session_id: &str, status: SessionStatus) -> StoreResult<()> {
        let key = format!("{SESSION_KEY}{session_id}");
        self.store.hash_set(&key, "status", status.as_str()).await
    }

    pub async fn session_exists(&self, session_id: &str) -> StoreResult<bool> {
        self.store
            .key_exists(&format!("{SESSION_KEY}{session_id}"))
            .await
    }

    // Vote operations

    pub async fn init_votes(&self, session_id: &str) -> StoreResult<()> {
        let key = format!("{VOTES_KEY}{session_id}");
        let fields = vec![
            ("boy".to_string(), "0".to_string()),
            ("girl".to_string(), "0".to_string()),
        ];
        self.store.hash_put_all(&key, &fields).await?;
        self.store.key_expire(&key, self.session_ttl).await
    }

    pub async fn has_voted(&self, session_id: &str, visitor_id: &str) -> StoreResult<bool> {
        self.store
            .set_contains(&format!("{VOTERS_KEY}{session_id}"), visitor_id)
            .await
    }

    /// Admit one vote. The set-add on the voter set is the dedup
    /// primitive: of N concurrent calls for the same visitor, exactly one
    /// observes a new member and performs the counter increment, dirty
    /// mark, and record append. Returns false for a repeat voter.
    pub async fn record_vote(&self, session_id: &str, record: &VoteRecord) -> StoreResult<bool> {
        let voters_key = format!("{VOTERS_KEY}{session_id}");
        if !self.store.set_add(&voters_key, &record.visitor_id).await? {
            return Ok(false);
        }
        self.store.key_expire(&voters_key, self.session_ttl).await?;

        let votes_key = format!("{VOTES_KEY}{session_id}");
        self.store
            .hash_incr(&votes_key, record.option.as_str(), 1)
            .await?;
        self.store.key_expire(&votes_key, self.session_ttl).await?;

        self.mark_dirty(session_id).await?;

        let records_key = format!("{VOTE_RECORDS_KEY}{session_id}");
        match serde_json::to_string(record) {
            Ok(json) => {
                self.store.list_push_front(&records_key, &json).await?;
                self.store
                    .list_trim(&records_key, 0, MAX_VOTE_RECORDS - 1)
                    .await?;
                self.store
                    .key_expire(&records_key, self.session_ttl)
                    .await?;
            }
            Err(e) => warn!("failed to encode vote record for {session_id}: {e}"),
        }

        Ok(true)
    }

    pub async fn get_votes(&self, session_id: &str) -> StoreResult<VoteCount> {
        let key = format!("{VOTES_KEY}{session_id}");
        let fields = self.store.hash_get_all(&key).await?;

        Ok(VoteCount {
            boy: parse_count(fields.get("boy")),
            girl: parse_count(fields.get("girl")),
        })
    }

    pub async fn get_recent_votes(
        &self,
        session_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<VoteRecord>> {
        let key = format!("{VOTE_RECORDS_KEY}{session_id}");
        let raw = self.store.list_range(&key, 0, limit - 1).await?;
        Ok(decode_oldest_first(raw, "vote record"))
    }

    // Chat operations

    pub async fn append_chat(&self, session_id: &str, message: &ChatMessage) -> StoreResult<()> {
        let key = format!("{CHAT_KEY}{session_id}");
        match serde_json::to_string(message) {
            Ok(json) => {
                self.store.list_push_front(&key, &json).await?;
                self.store
                    .list_trim(&key, 0, self.max_chat_messages - 1)
                    .await?;
                self.store.key_expire(&key, self.session_ttl).await?;
            }
            Err(e) => warn!("failed to encode chat message for {session_id}: {e}"),
        }
        Ok(())
    }

    pub async fn get_recent_chat(
        &self,
        session_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<ChatMessage>> {
        let key = format!("{CHAT_KEY}{session_id}");
        let raw = self.store.list_range(&key, 0, limit - 1).await?;
        Ok(decode_oldest_first(raw, "chat message"))
    }

    pub async fn get_all_chat(&self, session_id: &str) -> StoreResult<Vec<ChatMessage>> {
        self.get_recent_chat(session_id, self.max_chat_messages)
            .await
    }

    // Dirty flag for batched broadcasts

    pub async fn mark_dirty(&self, session_id: &str) -> StoreResult<()> {
        self.store
            .put_with_ttl(&format!("{DIRTY_KEY}{session_id}"), "1", self.session_ttl)
            .await
    }

    pub async fn test_and_clear_dirty(&self, session_id: &str) -> StoreResult<bool> {
        let value = self.store.take(&format!("{DIRTY_KEY}{session_id}")).await?;
        Ok(value.as_deref() == Some("1"))
    }

    // Active sessions

    pub async fn active_sessions(&self) -> StoreResult<HashSet<String>> {
        self.store.set_members(ACTIVE_SESSIONS_KEY).await
    }

    pub async fn remove_active(&self, session_id: &str) -> StoreResult<()> {
        self.store.set_remove(ACTIVE_SESSIONS_KEY, session_id).await
    }

    // Cleanup

    pub async fn apply_post_reveal_ttl(&self, session_id: &str) -> StoreResult<()> {
        for prefix in [
            SESSION_KEY,
            VOTES_KEY,
            VOTERS_KEY,
            VOTE_RECORDS_KEY,
            CHAT_KEY,
            DIRTY_KEY,
        ] {
            self.store
                .key_expire(&format!("{prefix}{session_id}"), self.post_reveal_ttl)
                .await?;
        }
        Ok(())
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_count(value: Option<&String>) -> i64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Lists are stored newest-first; readers get them oldest-first.
/// Undecodable entries are skipped, not fatal.
fn decode_oldest_first<T: DeserializeOwned>(raw: Vec<String>, what: &str) -> Vec<T> {
    let mut out = Vec::with_capacity(raw.len());
    for json in raw {
        match serde_json::from_str(&json) {
            Ok(value) => out.push(value),
            Err(e) => warn!("skipping undecodable {what}: {e}"),
        }
    }
    out.reverse();
    out
}
