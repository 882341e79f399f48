//! Core session entities and their wire shapes.
//!
//! Everything that crosses the cache tier or a pub/sub topic is defined
//! here. List-stored records (`VoteRecord`, `ChatMessage`) and broadcast
//! payloads use camelCase field names; timestamps are RFC 3339 strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the two hidden outcomes a session can reveal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOption {
    Boy,
    Girl,
}

impl VoteOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOption::Boy => "boy",
            VoteOption::Girl => "girl",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("boy") {
            Some(VoteOption::Boy)
        } else if value.eq_ignore_ascii_case("girl") {
            Some(VoteOption::Girl)
        } else {
            None
        }
    }
}

/// Lifecycle of a session. Transitions are monotone:
/// waiting -> live -> ended, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Waiting,
    Live,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Live => "live",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("waiting") {
            Some(SessionStatus::Waiting)
        } else if value.eq_ignore_ascii_case("live") {
            Some(SessionStatus::Live)
        } else if value.eq_ignore_ascii_case("ended") {
            Some(SessionStatus::Ended)
        } else {
            None
        }
    }
}

/// A reveal session. The hidden outcome (`gender`) is set at creation and
/// only shown to clients once the session has ended.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub owner_id: String,
    pub gender: VoteOption,
    pub status: SessionStatus,
    pub reveal_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate vote counters for a session. Invariant: boy + girl equals the
/// size of the session's voter set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    pub boy: i64,
    pub girl: i64,
}

impl VoteCount {
    pub fn total(&self) -> i64 {
        self.boy + self.girl
    }
}

/// Individual accepted vote, kept (bounded) for reconnect hydration and
/// broadcast verbatim on the vote-events topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub visitor_id: String,
    pub name: String,
    pub option: VoteOption,
    pub timestamp: DateTime<Utc>,
}

impl VoteRecord {
    pub fn new(visitor_id: String, name: String, option: VoteOption) -> Self {
        Self {
            visitor_id,
            name,
            option,
            timestamp: Utc::now(),
        }
    }
}

/// One chat message, already sanitized by the chat engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub name: String,
    pub message: String,
    pub visitor_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(name: String, message: String, visitor_id: String) -> Self {
        Self {
            name,
            message,
            visitor_id,
            timestamp: Utc::now(),
        }
    }
}

/// Final frame published on the votes topic when a session ends.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub gender: VoteOption,
    pub final_votes: VoteCount,
}

impl RevealEvent {
    pub fn of(gender: VoteOption, final_votes: VoteCount) -> Self {
        Self {
            kind: "reveal",
            gender,
            final_votes,
        }
    }
}
