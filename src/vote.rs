//! # Vote engine
//!
//! Admission pipeline for binary votes: rate limit, session liveness,
//! option parsing, then one atomic record step whose set-add boolean is
//! the sole dedup primitive. Accepted votes publish an individual event
//! immediately; the aggregate broadcast is left to the scheduler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cache::StoreResult;
use crate::domain::{SessionStatus, VoteOption, VoteRecord};
use crate::publish::{topics, Publisher};
use crate::ratelimit::RateLimiter;
use crate::repository::SessionRepository;

/// Fallback display name when the voter supplies none.
const GUEST_NAME: &str = "Guest";

/// Per-call result of a vote admission. Never surfaced as an error; the
/// boundary maps these to acknowledgment frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    RateLimited,
    NotFound,
    Ended,
    AlreadyVoted,
    InvalidChoice,
    /// Transient store failure; the caller should retry.
    Unavailable,
}

impl VoteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, VoteOutcome::Accepted)
    }

    pub fn message(&self) -> &'static str {
        match self {
            VoteOutcome::Accepted => "Vote recorded",
            VoteOutcome::RateLimited => "Rate limited, try again later",
            VoteOutcome::NotFound => "Session not found",
            VoteOutcome::Ended => "Session has ended",
            VoteOutcome::AlreadyVoted => "Already voted",
            VoteOutcome::InvalidChoice => "Invalid vote option",
            VoteOutcome::Unavailable => "Temporarily unavailable, try again",
        }
    }
}

/// Personal acknowledgment frame for the vote-response topic.
#[derive(Debug, Clone, Serialize)]
pub struct VoteAck {
    pub success: bool,
    pub message: String,
}

impl VoteAck {
    pub fn of(outcome: VoteOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            message: outcome.message().to_string(),
        }
    }

    pub fn invalid_payload() -> Self {
        Self {
            success: false,
            message: "Invalid payload".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option: String,
    pub visitor_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

pub struct VoteEngine {
    repository: Arc<SessionRepository>,
    limiter: Arc<RateLimiter>,
    publisher: Arc<dyn Publisher>,
    max_name_length: usize,
}

impl VoteEngine {
    pub fn new(
        repository: Arc<SessionRepository>,
        limiter: Arc<RateLimiter>,
        publisher: Arc<dyn Publisher>,
        max_name_length: usize,
    ) -> Self {
        Self {
            repository,
            limiter,
            publisher,
            max_name_length,
        }
    }

    pub async fn cast_vote(&self, session_id: &str, request: &VoteRequest) -> VoteOutcome {
        match self.admit(session_id, request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("vote admission failed for session {session_id}: {e}");
                VoteOutcome::Unavailable
            }
        }
    }

    async fn admit(&self, session_id: &str, request: &VoteRequest) -> StoreResult<VoteOutcome> {
        if !self.limiter.admit(&request.visitor_id).await? {
            debug!("vote rate limited for visitor {}", request.visitor_id);
            return Ok(VoteOutcome::RateLimited);
        }

        let Some(session) = self.repository.get_session(session_id).await? else {
            warn!("vote attempted on unknown session: {session_id}");
            return Ok(VoteOutcome::NotFound);
        };
        if session.status == SessionStatus::Ended {
            debug!("vote attempted on ended session: {session_id}");
            return Ok(VoteOutcome::Ended);
        }

        let Some(option) = VoteOption::from_value(&request.option) else {
            debug!("invalid vote option {:?} on session {session_id}", request.option);
            return Ok(VoteOutcome::InvalidChoice);
        };

        let record = VoteRecord::new(
            request.visitor_id.clone(),
            display_name(request.name.as_deref(), self.max_name_length),
            option,
        );
        if !self.repository.record_vote(session_id, &record).await? {
            debug!(
                "duplicate vote by visitor {} on session {session_id}",
                request.visitor_id
            );
            return Ok(VoteOutcome::AlreadyVoted);
        }

        info!(
            "vote recorded: session={session_id}, visitor={}, option={}, name={}",
            record.visitor_id,
            record.option.as_str(),
            record.name
        );
        match serde_json::to_value(&record) {
            Ok(payload) => self
                .publisher
                .publish(&topics::vote_events(session_id), payload),
            Err(e) => error!("failed to encode vote event for {session_id}: {e}"),
        }

        Ok(VoteOutcome::Accepted)
    }
}

fn display_name(name: Option<&str>, max_length: usize) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.chars().take(max_length).collect(),
        _ => GUEST_NAME.to_string(),
    }
}
