//! # Chat engine
//!
//! Rate-limited, length-bounded chat append with immediate fan-out.
//! Names and bodies are trimmed, truncated on char boundaries, and
//! HTML-escaped before they reach storage or a topic.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::cache::StoreResult;
use crate::domain::{ChatMessage, SessionStatus};
use crate::publish::{topics, Publisher};
use crate::ratelimit::RateLimiter;
use crate::repository::SessionRepository;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub name: String,
    pub message: String,
    pub visitor_id: String,
}

pub struct ChatEngine {
    repository: Arc<SessionRepository>,
    limiter: Arc<RateLimiter>,
    publisher: Arc<dyn Publisher>,
    max_message_length: usize,
    max_name_length: usize,
}

impl ChatEngine {
    pub fn new(
        repository: Arc<SessionRepository>,
        limiter: Arc<RateLimiter>,
        publisher: Arc<dyn Publisher>,
        max_message_length: usize,
        max_name_length: usize,
    ) -> Self {
        Self {
            repository,
            limiter,
            publisher,
            max_message_length,
            max_name_length,
        }
    }

    /// Append one message and fan it out. False on any rejection:
    /// rate-limited, unknown or ended session, or empty body after trim.
    pub async fn send_message(&self, session_id: &str, request: &ChatRequest) -> bool {
        match self.admit(session_id, request).await {
            Ok(sent) => sent,
            Err(e) => {
                error!("chat admission failed for session {session_id}: {e}");
                false
            }
        }
    }

    async fn admit(&self, session_id: &str, request: &ChatRequest) -> StoreResult<bool> {
        if !self.limiter.admit(&request.visitor_id).await? {
            debug!("chat rate limited for visitor {}", request.visitor_id);
            return Ok(false);
        }

        let Some(session) = self.repository.get_session(session_id).await? else {
            warn!("chat attempted on unknown session: {session_id}");
            return Ok(false);
        };
        if session.status == SessionStatus::Ended {
            debug!("chat attempted on ended session: {session_id}");
            return Ok(false);
        }

        let name = sanitize(&request.name, self.max_name_length);
        let message = sanitize(&request.message, self.max_message_length);
        if message.is_empty() {
            return Ok(false);
        }

        let chat = ChatMessage::new(name, message, request.visitor_id.clone());
        self.repository.append_chat(session_id, &chat).await?;

        match serde_json::to_value(&chat) {
            Ok(payload) => self.publisher.publish(&topics::chat(session_id), payload),
            Err(e) => error!("failed to encode chat message for {session_id}: {e}"),
        }

        debug!("chat message sent: session={session_id}, from={}", chat.name);
        Ok(true)
    }
}

/// Trim, truncate to at most `max_length` chars, then escape. Escaping
/// happens last, so the length cap applies to what the user typed.
fn sanitize(input: &str, max_length: usize) -> String {
    let truncated: String = input.trim().chars().take(max_length).collect();
    html_escape(&truncated)
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
