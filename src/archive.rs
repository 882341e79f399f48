//! Durable archive of finished sessions.
//!
//! The core emits one document write when a session is created and one
//! when it ends; the HTTP layer reads the archive for sessions whose
//! cache keys have already expired. Writes are best-effort: failures are
//! logged by the caller and never block finalization.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ChatMessage, Session, VoteCount};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn save_session(&self, session: &Session) -> Result<(), ArchiveError>;

    /// The finalization write: session attributes, final counts, the
    /// revealed outcome, and the full chat history.
    async fn save_results(
        &self,
        session: &Session,
        votes: &VoteCount,
        chat_history: &[ChatMessage],
    ) -> Result<(), ArchiveError>;

    async fn fetch(&self, session_id: &str) -> Result<Option<Value>, ArchiveError>;
}

/// JSON-document sink over a remote document store's REST surface.
pub struct HttpArchive {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpArchive {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn document_url(&self, session_id: &str) -> String {
        format!("{}/reveals/{session_id}", self.base_url)
    }

    async fn put_document(&self, session_id: &str, document: &Value) -> Result<(), ArchiveError> {
        self.client
            .put(self.document_url(session_id))
            .bearer_auth(&self.token)
            .json(document)
            .send()
            .await?
            .error_for_status()?;
        debug!("archived document for session {session_id}");
        Ok(())
    }
}

#[async_trait]
impl ArchiveSink for HttpArchive {
    async fn save_session(&self, session: &Session) -> Result<(), ArchiveError> {
        let document = json!({
            "sessionId": session.session_id,
            "ownerId": session.owner_id,
            "gender": session.gender.as_str(),
            "status": session.status.as_str(),
            "revealTime": session.reveal_time.to_rfc3339(),
            "createdAt": session.created_at.to_rfc3339(),
        });
        self.put_document(&session.session_id, &document).await
    }

    async fn save_results(
        &self,
        session: &Session,
        votes: &VoteCount,
        chat_history: &[ChatMessage],
    ) -> Result<(), ArchiveError> {
        let document = json!({
            "sessionId": session.session_id,
            "ownerId": session.owner_id,
            "gender": session.gender.as_str(),
            "status": "ended",
            "revealTime": session.reveal_time.to_rfc3339(),
            "createdAt": session.created_at.to_rfc3339(),
            "endedAt": Utc::now().to_rfc3339(),
            "results": {
                "boyVotes": votes.boy,
                "girlVotes": votes.girl,
                "totalVotes": votes.total(),
            },
            "chatHistory": chat_history,
        });
        self.put_document(&session.session_id, &document).await
    }

    async fn fetch(&self, session_id: &str) -> Result<Option<Value>, ArchiveError> {
        let response = self
            .client
            .get(self.document_url(session_id))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let document = response.error_for_status()?.json().await?;
        Ok(Some(document))
    }
}

/// Stands in when archive credentials are not configured: warns and
/// drops writes, reports every lookup as a miss.
pub struct DisabledArchive;

#[async_trait]
impl ArchiveSink for DisabledArchive {
    async fn save_session(&self, session: &Session) -> Result<(), ArchiveError> {
        warn!(
            "archive not configured, skipping session save for {}",
            session.session_id
        );
        Ok(())
    }

    async fn save_results(
        &self,
        session: &Session,
        _votes: &VoteCount,
        _chat_history: &[ChatMessage],
    ) -> Result<(), ArchiveError> {
        warn!(
            "archive not configured, skipping results save for {}",
            session.session_id
        );
        Ok(())
    }

    async fn fetch(&self, _session_id: &str) -> Result<Option<Value>, ArchiveError> {
        Ok(None)
    }
}
