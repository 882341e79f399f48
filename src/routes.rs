//! REST surface: session creation and reconnection snapshots.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{ChatMessage, Session, SessionStatus, VoteCount, VoteOption, VoteRecord};
use crate::error::AppError;
use crate::state::AppState;

const RECENT_VOTES_LIMIT: i64 = 50;
const RECENT_MESSAGES_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub owner_id: String,
    pub gender: String,
    pub reveal_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub reveal_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub shareable_link: String,
    /// Hidden until the session has ended.
    pub gender: Option<VoteOption>,
}

impl SessionResponse {
    pub fn from(session: &Session, base_url: &str) -> Self {
        Self {
            session_id: session.session_id.clone(),
            status: session.status,
            reveal_time: session.reveal_time,
            created_at: session.created_at,
            shareable_link: format!("{base_url}/r/{}", session.session_id),
            gender: (session.status == SessionStatus::Ended).then_some(session.gender),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub reveal_time: DateTime<Utc>,
    pub votes: VoteCount,
    pub recent_votes: Vec<VoteRecord>,
    pub recent_messages: Vec<ChatMessage>,
    pub has_voted: bool,
    pub revealed_gender: Option<VoteOption>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateQuery {
    #[serde(default)]
    pub visitor_id: String,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn create_reveal(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let gender = VoteOption::from_value(&request.gender)
        .ok_or_else(|| AppError::Validation("gender must be 'boy' or 'girl'".to_string()))?;
    if request.owner_id.trim().is_empty() {
        return Err(AppError::Validation("ownerId is required".to_string()));
    }
    if request.reveal_time <= Utc::now() {
        return Err(AppError::Validation(
            "revealTime must be in the future".to_string(),
        ));
    }

    info!("creating reveal session for owner {}", request.owner_id);

    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        owner_id: request.owner_id,
        gender,
        status: SessionStatus::Waiting,
        reveal_time: request.reveal_time,
        created_at: Utc::now(),
    };

    state.repository.save_session(&session).await?;
    state.repository.init_votes(&session.session_id).await?;
    state.registry.register(&session.session_id);

    if let Err(e) = state.archive.save_session(&session).await {
        error!("archive session save failed for {}: {e}", session.session_id);
    }

    info!(
        "created session {} with reveal time {}",
        session.session_id, session.reveal_time
    );
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from(&session, &state.config.base_url)),
    ))
}

pub async fn get_reveal(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    if let Some(session) = state.repository.get_session(&session_id).await? {
        return Ok(Json(SessionResponse::from(&session, &state.config.base_url)).into_response());
    }

    // Cache keys may have expired; ended sessions live on in the archive.
    match state.archive.fetch(&session_id).await {
        Ok(Some(document)) => Ok(Json(document).into_response()),
        Ok(None) => Err(AppError::NotFound),
        Err(e) => {
            error!("archive lookup failed for {session_id}: {e}");
            Err(AppError::NotFound)
        }
    }
}

pub async fn get_session_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<StateQuery>,
) -> Result<Json<SessionStateResponse>, AppError> {
    let Some(session) = state.repository.get_session(&session_id).await? else {
        return Err(AppError::NotFound);
    };

    let votes = state.repository.get_votes(&session_id).await?;
    let recent_votes = state
        .repository
        .get_recent_votes(&session_id, RECENT_VOTES_LIMIT)
        .await?;
    let recent_messages = state
        .repository
        .get_recent_chat(&session_id, RECENT_MESSAGES_LIMIT)
        .await?;

    let ended = session.status == SessionStatus::Ended;
    let has_voted = if ended {
        true
    } else if query.visitor_id.is_empty() {
        false
    } else {
        state
            .repository
            .has_voted(&session_id, &query.visitor_id)
            .await?
    };

    Ok(Json(SessionStateResponse {
        session_id,
        status: session.status,
        reveal_time: session.reveal_time,
        votes,
        recent_votes,
        recent_messages,
        has_voted,
        revealed_gender: ended.then_some(session.gender),
    }))
}
