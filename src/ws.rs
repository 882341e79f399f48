//! WebSocket transport: one socket carries subscribe/unsubscribe/publish
//! frames from the client and `{topic, payload}` frames back. Each
//! connection keeps its own topic set and filters the shared hub locally;
//! publishes to `vote/{id}` and `chat/{id}` dispatch into the engines.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::chat::ChatRequest;
use crate::publish::{topics, Frame, Publisher};
use crate::state::AppState;
use crate::vote::{VoteAck, VoteRequest};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: Value },
}

#[derive(Debug, Serialize)]
struct ServerFrame<'a> {
    topic: &'a str,
    payload: &'a Value,
}

pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut subscriptions: HashSet<String> = HashSet::new();
    let mut hub = state.hub.subscribe();

    loop {
        tokio::select! {
            outbound = hub.recv() => {
                match outbound {
                    Ok(frame) => {
                        if !subscriptions.contains(&frame.topic) {
                            continue;
                        }
                        match encode(&frame) {
                            Ok(json) => {
                                if sink.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("failed to encode outbound frame: {e}"),
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("websocket subscriber lagged, skipped {skipped} frames");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => {
                                handle_frame(frame, &mut subscriptions, &state).await;
                            }
                            Err(e) => debug!("ignoring malformed client frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("websocket error: {e}");
                        break;
                    }
                }
            }
        }
    }
}

fn encode(frame: &Frame) -> serde_json::Result<String> {
    serde_json::to_string(&ServerFrame {
        topic: &frame.topic,
        payload: &frame.payload,
    })
}

async fn handle_frame(
    frame: ClientFrame,
    subscriptions: &mut HashSet<String>,
    state: &Arc<AppState>,
) {
    match frame {
        ClientFrame::Subscribe { topic } => {
            subscriptions.insert(topic);
        }
        ClientFrame::Unsubscribe { topic } => {
            subscriptions.remove(&topic);
        }
        ClientFrame::Publish { topic, payload } => dispatch(&topic, payload, state).await,
    }
}

/// Route a client publish to the matching engine. Anything else is
/// dropped: clients cannot inject frames onto server topics.
pub async fn dispatch(topic: &str, payload: Value, state: &Arc<AppState>) {
    if let Some(session_id) = topic.strip_prefix("vote/") {
        let ack = match serde_json::from_value::<VoteRequest>(payload) {
            Ok(request) => {
                debug!(
                    "vote received: session={session_id}, visitor={}",
                    request.visitor_id
                );
                VoteAck::of(state.vote.cast_vote(session_id, &request).await)
            }
            Err(e) => {
                debug!("malformed vote payload for {session_id}: {e}");
                VoteAck::invalid_payload()
            }
        };
        match serde_json::to_value(&ack) {
            Ok(payload) => state
                .hub
                .publish(&topics::vote_response(session_id), payload),
            Err(e) => debug!("failed to encode vote ack: {e}"),
        }
    } else if let Some(session_id) = topic.strip_prefix("chat/") {
        match serde_json::from_value::<ChatRequest>(payload) {
            Ok(request) => {
                debug!("chat received: session={session_id}, from={}", request.name);
                state.chat.send_message(session_id, &request).await;
            }
            Err(e) => debug!("malformed chat payload for {session_id}: {e}"),
        }
    } else {
        debug!("publish to unroutable topic: {topic}");
    }
}
