use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::chat::ChatResponder;
use crate::error::{Error, Result};
use crate::models::{ChatMessage, Message, MessageRole, WsInbound, WsOutbound};
use crate::rag::ContextRetriever;
use crate::server::AppState;
use crate::store::Store;

/// Conversation history handed to the chat model.
const HISTORY_WINDOW: usize = 10;

/// Handles one inbound `chat_message` end to end: ownership check, persist,
/// retrieve, respond, persist, preview.
pub struct ChatGateway {
    store: Arc<dyn Store>,
    retriever: ContextRetriever,
    responder: ChatResponder,
}

impl ChatGateway {
    pub fn new(store: Arc<dyn Store>, retriever: ContextRetriever, responder: ChatResponder) -> Self {
        Self {
            store,
            retriever,
            responder,
        }
    }

    /// Returns the persisted user and assistant messages for the outbound
    /// frame. Ownership failures happen before any write; later failures
    /// leave the user message persisted and are reported to the connection.
    pub async fn handle_chat_message(
        &self,
        session_id: i64,
        content: &str,
        user_id: i64,
    ) -> Result<(Message, Message)> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        if session.user_id != user_id {
            return Err(Error::Authorization(format!(
                "session {} does not belong to user {}",
                session_id, user_id
            )));
        }

        let user_message = self
            .store
            .create_message(session_id, MessageRole::User, content, false)
            .await?;

        // Best-effort: a retrieval failure degrades to an empty context and
        // the chat proceeds ungrounded.
        let context = self.retriever.retrieve(content, user_id).await;

        let messages = self.store.list_messages(session_id).await?;
        let start = messages.len().saturating_sub(HISTORY_WINDOW);
        let history: Vec<ChatMessage> = messages[start..]
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
            .collect();

        let reply = self.responder.respond(history, &context).await?;

        let ai_message = self
            .store
            .create_message(session_id, MessageRole::Assistant, &reply, !context.is_empty())
            .await?;
        self.store.update_session_preview(session_id, &reply).await?;

        Ok((user_message, ai_message))
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.gateway.clone()))
}

/// Per-connection loop. Messages are processed to completion in receipt
/// order; errors become `error` frames and the connection stays open.
async fn handle_socket(mut socket: WebSocket, gateway: Arc<ChatGateway>) {
    while let Some(frame) = socket.recv().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!("WebSocket receive error: {}", e);
                break;
            }
        };

        let text = match frame {
            WsFrame::Text(text) => text,
            WsFrame::Close(_) => break,
            _ => continue,
        };

        let outbound = match serde_json::from_str::<WsInbound>(&text) {
            Ok(WsInbound::ChatMessage {
                session_id,
                content,
                user_id,
            }) => match gateway
                .handle_chat_message(session_id, &content, user_id)
                .await
            {
                Ok((user_message, ai_message)) => WsOutbound::ChatResponse {
                    user_message,
                    ai_message,
                },
                Err(e) => {
                    tracing::error!("chat_message handling failed: {}", e);
                    WsOutbound::Error {
                        message: e.to_string(),
                    }
                }
            },
            Err(e) => WsOutbound::Error {
                message: format!("malformed message: {}", e),
            },
        };

        let payload = match serde_json::to_string(&outbound) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Failed to serialize outbound frame: {}", e);
                continue;
            }
        };
        if socket.send(WsFrame::Text(payload)).await.is_err() {
            break;
        }
    }
}
