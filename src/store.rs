use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::{ChatSession, Document, DocumentStatus, Message, MessageRole};

/// Cached session preview length, in characters.
const PREVIEW_CHARS: usize = 100;

/// Truncate message content for the session's `lastMessage` preview.
pub fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let truncated: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", truncated)
}

/// Persistence seam for documents, chat sessions and messages.
///
/// The realtime gateway and the document pipeline depend only on this trait,
/// so a durable backend can replace [`MemoryStore`] without touching either.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_document(
        &self,
        user_id: i64,
        name: &str,
        size_bytes: u64,
        content_type: &str,
        storage_path: &str,
    ) -> Result<Document>;
    async fn get_document(&self, id: i64) -> Result<Option<Document>>;
    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>>;
    /// Move a document to a terminal status, optionally recording a page
    /// count discovered during processing.
    async fn set_document_status(
        &self,
        id: i64,
        status: DocumentStatus,
        page_count: Option<u32>,
    ) -> Result<()>;
    async fn delete_document(&self, id: i64) -> Result<()>;

    async fn create_session(&self, user_id: i64, title: &str) -> Result<ChatSession>;
    async fn get_session(&self, id: i64) -> Result<Option<ChatSession>>;
    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>>;
    /// Delete a session and every message that belongs to it.
    async fn delete_session(&self, id: i64) -> Result<()>;
    /// Refresh the session's cached `lastMessage` preview and `updatedAt`.
    async fn update_session_preview(&self, id: i64, content: &str) -> Result<()>;

    async fn create_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &str,
        sources: bool,
    ) -> Result<Message>;
    /// Messages of a session ordered by creation.
    async fn list_messages(&self, session_id: i64) -> Result<Vec<Message>>;
}

#[derive(Default)]
struct Tables {
    documents: HashMap<i64, Document>,
    sessions: HashMap<i64, ChatSession>,
    messages: HashMap<i64, Message>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`Store`] backend over a single `RwLock`.
///
/// Safe for the single-process server this backend targets; every call takes
/// the lock for its full duration, so there is no partial visibility between
/// the write steps of one operation.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_document(
        &self,
        user_id: i64,
        name: &str,
        size_bytes: u64,
        content_type: &str,
        storage_path: &str,
    ) -> Result<Document> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let document = Document {
            id,
            user_id,
            name: name.to_string(),
            size_bytes,
            content_type: content_type.to_string(),
            status: DocumentStatus::Processing,
            page_count: None,
            storage_path: storage_path.to_string(),
            created_at: Utc::now(),
        };
        tables.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        Ok(self.tables.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self, user_id: i64) -> Result<Vec<Document>> {
        let tables = self.tables.read().await;
        let mut documents: Vec<Document> = tables
            .documents
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }

    async fn set_document_status(
        &self,
        id: i64,
        status: DocumentStatus,
        page_count: Option<u32>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let document = tables
            .documents
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        document.status = status;
        if page_count.is_some() {
            document.page_count = page_count;
        }
        Ok(())
    }

    async fn delete_document(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .documents
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        Ok(())
    }

    async fn create_session(&self, user_id: i64, title: &str) -> Result<ChatSession> {
        let mut tables = self.tables.write().await;
        let id = tables.next_id();
        let now = Utc::now();
        let session = ChatSession {
            id,
            user_id,
            title: title.to_string(),
            last_message: None,
            created_at: now,
            updated_at: now,
        };
        tables.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: i64) -> Result<Option<ChatSession>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn list_sessions(&self, user_id: i64) -> Result<Vec<ChatSession>> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ChatSession> = tables
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn delete_session(&self, id: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .sessions
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        tables.messages.retain(|_, m| m.session_id != id);
        Ok(())
    }

    async fn update_session_preview(&self, id: i64, content: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let session = tables
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
        session.last_message = Some(preview(content));
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn create_message(
        &self,
        session_id: i64,
        role: MessageRole,
        content: &str,
        sources: bool,
    ) -> Result<Message> {
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&session_id) {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }
        let id = tables.next_id();
        let message = Message {
            id,
            session_id,
            role,
            content: content.to_string(),
            sources,
            created_at: Utc::now(),
        };
        tables.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn list_messages(&self, session_id: i64) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .values()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        // Ids are assigned monotonically, so they tie-break same-instant
        // timestamps.
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }
}
