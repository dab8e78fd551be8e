//! End-to-end flow over the in-process components: upload processing,
//! grounded chat, and session cleanup, with in-memory stand-ins for the
//! embedding API, the vector index and the chat model.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use docchat::chat::{ChatModel, ChatResponder};
use docchat::error::Result;
use docchat::extractor::MIME_TEXT;
use docchat::models::{ChatMessage, DocumentStatus, MessageRole};
use docchat::pipeline::DocumentPipeline;
use docchat::rag::embeddings::Embedder;
use docchat::rag::vector_store::{ChunkRecord, ScoredChunk, VectorIndex};
use docchat::rag::ContextRetriever;
use docchat::store::{MemoryStore, Store};
use docchat::ws::ChatGateway;

/// Embeds everything to the same direction, so any stored chunk scores 1.0
/// against any query. Good enough to drive the retrieval path.
struct ConstantEmbedder;

#[async_trait]
impl Embedder for ConstantEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// Cosine-similarity index over a plain vector, with the same hard tenant
/// filter and point-id dedupe semantics as the hosted index.
#[derive(Default)]
struct InMemoryIndex {
    points: Mutex<Vec<ChunkRecord>>,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        let mut points = self.points.lock().await;
        for record in records {
            points.retain(|p| p.point_id() != record.point_id());
            points.push(record);
        }
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, user_id: i64, limit: u64) -> Result<Vec<ScoredChunk>> {
        let points = self.points.lock().await;
        let mut hits: Vec<ScoredChunk> = points
            .iter()
            .filter(|p| p.payload.user_id == user_id)
            .map(|p| ScoredChunk {
                score: cosine(&p.vector, &vector),
                payload: p.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: i64) -> Result<()> {
        self.points
            .lock()
            .await
            .retain(|p| p.payload.document_id != document_id);
        Ok(())
    }
}

struct CannedModel;

#[async_trait]
impl ChatModel for CannedModel {
    async fn complete(&self, _messages: Vec<ChatMessage>) -> Result<String> {
        Ok("the document says hello".to_string())
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    index: Arc<InMemoryIndex>,
    pipeline: DocumentPipeline,
    gateway: ChatGateway,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(InMemoryIndex::default());
    let embedder = Arc::new(ConstantEmbedder);

    let pipeline = DocumentPipeline::new(embedder.clone(), index.clone(), 4);
    let retriever = ContextRetriever::new(embedder, index.clone());
    let responder = ChatResponder::new(Arc::new(CannedModel));
    let gateway = ChatGateway::new(store.clone(), retriever, responder);

    Harness {
        store,
        index,
        pipeline,
        gateway,
    }
}

/// Runs the upload path the way the server's detached task does: create the
/// record, process the file, record the terminal status.
async fn ingest(h: &Harness, user_id: i64, name: &str, content: &str) -> i64 {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();

    let document = h
        .store
        .create_document(
            user_id,
            name,
            content.len() as u64,
            MIME_TEXT,
            &file.path().to_string_lossy(),
        )
        .await
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Processing);

    let outcome = h
        .pipeline
        .process(file.path(), document.id, name, user_id, MIME_TEXT)
        .await
        .unwrap();
    assert!(outcome.chunk_count >= 1);

    h.store
        .set_document_status(document.id, DocumentStatus::Processed, outcome.page_count)
        .await
        .unwrap();
    document.id
}

#[tokio::test]
async fn uploaded_document_grounds_the_chat_response() {
    let h = harness();
    ingest(&h, 1, "test.txt", "hello world, this is a test document").await;

    let documents = h.store.list_documents(1).await.unwrap();
    assert_eq!(documents[0].status, DocumentStatus::Processed);

    let session = h.store.create_session(1, "my chat").await.unwrap();
    let (user_message, ai_message) = h
        .gateway
        .handle_chat_message(session.id, "what does the test document say?", 1)
        .await
        .unwrap();

    assert_eq!(user_message.role, MessageRole::User);
    assert_eq!(ai_message.role, MessageRole::Assistant);
    // The stored chunk scores above the threshold, so the reply is grounded.
    assert!(ai_message.sources);

    let stored = h.store.list_messages(session.id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, "the document says hello");
}

#[tokio::test]
async fn chat_without_documents_is_ungrounded_but_answers() {
    let h = harness();
    let session = h.store.create_session(1, "empty").await.unwrap();

    let (_, ai_message) = h
        .gateway
        .handle_chat_message(session.id, "anything indexed?", 1)
        .await
        .unwrap();
    assert!(!ai_message.sources);
}

#[tokio::test]
async fn retrieval_never_crosses_tenants() {
    let h = harness();
    ingest(&h, 2, "private.txt", "user two's confidential notes").await;

    let session = h.store.create_session(1, "probe").await.unwrap();
    let (_, ai_message) = h
        .gateway
        .handle_chat_message(session.id, "what is in private.txt?", 1)
        .await
        .unwrap();
    // User 1 has no documents; the other tenant's chunks must not ground
    // this reply.
    assert!(!ai_message.sources);
}

#[tokio::test]
async fn deleting_a_document_removes_its_chunks_from_the_index() {
    let h = harness();
    let doc_id = ingest(&h, 1, "gone.txt", "soon to be deleted content").await;

    h.index.delete_document(doc_id).await.unwrap();
    h.store.delete_document(doc_id).await.unwrap();

    let session = h.store.create_session(1, "after delete").await.unwrap();
    let (_, ai_message) = h
        .gateway
        .handle_chat_message(session.id, "what did gone.txt say?", 1)
        .await
        .unwrap();
    assert!(!ai_message.sources);
    assert!(h.store.list_documents(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn session_delete_cascades_and_preview_reflects_last_reply() {
    let h = harness();
    let session = h.store.create_session(1, "lifecycle").await.unwrap();

    h.gateway
        .handle_chat_message(session.id, "hello there", 1)
        .await
        .unwrap();

    let refreshed = h.store.get_session(session.id).await.unwrap().unwrap();
    assert_eq!(
        refreshed.last_message.as_deref(),
        Some("the document says hello")
    );

    h.store.delete_session(session.id).await.unwrap();
    assert!(h.store.get_session(session.id).await.unwrap().is_none());
    assert!(h.store.list_messages(session.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reprocessing_a_document_does_not_duplicate_points() {
    let h = harness();
    let content = "stable content for idempotent processing";
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();

    let document = h
        .store
        .create_document(1, "again.txt", content.len() as u64, MIME_TEXT, "x")
        .await
        .unwrap();

    for _ in 0..2 {
        h.pipeline
            .process(file.path(), document.id, "again.txt", 1, MIME_TEXT)
            .await
            .unwrap();
    }

    assert_eq!(h.index.points.lock().await.len(), 1);
}
