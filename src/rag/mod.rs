pub mod embeddings;
pub mod vector_store;

use std::sync::Arc;

use crate::error::Result;
use crate::rag::embeddings::Embedder;
use crate::rag::vector_store::{ChunkPayload, VectorIndex};

/// Neighbors fetched per query.
const TOP_K: u64 = 5;
/// Results scoring at or below this are discarded.
const SCORE_THRESHOLD: f32 = 0.7;

/// Retrieves document context for a chat query.
///
/// Retrieval is best-effort: any failure (embedding, index, network) is
/// logged and collapsed into an empty context so a vector-index outage
/// degrades answer quality but never blocks the chat response. Do not
/// propagate errors from here.
pub struct ContextRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl ContextRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Context string for `query`, restricted to `user_id`'s documents.
    /// Empty when nothing clears the threshold or retrieval fails.
    pub async fn retrieve(&self, query: &str, user_id: i64) -> String {
        match self.try_retrieve(query, user_id).await {
            Ok(context) => context,
            Err(e) => {
                tracing::warn!("Context retrieval failed (continuing without context): {}", e);
                String::new()
            }
        }
    }

    async fn try_retrieve(&self, query: &str, user_id: i64) -> Result<String> {
        let vector = self.embedder.embed(query).await?;
        let results = self.index.search(vector, user_id, TOP_K).await?;

        let blocks: Vec<String> = results
            .iter()
            .filter(|r| r.score > SCORE_THRESHOLD)
            .map(|r| format_chunk(&r.payload))
            .collect();

        Ok(blocks.join("\n\n"))
    }
}

fn format_chunk(payload: &ChunkPayload) -> String {
    match payload.page {
        Some(page) => format!(
            "[{}, page {}]: {}",
            payload.document_name, page, payload.text
        ),
        None => format!("[{}]: {}", payload.document_name, payload.text),
    }
}
